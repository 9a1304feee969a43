//! User namespace creation with identity uid/gid maps.

use std::fs;

use burrow_common::{BurrowError, BurrowResult};

/// One uid/gid mapping line for `/proc/self/uid_map` or `gid_map`.
#[derive(Debug, Clone, Copy)]
pub struct IdMap {
    /// ID inside the namespace.
    pub inside: u32,
    /// ID outside the namespace.
    pub outside: u32,
    /// Range size.
    pub count: u32,
}

impl IdMap {
    /// Map a single ID onto itself.
    #[must_use]
    pub fn identity(id: u32) -> Self {
        IdMap {
            inside: id,
            outside: id,
            count: 1,
        }
    }

    /// Format for the proc map files.
    #[must_use]
    pub fn to_proc_format(&self) -> String {
        format!("{} {} {}", self.inside, self.outside, self.count)
    }
}

fn write_proc_file(path: &str, content: &str) -> BurrowResult<()> {
    tracing::trace!(path, content, "Writing proc map file");
    fs::write(path, content).map_err(|err| BurrowError::Namespace {
        kind: "user".to_string(),
        errno: format!("writing {path}: {err}"),
    })
}

/// Unshare user and mount namespaces, mapping the caller's uid and gid
/// onto themselves.
///
/// The identity maps are written from inside the new namespace; failure
/// of any of the three writes is fatal for this namespace attempt.
#[cfg(target_os = "linux")]
pub fn create_user_namespace() -> BurrowResult<()> {
    use rustix::thread::{unshare_unsafe, UnshareFlags};

    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    // Safety: new user plus mount namespace for this process.
    unsafe {
        unshare_unsafe(UnshareFlags::NEWUSER | UnshareFlags::NEWNS)
            .map_err(|err| super::mount::namespace_error("user", err))?;
    }

    write_proc_file("/proc/self/uid_map", &IdMap::identity(uid).to_proc_format())?;
    write_proc_file("/proc/self/setgroups", "deny")?;
    write_proc_file("/proc/self/gid_map", &IdMap::identity(gid).to_proc_format())?;

    tracing::debug!(uid, gid, "Created user namespace with identity mappings");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn create_user_namespace() -> BurrowResult<()> {
    Err(BurrowError::Unsupported {
        feature: "user namespaces".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_map_format() {
        assert_eq!(IdMap::identity(1000).to_proc_format(), "1000 1000 1");
    }
}
