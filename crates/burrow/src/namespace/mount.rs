//! Mount namespace creation.

use burrow_common::{BurrowError, BurrowResult};

/// Unshare the mount namespace of the calling process.
///
/// Verifies that the namespace identity actually changed by comparing
/// `/proc/self/ns/mnt` before and after; an unshare that silently leaves
/// us in the old namespace would let mounts leak to the host.
#[cfg(target_os = "linux")]
pub fn create_mount_namespace() -> BurrowResult<()> {
    use rustix::fs::stat;
    use rustix::thread::{unshare_unsafe, UnshareFlags};

    let ns_path = "/proc/self/ns/mnt";
    let before = stat(ns_path).map_err(|err| namespace_error("mount", err))?;

    // Safety: creating a new mount namespace for this process is the
    // intended use of unshare.
    unsafe {
        unshare_unsafe(UnshareFlags::NEWNS).map_err(|err| namespace_error("mount", err))?;
    }

    let after = stat(ns_path).map_err(|err| namespace_error("mount", err))?;
    if before.st_dev == after.st_dev && before.st_ino == after.st_ino {
        return Err(BurrowError::Internal {
            message: "unshare(CLONE_NEWNS) did not change the mount namespace".to_string(),
        });
    }

    tracing::debug!("Created mount namespace");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn create_mount_namespace() -> BurrowResult<()> {
    Err(BurrowError::Unsupported {
        feature: "mount namespaces".to_string(),
    })
}

pub(crate) fn namespace_error(kind: &str, err: rustix::io::Errno) -> BurrowError {
    BurrowError::Namespace {
        kind: kind.to_string(),
        errno: std::io::Error::from(err).to_string(),
    }
}
