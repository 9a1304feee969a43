//! Mount operations.

use std::ffi::CString;
use std::fs;
use std::path::Path;

use burrow_common::{BurrowError, BurrowResult};

use super::{create_empty, exists, makedirs};

fn mount_error(target: &Path, options: &str, err: rustix::io::Errno) -> BurrowError {
    BurrowError::Mount {
        target: target.to_path_buf(),
        options: options.to_string(),
        errno: std::io::Error::from(err).to_string(),
    }
}

/// Ensure a bind-mount target of the right type exists: a directory for a
/// directory source, an empty regular file otherwise. Parent directories
/// are created on demand.
fn prepare_bind_target(source: &Path, target: &Path) -> BurrowResult<()> {
    if exists(target) {
        return Ok(());
    }

    let source_meta = fs::metadata(source)?;
    if source_meta.is_dir() {
        makedirs(target, 0o755)?;
    } else {
        if let Some(parent) = target.parent() {
            makedirs(parent, 0o755)?;
        }
        create_empty(target)?;
    }
    Ok(())
}

/// Bind-mount `source` onto `target`, recursively when requested.
#[cfg(target_os = "linux")]
pub fn mount_bind(source: &Path, target: &Path, recursive: bool) -> BurrowResult<()> {
    use rustix::mount::{mount, MountFlags};

    prepare_bind_target(source, target)?;

    let mut flags = MountFlags::BIND;
    if recursive {
        flags |= MountFlags::REC;
    }

    tracing::trace!(
        source = %source.display(),
        target = %target.display(),
        recursive,
        "Bind mounting"
    );

    let empty = CString::new("").expect("static string");
    mount(source, target, empty.as_c_str(), flags, empty.as_c_str())
        .map_err(|err| mount_error(target, "bind", err))
}

#[cfg(not(target_os = "linux"))]
pub fn mount_bind(_source: &Path, _target: &Path, _recursive: bool) -> BurrowResult<()> {
    Err(BurrowError::Unsupported {
        feature: "bind mounts".to_string(),
    })
}

/// Mount a fresh virtual filesystem (tmpfs, proc, devpts, ...) at `target`.
#[cfg(target_os = "linux")]
pub fn mount_virtual_fs(
    target: &Path,
    fstype: &str,
    device: Option<&str>,
    options: Option<&str>,
) -> BurrowResult<()> {
    use rustix::mount::{mount, MountFlags};

    let source = device.unwrap_or(fstype);
    let fstype_c = CString::new(fstype).map_err(|_| BurrowError::Config {
        message: format!("Invalid filesystem type \"{fstype}\""),
    })?;
    let options_str = options.unwrap_or("");
    let options_c = CString::new(options_str).map_err(|_| BurrowError::Config {
        message: "Invalid mount options (contains null byte)".to_string(),
    })?;

    tracing::debug!(
        target = %target.display(),
        fstype,
        options = options_str,
        "Mounting virtual filesystem"
    );

    mount(
        source,
        target,
        fstype_c.as_c_str(),
        MountFlags::empty(),
        options_c.as_c_str(),
    )
    .map_err(|err| mount_error(target, &format!("{fstype},{options_str}"), err))
}

#[cfg(not(target_os = "linux"))]
pub fn mount_virtual_fs(
    _target: &Path,
    _fstype: &str,
    _device: Option<&str>,
    _options: Option<&str>,
) -> BurrowResult<()> {
    Err(BurrowError::Unsupported {
        feature: "virtual filesystems".to_string(),
    })
}

/// Mount a tmpfs at `target`.
pub fn mount_tmpfs(target: &Path) -> BurrowResult<()> {
    mount_virtual_fs(target, "tmpfs", None, None)
}

/// Detach a mount lazily (MNT_DETACH).
#[cfg(target_os = "linux")]
pub fn lazy_umount(target: &Path) -> BurrowResult<()> {
    use rustix::mount::{unmount, UnmountFlags};

    tracing::trace!(target = %target.display(), "Lazy unmount");
    unmount(target, UnmountFlags::DETACH).map_err(|err| mount_error(target, "detach", err))
}

#[cfg(not(target_os = "linux"))]
pub fn lazy_umount(_target: &Path) -> BurrowResult<()> {
    Err(BurrowError::Unsupported {
        feature: "lazy unmount".to_string(),
    })
}

/// Change propagation so mounts below `target` stay private to this
/// namespace.
#[cfg(target_os = "linux")]
pub fn make_fs_private(target: &Path) -> BurrowResult<()> {
    use rustix::mount::{mount_change, MountPropagationFlags};

    tracing::debug!(target = %target.display(), "Making mount tree private");
    mount_change(
        target,
        MountPropagationFlags::PRIVATE | MountPropagationFlags::REC,
    )
    .map_err(|err| mount_error(target, "private", err))
}

#[cfg(not(target_os = "linux"))]
pub fn make_fs_private(_target: &Path) -> BurrowResult<()> {
    Err(BurrowError::Unsupported {
        feature: "mount propagation".to_string(),
    })
}
