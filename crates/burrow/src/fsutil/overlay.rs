//! OverlayFS mounts.

use std::path::{Path, PathBuf};

use burrow_common::{BurrowError, BurrowResult};

/// An overlayfs mount: one or more lower directories, an optional
/// writable upper/work pair, and the merged mount point.
///
/// Lower directories are listed highest-priority first, per overlayfs
/// convention. Without an upper directory the mount is read-only.
#[derive(Debug, Clone)]
pub struct OverlayMount {
    /// Lower directories, highest priority first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper directory.
    pub upper_dir: Option<PathBuf>,
    /// Work directory; required whenever an upper directory is given.
    pub work_dir: Option<PathBuf>,
    /// Merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayMount {
    /// A read-only overlay of the given lower directories.
    pub fn read_only(lower_dirs: Vec<PathBuf>, merged_dir: impl Into<PathBuf>) -> Self {
        OverlayMount {
            lower_dirs,
            upper_dir: None,
            work_dir: None,
            merged_dir: merged_dir.into(),
        }
    }

    /// A writable overlay with a single lower directory.
    pub fn writable(
        lower_dir: impl Into<PathBuf>,
        upper_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        merged_dir: impl Into<PathBuf>,
    ) -> Self {
        OverlayMount {
            lower_dirs: vec![lower_dir.into()],
            upper_dir: Some(upper_dir.into()),
            work_dir: Some(work_dir.into()),
            merged_dir: merged_dir.into(),
        }
    }

    /// The options string handed to the kernel.
    #[must_use]
    pub fn mount_options(&self) -> String {
        let lower = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");

        match (&self.upper_dir, &self.work_dir) {
            (Some(upper), Some(work)) => format!(
                "lowerdir={lower},upperdir={},workdir={}",
                upper.display(),
                work.display()
            ),
            _ => format!("lowerdir={lower}"),
        }
    }

    /// Mount the overlay.
    ///
    /// Falls back to a read-only mount when the upper directory is not
    /// writable by the current uid, which happens routinely in
    /// user-namespace mode.
    #[cfg(target_os = "linux")]
    pub fn mount(&self) -> BurrowResult<()> {
        use rustix::fs::{access, Access};
        use rustix::mount::{mount, MountFlags};
        use std::ffi::CString;

        let options = self.mount_options();

        let mut flags = MountFlags::NOATIME | MountFlags::LAZYTIME;
        if self.upper_dir.is_none() {
            flags |= MountFlags::RDONLY;
        } else if let Some(upper) = &self.upper_dir {
            if access(upper, Access::WRITE_OK).is_err() {
                tracing::trace!(
                    upper = %upper.display(),
                    "Upper directory not writable, mounting overlay read-only"
                );
                flags |= MountFlags::RDONLY;
            }
        }

        tracing::debug!(
            merged = %self.merged_dir.display(),
            options = %options,
            "Mounting overlayfs"
        );

        let fstype = CString::new("overlay").expect("static string");
        let options_c = CString::new(options.as_str()).map_err(|_| BurrowError::Config {
            message: "Invalid overlay options (contains null byte)".to_string(),
        })?;

        mount(
            "overlay",
            &self.merged_dir,
            fstype.as_c_str(),
            flags,
            options_c.as_c_str(),
        )
        .map_err(|err| BurrowError::Mount {
            target: self.merged_dir.clone(),
            options,
            errno: std::io::Error::from(err).to_string(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn mount(&self) -> BurrowResult<()> {
        Err(BurrowError::Unsupported {
            feature: "overlayfs".to_string(),
        })
    }

    /// Detach the overlay lazily.
    pub fn unmount(&self) -> BurrowResult<()> {
        super::lazy_umount(&self.merged_dir)
    }
}

/// Build the colon-separated lower list for a merge of an existing view
/// with an additional layer: the existing content keeps priority over
/// whatever the new layer brings in below it.
#[must_use]
pub fn merge_lower_dirs(existing: &Path, layer: &Path) -> Vec<PathBuf> {
    vec![existing.to_path_buf(), layer.to_path_buf()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_options() {
        let overlay = OverlayMount::read_only(
            vec![PathBuf::from("/usr"), PathBuf::from("/layers/x/usr")],
            "/usr",
        );
        assert_eq!(overlay.mount_options(), "lowerdir=/usr:/layers/x/usr");
    }

    #[test]
    fn writable_options() {
        let overlay = OverlayMount::writable("/lower", "/upper", "/work", "/merged");
        let options = overlay.mount_options();
        assert!(options.contains("lowerdir=/lower"));
        assert!(options.contains("upperdir=/upper"));
        assert!(options.contains("workdir=/work"));
    }

    #[test]
    fn merge_priority_order() {
        let lowers = merge_lower_dirs(Path::new("/usr"), Path::new("/layers/a/usr"));
        // The existing view stays on top.
        assert_eq!(lowers[0], PathBuf::from("/usr"));
        assert_eq!(lowers[1], PathBuf::from("/layers/a/usr"));
    }
}
