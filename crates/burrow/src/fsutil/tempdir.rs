//! Temporary directories backed by tmpfs.

use std::path::Path;

use burrow_common::BurrowResult;
use tempfile::TempDir;

use super::{lazy_umount, mount_tmpfs};

/// A mkdtemp directory with a tmpfs mounted over it.
///
/// Used to hold overlay scaffolding (upper/work directories) that must
/// not pollute any real filesystem. Cleanup detaches the tmpfs and then
/// removes the directory; dropping without [`cleanup`](Self::cleanup)
/// does the same on a best-effort basis.
#[derive(Debug)]
pub struct ScratchTmpfs {
    dir: Option<TempDir>,
    mounted: bool,
}

impl ScratchTmpfs {
    /// Create the directory and mount a tmpfs over it.
    pub fn new() -> BurrowResult<Self> {
        let dir = tempfile::Builder::new().prefix("burrow-mounts.").tempdir()?;
        mount_tmpfs(dir.path())?;

        tracing::trace!(path = %dir.path().display(), "Mounted scratch tmpfs");
        Ok(ScratchTmpfs {
            dir: Some(dir),
            mounted: true,
        })
    }

    /// The mount point.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.as_ref().expect("live until cleanup").path()
    }

    /// Detach the tmpfs and remove the directory.
    pub fn cleanup(mut self) -> BurrowResult<()> {
        if self.mounted {
            lazy_umount(self.path())?;
            self.mounted = false;
        }
        if let Some(dir) = self.dir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

impl Drop for ScratchTmpfs {
    fn drop(&mut self) {
        if self.mounted {
            if let Some(dir) = &self.dir {
                if let Err(err) = lazy_umount(dir.path()) {
                    tracing::warn!(
                        path = %dir.path().display(),
                        error = %err,
                        "Unable to unmount scratch tmpfs"
                    );
                }
            }
        }
    }
}
