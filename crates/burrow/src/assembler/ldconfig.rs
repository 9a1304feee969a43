//! Per-layer `ld.so.cache` maintenance.
//!
//! Layers that ship shared libraries carry their own linker cache so the
//! composed view resolves the layer's libraries ahead of the host's.

use std::path::{Path, PathBuf};

use burrow_common::BurrowResult;
use tempfile::NamedTempFile;

use crate::exec::CommandSpec;
use crate::fsutil::{self, inode_compare};
use crate::pathstate::PathState;

use super::{Environment, Scaffold};

const HOST_CACHE: &str = "/etc/ld.so.cache";
const LDCONFIG: &str = "/sbin/ldconfig";

/// Regenerate the layer's `ld.so.cache` when needed and bind it over the
/// view's `/etc/ld.so.cache`.
pub(super) fn apply(
    env: &mut Environment,
    source_root: &Path,
    scaffold: &Scaffold,
) -> BurrowResult<()> {
    fsutil::makedirs(&source_root.join("etc"), 0o755)?;

    let euid = unsafe { libc::geteuid() };

    // Root regenerates the cache inside the layer itself; everyone else
    // writes to a temp file, since layers below may not be writable.
    let (cache_path, temp): (PathBuf, Option<NamedTempFile>) = if euid == 0 {
        let cache = source_root.join("etc/ld.so.cache");

        // When the layer's cache is already newer than the host's there
        // is nothing to do.
        if inode_compare(Path::new(HOST_CACHE), &cache).second_is_newer() {
            tracing::trace!(
                environment = env.name,
                "ld.so.cache exists and is recent - not updating it"
            );
        } else {
            regenerate(env, &cache);
        }
        (cache, None)
    } else {
        let temp = tempfile::Builder::new()
            .prefix("ld.so.")
            .suffix(".cache")
            .tempfile()?;
        regenerate(env, temp.path());
        (temp.path().to_path_buf(), Some(temp))
    };

    let dest = scaffold.dest_path(HOST_CACHE);
    fsutil::mount_bind(&cache_path, &dest, true)?;
    env.tree_state.set(HOST_CACHE, PathState::BindMounted);

    // A temp cache file may go away now; the bind mount pins the inode.
    drop(temp);
    Ok(())
}

fn regenerate(env: &Environment, cache: &Path) {
    tracing::trace!(environment = env.name, cache = %cache.display(), "Updating ld.so.cache");

    // Links inside the layer are expected to be up to date, and touching
    // links in layers below may fail, so link creation stays disabled.
    let argv = vec![
        LDCONFIG.to_string(),
        "-X".to_string(),
        "-C".to_string(),
        cache.to_string_lossy().into_owned(),
    ];

    match CommandSpec::new(argv).run() {
        Ok(status) if status.success() => {}
        Ok(status) => {
            tracing::warn!(environment = env.name, %status, "ldconfig failed");
        }
        Err(err) => {
            tracing::warn!(environment = env.name, error = %err, "ldconfig failed to run");
        }
    }
}
