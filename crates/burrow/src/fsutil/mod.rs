//! Filesystem primitives the rest of the crate builds on.

pub mod compare;
pub mod mounts;
pub mod overlay;
pub mod tempdir;
pub mod walk;

pub use compare::{inode_compare, FileDelta, InodeCompare};
pub use mounts::{lazy_umount, make_fs_private, mount_bind, mount_tmpfs, mount_virtual_fs};
pub use overlay::OverlayMount;
pub use tempdir::ScratchTmpfs;
pub use walk::{walk_tree, TreeVisitor, WalkAction, WalkOptions};

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use burrow_common::BurrowResult;

/// Create a directory and any missing parents with the given mode.
pub fn makedirs(path: &Path, mode: u32) -> BurrowResult<()> {
    match fs::DirBuilder::new().recursive(true).mode(mode).create(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Create an empty regular file, e.g. as a bind-mount target.
pub fn create_empty(path: &Path) -> BurrowResult<()> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(())
}

/// True when the path exists, without following a trailing symlink.
#[must_use]
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// True when the path is a directory.
#[must_use]
pub fn is_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.is_dir())
}

/// True when the directory has no entries at all.
pub fn dir_is_empty(path: &Path) -> BurrowResult<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// True when the directory contains nothing but (recursively) empty
/// directories. A missing path counts as empty.
pub fn tree_is_empty(path: &Path) -> BurrowResult<bool> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            return Ok(false);
        }
        if !tree_is_empty(&entry.path())? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Remove a file or directory tree; a missing path is not an error.
pub fn remove_recursively(path: &Path) -> BurrowResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// True when the current uid may enter the path. Used to decide whether a
/// mount point can be touched at all in user-namespace mode.
#[must_use]
pub fn accessible(path: &Path) -> bool {
    rustix::fs::access(path, rustix::fs::Access::EXEC_OK).is_ok()
}

/// Total size of the regular files below a path, in bytes. Unreadable
/// entries are skipped; a missing path is zero.
#[must_use]
pub fn tree_size(path: &Path) -> u64 {
    let mut total = 0;
    for entry in walkdir::WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn makedirs_creates_parents() {
        let temp = tempdir().unwrap();
        let deep = temp.path().join("a/b/c");
        makedirs(&deep, 0o755).unwrap();
        assert!(deep.is_dir());
        // Idempotent.
        makedirs(&deep, 0o755).unwrap();
    }

    #[test]
    fn create_empty_leaves_existing_content() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("marker");
        fs::write(&file, "payload").unwrap();
        create_empty(&file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "payload");
    }

    #[test]
    fn emptiness_checks() {
        let temp = tempdir().unwrap();
        assert!(dir_is_empty(temp.path()).unwrap());
        assert!(tree_is_empty(temp.path()).unwrap());

        fs::create_dir_all(temp.path().join("only/dirs/here")).unwrap();
        assert!(!dir_is_empty(temp.path()).unwrap());
        assert!(tree_is_empty(temp.path()).unwrap());

        fs::write(temp.path().join("only/dirs/here/file"), "x").unwrap();
        assert!(!tree_is_empty(temp.path()).unwrap());

        assert!(tree_is_empty(&temp.path().join("missing")).unwrap());
    }

    #[test]
    fn tree_size_counts_files() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/one"), "12345").unwrap();
        fs::write(temp.path().join("two"), "123").unwrap();
        assert_eq!(tree_size(temp.path()), 8);
        assert_eq!(tree_size(&temp.path().join("missing")), 0);
    }

    #[test]
    fn remove_recursively_tolerates_missing() {
        let temp = tempdir().unwrap();
        remove_recursively(&temp.path().join("nothing")).unwrap();

        let dir = temp.path().join("tree");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/file"), "x").unwrap();
        remove_recursively(&dir).unwrap();
        assert!(!dir.exists());

        let file = temp.path().join("single");
        fs::write(&file, "x").unwrap();
        remove_recursively(&file).unwrap();
        assert!(!file.exists());
    }
}
