//! Inode-level file comparison.

use std::fs;
use std::path::Path;

/// Size and mtime relationship between two files of the same type,
/// from the first file's perspective.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileDelta {
    /// First file is smaller (regular files only).
    pub smaller: bool,
    /// First file is bigger (regular files only).
    pub bigger: bool,
    /// First file has the newer mtime.
    pub newer: bool,
    /// First file has the older mtime.
    pub older: bool,
}

/// Outcome of [`inode_compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeCompare {
    /// One of the files does not exist.
    Missing,
    /// The files are of different types.
    TypeMismatch,
    /// Same type; the delta describes size and mtime.
    Delta(FileDelta),
}

impl InodeCompare {
    /// True when both files exist with the same type and the second one
    /// has the newer mtime.
    #[must_use]
    pub fn second_is_newer(&self) -> bool {
        matches!(self, InodeCompare::Delta(delta) if delta.older)
    }
}

/// Compare two paths by metadata alone, without opening either file.
#[must_use]
pub fn inode_compare(path1: &Path, path2: &Path) -> InodeCompare {
    let Ok(meta1) = fs::symlink_metadata(path1) else {
        return InodeCompare::Missing;
    };
    let Ok(meta2) = fs::symlink_metadata(path2) else {
        return InodeCompare::Missing;
    };

    if meta1.file_type() != meta2.file_type() {
        return InodeCompare::TypeMismatch;
    }

    let mut delta = FileDelta::default();

    if meta1.is_file() {
        delta.smaller = meta1.len() < meta2.len();
        delta.bigger = meta1.len() > meta2.len();
    }

    if let (Ok(mtime1), Ok(mtime2)) = (meta1.modified(), meta2.modified()) {
        delta.older = mtime1 < mtime2;
        delta.newer = mtime1 > mtime2;
    }

    InodeCompare::Delta(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn missing_and_mismatch() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, "x").unwrap();

        assert_eq!(
            inode_compare(&file, &temp.path().join("nothing")),
            InodeCompare::Missing
        );
        assert_eq!(
            inode_compare(&file, temp.path()),
            InodeCompare::TypeMismatch
        );
    }

    #[test]
    fn size_delta() {
        let temp = tempdir().unwrap();
        let small = temp.path().join("small");
        let big = temp.path().join("big");
        fs::write(&small, "x").unwrap();
        fs::write(&big, "xxxxxxxx").unwrap();

        let InodeCompare::Delta(delta) = inode_compare(&small, &big) else {
            panic!("expected a delta");
        };
        assert!(delta.smaller);
        assert!(!delta.bigger);
    }

    #[test]
    fn mtime_delta() {
        let temp = tempdir().unwrap();
        let older = temp.path().join("older");
        let newer = temp.path().join("newer");
        File::create(&older).unwrap();
        File::create(&newer).unwrap();

        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let verdict = inode_compare(&older, &newer);
        assert!(verdict.second_is_newer());
    }
}
