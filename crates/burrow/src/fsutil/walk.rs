//! File tree walk with pre/post callbacks.
//!
//! A thin recursive walker with the controls the analysis passes need:
//! an enter callback that can skip a subtree or abort the whole walk, an
//! optional leave callback after a directory's children, a single
//! filesystem constraint, and a switch deciding whether unreadable
//! directories abort the walk.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use burrow_common::BurrowResult;

/// What the visitor wants the walk to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Keep going, descending into directories.
    Continue,
    /// Do not descend into this directory's children.
    SkipSubtree,
    /// Stop the whole walk.
    Abort,
}

/// Walk behaviour switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Do not cross filesystem boundaries below the root.
    pub one_filesystem: bool,
    /// Continue past directories that cannot be opened instead of failing
    /// the walk.
    pub ignore_open_errors: bool,
}

/// Callbacks invoked around each entry.
pub trait TreeVisitor {
    /// Called for every entry before descending.
    fn enter(&mut self, path: &Path, file_type: fs::FileType) -> BurrowResult<WalkAction>;

    /// Called for directory entries after their children.
    fn leave(&mut self, _path: &Path) -> BurrowResult<WalkAction> {
        Ok(WalkAction::Continue)
    }
}

/// Walk the tree below `root` in depth-first order.
///
/// Returns `false` when a visitor aborted the walk, `true` otherwise.
/// Entries within a directory are visited in name order so walks are
/// deterministic.
pub fn walk_tree(
    root: &Path,
    options: WalkOptions,
    visitor: &mut dyn TreeVisitor,
) -> BurrowResult<bool> {
    let root_dev = if options.one_filesystem {
        Some(fs::symlink_metadata(root)?.dev())
    } else {
        None
    };
    walk_dir(root, root_dev, options, visitor)
}

fn walk_dir(
    dir: &Path,
    root_dev: Option<u64>,
    options: WalkOptions,
    visitor: &mut dyn TreeVisitor,
) -> BurrowResult<bool> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if options.ignore_open_errors => {
            tracing::trace!(dir = %dir.display(), error = %err, "Skipping unreadable directory");
            return Ok(true);
        }
        Err(err) => return Err(err.into()),
    };

    let mut children: Vec<_> = entries.collect::<Result<_, _>>()?;
    children.sort_by_key(fs::DirEntry::file_name);

    for entry in children {
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;

        if let Some(dev) = root_dev {
            if meta.dev() != dev {
                tracing::trace!(path = %path.display(), "Not crossing filesystem boundary");
                continue;
            }
        }

        match visitor.enter(&path, meta.file_type())? {
            WalkAction::Abort => return Ok(false),
            WalkAction::SkipSubtree => continue,
            WalkAction::Continue => {}
        }

        if meta.file_type().is_dir() {
            if !walk_dir(&path, root_dev, options, visitor)? {
                return Ok(false);
            }
            if visitor.leave(&path)? == WalkAction::Abort {
                return Ok(false);
            }
        }
    }

    Ok(true)
}
