//! Post-run harvest: fold capture upperdirs into the layer tree and
//! clean the scaffolding away.

use std::fs;
use std::path::{Path, PathBuf};

use burrow_common::paths::parent_dir;
use burrow_common::{BurrowError, BurrowResult};

use crate::assembler::Environment;
use crate::fsutil;
use crate::pathstate::PathState;

/// After the wrapped command exits: detach the view, rename every
/// non-empty capture upperdir into place under `overlay_root/tree`, and
/// remove the scaffolding.
pub(super) fn combine_and_clean(
    overlay_root: &Path,
    env: &mut Environment,
) -> BurrowResult<()> {
    if let Some(root) = env.root_directory() {
        fsutil::lazy_umount(root).map_err(|err| {
            tracing::error!(root = %root.display(), "Unable to detach filesystem tree");
            err
        })?;
    }

    combine_tree(overlay_root, env)?;
    clean_tree(overlay_root, env)
}

/// Rename each captured subtree into `overlay_root/tree/<mount_point>`.
/// Empty and missing upperdirs are skipped.
fn combine_tree(overlay_root: &Path, env: &mut Environment) -> BurrowResult<()> {
    let tree_root = overlay_root.join("tree");

    let subtrees: Vec<(String, PathBuf)> = env
        .tree_state
        .walk()
        .filter_map(|(mount_point, state)| match state {
            PathState::OverlayMounted {
                upperdir: Some(upper),
            } => Some((mount_point, upper.clone())),
            _ => None,
        })
        .collect();

    for (mount_point, upper) in subtrees {
        if !fsutil::is_dir(&upper) {
            tracing::trace!(
                mount_point,
                upper = %upper.display(),
                "not a directory, ignoring subtree"
            );
            continue;
        }
        if fsutil::dir_is_empty(&upper)? {
            tracing::trace!(
                mount_point,
                upper = %upper.display(),
                "directory is empty, ignoring subtree"
            );
            continue;
        }

        let dest = burrow_common::paths::join_below(Some(&tree_root), &mount_point);
        let dest_parent = burrow_common::paths::join_below(Some(&tree_root), parent_dir(&mount_point));
        fsutil::makedirs(&dest_parent, 0o755)?;

        fs::rename(&upper, &dest).map_err(|err| {
            BurrowError::io_context(
                &format!(
                    "Cannot merge {} into tree at {}",
                    upper.display(),
                    dest.display()
                ),
                err,
            )
        })?;

        tracing::trace!(
            from = %upper.display(),
            to = %dest.display(),
            "Merged captured subtree"
        );
    }

    Ok(())
}

/// Remove the per-mount scaffolding, the working directories, and the
/// control files the session injected into the view.
fn clean_tree(overlay_root: &Path, env: &mut Environment) -> BurrowResult<()> {
    let overlays: Vec<(String, PathBuf)> = env
        .tree_state
        .walk()
        .filter_map(|(mount_point, state)| match state {
            PathState::OverlayMounted {
                upperdir: Some(upper),
            } => Some((mount_point, upper.clone())),
            _ => None,
        })
        .collect();

    for (mount_point, upper) in overlays {
        // The upperdir's parent is the whole subtree.<i> scaffold.
        let upper_str = upper.to_string_lossy();
        let subtree = PathBuf::from(parent_dir(&upper_str));
        fsutil::remove_recursively(&subtree)?;
        env.tree_state.clear(&mount_point);
    }

    for name in ["work", "lower", "tree/build.sh", "tree/build", "tree/provides"] {
        fsutil::remove_recursively(&overlay_root.join(name))?;
    }

    if let Some(root) = env.tree_state.root_directory().cloned() {
        fsutil::remove_recursively(&root)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathstate::PathState;

    /// Simulate a finished capture session on plain directories (no
    /// mounts): upperdirs with and without content, scaffolding dirs,
    /// injected control files.
    #[test]
    fn combine_and_clean_layout() {
        let temp = tempfile::tempdir().unwrap();
        let overlay_root = temp.path();

        for dir in ["lower", "work", "tree", "root"] {
            fs::create_dir(overlay_root.join(dir)).unwrap();
        }
        fs::write(overlay_root.join("tree/build.sh"), "#!/bin/sh\n").unwrap();
        fs::create_dir(overlay_root.join("tree/build")).unwrap();
        fs::write(overlay_root.join("tree/provides"), "tool-1.0\n").unwrap();

        // A captured subtree with content for /home.
        let subtree0 = overlay_root.join("subtree.0");
        fs::create_dir_all(subtree0.join("tree/user")).unwrap();
        fs::write(subtree0.join("tree/user/artifact"), "payload").unwrap();
        fs::create_dir_all(subtree0.join("work")).unwrap();

        // An empty capture for /srv.
        let subtree1 = overlay_root.join("subtree.1");
        fs::create_dir_all(subtree1.join("tree")).unwrap();
        fs::create_dir_all(subtree1.join("work")).unwrap();

        let mut env = Environment::empty("capture");
        env.tree_state.set(
            "/home",
            PathState::OverlayMounted {
                upperdir: Some(subtree0.join("tree")),
            },
        );
        env.tree_state.set(
            "/srv",
            PathState::OverlayMounted {
                upperdir: Some(subtree1.join("tree")),
            },
        );
        env.tree_state.set_root_directory(overlay_root.join("root"));

        combine_tree(overlay_root, &mut env).unwrap();
        clean_tree(overlay_root, &mut env).unwrap();

        // The non-empty capture landed in the tree.
        assert_eq!(
            fs::read_to_string(overlay_root.join("tree/home/user/artifact")).unwrap(),
            "payload"
        );
        // The empty one did not.
        assert!(!overlay_root.join("tree/srv").exists());

        // Scaffolding and control files are gone.
        for name in [
            "work",
            "lower",
            "root",
            "subtree.0",
            "subtree.1",
            "tree/build.sh",
            "tree/build",
            "tree/provides",
        ] {
            assert!(
                !overlay_root.join(name).exists(),
                "{name} should have been removed"
            );
        }

        // Overlay records were cleared.
        assert_eq!(env.tree_state.get("/home"), Some(&PathState::Unchanged));
    }
}
