//! Mount table snapshots.
//!
//! Reads the proc mounts file and turns every entry into a
//! `SystemMount` node of a [`PathStateTree`]. When a root prefix is
//! supplied, entries below it are re-rooted and everything else is
//! dropped.

use std::fs;
use std::path::Path;

use burrow_common::paths::strip_path_prefix;
use burrow_common::BurrowResult;

use super::tree::{PathState, PathStateTree};

/// Default source of mount entries.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Snapshot the current mount points into a path-state tree.
///
/// `mtab` defaults to `/proc/mounts`. With `root` given, mount points are
/// recorded relative to it; entries outside the root are dropped.
pub fn snapshot_mounts(mtab: Option<&Path>, root: Option<&Path>) -> BurrowResult<PathStateTree> {
    let mtab = mtab.unwrap_or(Path::new(PROC_MOUNTS));

    let resolved_root = match root {
        Some(root) => Some(fs::canonicalize(root)?),
        None => None,
    };

    let mut tree = PathStateTree::new();

    for line in fs::read_to_string(mtab)?.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point), Some(fstype)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        let mount_point = unescape_mount_path(mount_point);

        let recorded = match &resolved_root {
            Some(root) => {
                let root = root.to_string_lossy();
                match strip_path_prefix(&mount_point, &root) {
                    Some(relative) => relative.to_string(),
                    None => {
                        tracing::trace!(%mount_point, root = %root, "mount point outside root");
                        continue;
                    }
                }
            }
            None => mount_point,
        };

        tree.set(
            &recorded,
            PathState::SystemMount {
                fstype: fstype.to_string(),
                device: Some(unescape_mount_path(device)),
            },
        );
    }

    Ok(tree)
}

/// Decode the octal escapes the kernel uses for whitespace in mount
/// paths (`\040` for space and friends).
fn unescape_mount_path(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let digits: String = chars.clone().take(3).collect();
        if digits.len() == 3 {
            if let Ok(value) = u8::from_str_radix(&digits, 8) {
                out.push(value as char);
                chars.nth(2);
                continue;
            }
        }
        out.push(c);
    }

    out
}
