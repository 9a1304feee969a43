//! Path directive application.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use burrow_common::{BurrowError, BurrowResult};
use burrow_config::{PathDirective, PathKind};

use crate::fsutil::{self, OverlayMount, ScratchTmpfs};
use crate::pathstate::PathState;

use super::{AssemblyContext, Environment, Scaffold};

/// Apply one path directive to the namespace being assembled.
pub(super) fn apply(
    env: &mut Environment,
    directive: &PathDirective,
    scaffold: &Scaffold,
    ctx: &AssemblyContext<'_>,
) -> BurrowResult<()> {
    match &directive.kind {
        PathKind::Hide => Err(BurrowError::Unsupported {
            feature: format!("hide directive for {}", directive.path),
        }),
        PathKind::Bind => for_each_glob(env, scaffold, &directive.path, bind_path),
        PathKind::BindChildren => for_each_glob(env, scaffold, &directive.path, bind_children),
        PathKind::Overlay => for_each_glob(env, scaffold, &directive.path, overlay_path),
        PathKind::OverlayChildren => {
            for_each_glob(env, scaffold, &directive.path, overlay_children)
        }
        PathKind::Mount {
            fstype,
            device,
            options,
        } => mount_path(
            env,
            scaffold,
            &directive.path,
            fstype,
            device.as_deref(),
            options.as_deref(),
        ),
        PathKind::Wormhole => wormhole_path(env, scaffold, &directive.path, ctx),
    }
}

/// Expand a directive path through glob relative to the source prefix and
/// run `f` once per match.
///
/// A pattern without magic characters stands for itself, matched or not,
/// so non-glob directives work against paths that only exist inside the
/// destination. Matches whose destination exists but is inaccessible to
/// the current uid are skipped with a trace; this is routine in
/// user-namespace mode.
fn for_each_glob(
    env: &mut Environment,
    scaffold: &Scaffold,
    pattern: &str,
    f: impl Fn(&mut Environment, &Path, &str, &Path) -> BurrowResult<()>,
) -> BurrowResult<()> {
    let full_pattern = scaffold.source_path(pattern);

    for source in expand_glob(&full_pattern)? {
        let logical = scaffold
            .strip_source(&source)
            .ok_or_else(|| BurrowError::Internal {
                message: format!(
                    "glob expansion of {} returned path name {}",
                    full_pattern.display(),
                    source.display()
                ),
            })?;
        let dest = scaffold.dest_path(&logical);

        if fsutil::exists(&dest) && !fsutil::accessible(&dest) {
            tracing::trace!(
                dest = %dest.display(),
                "mount point inaccessible to this user, skipping directive"
            );
            continue;
        }

        f(env, &source, &logical, &dest)?;
    }

    Ok(())
}

/// Glob expansion with shell semantics. A pattern without magic
/// characters yields itself.
fn expand_glob(pattern: &Path) -> BurrowResult<Vec<PathBuf>> {
    let pattern_str = pattern.to_str().ok_or_else(|| BurrowError::Config {
        message: format!("path {} is not valid UTF-8", pattern.display()),
    })?;

    if !pattern_str.contains(['*', '?', '[']) {
        return Ok(vec![pattern.to_path_buf()]);
    }

    let matches: Vec<PathBuf> = glob::glob(pattern_str)
        .map_err(|err| BurrowError::Config {
            message: format!("bad glob pattern \"{pattern_str}\": {err}"),
        })?
        .filter_map(Result::ok)
        .collect();

    if matches.is_empty() {
        return Err(BurrowError::Config {
            message: format!("path expansion failed, glob \"{pattern_str}\" matched nothing"),
        });
    }

    Ok(matches)
}

fn logical_child(logical: &str, name: &str) -> String {
    if logical == "/" {
        format!("/{name}")
    } else {
        format!("{logical}/{name}")
    }
}

fn bind_path(
    env: &mut Environment,
    source: &Path,
    logical: &str,
    dest: &Path,
) -> BurrowResult<()> {
    fsutil::mount_bind(source, dest, true)?;
    env.tree_state.set(logical, PathState::BindMounted);
    Ok(())
}

/// Throw-away overlay over the destination, then one bind per child of
/// the source directory. The overlay's upper and work directories live on
/// a scratch tmpfs so the placeholder entries never touch a real
/// filesystem.
fn bind_children(
    env: &mut Environment,
    source: &Path,
    logical: &str,
    dest: &Path,
) -> BurrowResult<()> {
    let entries = fs::read_dir(source).map_err(|err| {
        BurrowError::io_context(&format!("unable to open dir {}", source.display()), err)
    })?;

    let scratch = ScratchTmpfs::new()?;
    let lower = scratch.path().join("lower");
    let upper = scratch.path().join("upper");
    let work = scratch.path().join("work");

    symlink(dest, &lower)?;
    fs::create_dir(&upper)?;
    fs::create_dir(&work)?;

    OverlayMount::writable(&lower, &upper, &work, dest).mount()?;
    // The upperdir is scratch space, invalid once we return.
    env.tree_state
        .set(logical, PathState::OverlayMounted { upperdir: None });

    let mut num_mounted = 0u32;
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }

        let name = entry.file_name();
        let target = dest.join(&name);

        if !fsutil::exists(&target) {
            if file_type.is_dir() {
                let _ = fs::create_dir(&target);
            } else {
                let _ = fsutil::create_empty(&target);
            }
        }

        fsutil::mount_bind(&entry.path(), &target, true)?;
        env.tree_state.set(
            &logical_child(logical, &name.to_string_lossy()),
            PathState::BindMounted,
        );
        num_mounted += 1;
    }

    tracing::debug!(dest = %dest.display(), num_mounted, "Mounted children");
    scratch.cleanup()
}

/// Merge the layer's copy into the existing view: a read-only overlay
/// whose lower list keeps the current content on top.
fn overlay_path(
    env: &mut Environment,
    source: &Path,
    logical: &str,
    dest: &Path,
) -> BurrowResult<()> {
    let lowers = crate::fsutil::overlay::merge_lower_dirs(dest, source);
    OverlayMount::read_only(lowers, dest).mount()?;
    env.tree_state
        .set(logical, PathState::OverlayMounted { upperdir: None });
    Ok(())
}

/// Per-child variant of [`overlay_path`]: each immediate child directory
/// of the source is overlaid onto the corresponding child of the
/// destination.
fn overlay_children(
    env: &mut Environment,
    source: &Path,
    logical: &str,
    dest: &Path,
) -> BurrowResult<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let child_dest = dest.join(&name);
        fsutil::makedirs(&child_dest, 0o755)?;

        let lowers = crate::fsutil::overlay::merge_lower_dirs(&child_dest, &entry.path());
        OverlayMount::read_only(lowers, &child_dest).mount()?;
        env.tree_state.set(
            &logical_child(logical, &name.to_string_lossy()),
            PathState::OverlayMounted { upperdir: None },
        );
    }
    Ok(())
}

fn mount_path(
    env: &mut Environment,
    scaffold: &Scaffold,
    path: &str,
    fstype: &str,
    device: Option<&str>,
    options: Option<&str>,
) -> BurrowResult<()> {
    let dest = scaffold.dest_path(path);
    fsutil::makedirs(&dest, 0o755)?;
    fsutil::mount_virtual_fs(&dest, fstype, device, options)?;
    env.tree_state.set(
        path,
        PathState::SystemMount {
            fstype: fstype.to_string(),
            device: device.map(str::to_string),
        },
    );
    Ok(())
}

fn wormhole_path(
    env: &mut Environment,
    scaffold: &Scaffold,
    path: &str,
    ctx: &AssemblyContext<'_>,
) -> BurrowResult<()> {
    let dest = scaffold.dest_path(path);
    fsutil::mount_bind(ctx.client_path, &dest, true)?;
    env.tree_state.set(path, PathState::BindMounted);
    Ok(())
}
