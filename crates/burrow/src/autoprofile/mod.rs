//! Automatic profile creation.
//!
//! Scans a captured tree (typically the `tree/` a digger session left
//! behind), applies per-path policies from a profile, and emits a config
//! file describing a layer that references the tree.

pub mod analyser;
pub mod profile;

use std::path::{Path, PathBuf};

use burrow_common::paths::const_basename;
use burrow_common::{BurrowError, BurrowResult};
use burrow_config::Config;

use crate::fsutil;

pub use analyser::{analyse, AnalyserOptions};
pub use profile::{AutoProfile, EmittedKind, ProfileAction};

/// Options of an autoprofile run.
#[derive(Debug, Clone, Default)]
pub struct AutoProfileOptions {
    /// The captured tree, or a digger overlay root containing `tree/`.
    pub overlay_root: PathBuf,
    /// Name of the emitted environment; defaults to the overlay root's
    /// basename.
    pub environment_name: Option<String>,
    /// Output target: a path, `auto`, or `-` for stdout.
    pub output: Option<String>,
    /// Profile selector: built-in tag or absolute path.
    pub profile: String,
    /// Capabilities to declare as provided.
    pub provides: Vec<String>,
    /// Capabilities to declare as required.
    pub requires: Vec<String>,
    /// Directory holding wrapper symlinks for `check-binaries`.
    pub wrapper_directory: Option<PathBuf>,
    /// Extra `check-binaries` directories from the command line.
    pub check_binaries: Vec<String>,
}

/// Result of an analysis, plus where the tree actually was.
#[derive(Debug)]
pub struct Analysis {
    /// The emitted configuration.
    pub config: Config,
    /// Root of the analysed tree.
    pub tree_root: PathBuf,
    /// True when the overlay root had the digger layout (`tree/`
    /// subdirectory).
    pub digger_layout: bool,
}

/// Run the analyser against an overlay root.
pub fn run(opts: &AutoProfileOptions) -> BurrowResult<Analysis> {
    let (tree_root, digger_layout) = locate_tree(&opts.overlay_root);

    let environment_name = match &opts.environment_name {
        Some(name) => name.clone(),
        None => const_basename(&opts.overlay_root.to_string_lossy())
            .unwrap_or("layer")
            .to_string(),
    };

    let mut profile = profile::load(&opts.profile)?;
    for dir in &opts.check_binaries {
        profile.actions.push(ProfileAction::CheckBinaries(dir.clone()));
    }

    let analyser_opts = AnalyserOptions {
        environment_name,
        provides: opts.provides.clone(),
        requires: opts.requires.clone(),
        wrapper_directory: opts.wrapper_directory.clone(),
    };

    let config = analyse(&tree_root, &profile, &analyser_opts)?;

    Ok(Analysis {
        config,
        tree_root,
        digger_layout,
    })
}

/// Resolve the output target to a concrete destination. `None` means
/// stdout.
pub fn output_path(analysis: &Analysis, opts: &AutoProfileOptions) -> BurrowResult<Option<PathBuf>> {
    match opts.output.as_deref() {
        None | Some("-") => Ok(None),
        Some("auto") => {
            if analysis.digger_layout {
                Ok(Some(opts.overlay_root.join("environ.conf")))
            } else {
                Err(BurrowError::Config {
                    message: "Don't know where to write output file (you requested \"auto\" mode)"
                        .to_string(),
                })
            }
        }
        Some(path) => Ok(Some(PathBuf::from(path))),
    }
}

/// A digger overlay root keeps the captured files under `tree/`; a bare
/// tree is analysed as-is.
fn locate_tree(overlay_root: &Path) -> (PathBuf, bool) {
    let tree = overlay_root.join("tree");
    if fsutil::is_dir(&tree) {
        tracing::info!(
            root = %overlay_root.display(),
            "This looks like a tree created by the digger, assuming the file system root is at tree/"
        );
        (tree, true)
    } else {
        (overlay_root.to_path_buf(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_config::{LayerKind, PathKind};
    use std::fs;

    fn opts(root: &Path, profile: &str) -> AutoProfileOptions {
        AutoProfileOptions {
            overlay_root: root.to_path_buf(),
            environment_name: Some("captured".to_string()),
            profile: profile.to_string(),
            ..AutoProfileOptions::default()
        }
    }

    fn write_profile(dir: &Path, text: &str) -> String {
        let path = dir.join("test.profile");
        fs::write(&path, text).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn stray_file_fails_the_run() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("etc")).unwrap();
        fs::write(tree.join("etc/magic-file"), "boo").unwrap();

        let profile = write_profile(temp.path(), "optional-directory /etc\n");
        let err = run(&opts(temp.path(), &profile)).unwrap_err();
        assert!(matches!(err, BurrowError::Validation { .. }));
    }

    #[test]
    fn captured_usr_becomes_overlay() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("usr/bin")).unwrap();
        fs::write(tree.join("usr/bin/newbin"), "#!/bin/sh\n").unwrap();

        let profile = write_profile(
            temp.path(),
            "overlay-unless-empty /usr\nignore-empty-subdirs /\n",
        );
        let analysis = run(&opts(temp.path(), &profile)).unwrap();
        assert!(analysis.digger_layout);

        let env = &analysis.config.environments[0];
        assert_eq!(env.name, "captured");
        let layer = &env.layers[0];
        assert_eq!(
            layer.kind,
            LayerKind::Layer {
                directory: analysis.tree_root.clone()
            }
        );
        assert_eq!(layer.paths.len(), 1);
        assert_eq!(layer.paths[0].kind, PathKind::Overlay);
        assert_eq!(layer.paths[0].path, "/usr");
    }

    #[test]
    fn empty_directories_are_ignored_not_stray() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("var/lib/empty/nested")).unwrap();

        let profile = write_profile(temp.path(), "ignore-empty-subdirs /\n");
        run(&opts(temp.path(), &profile)).unwrap();
    }

    #[test]
    fn must_be_empty_violation() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("boot")).unwrap();
        fs::write(tree.join("boot/vmlinuz"), "kernel").unwrap();

        let profile = write_profile(temp.path(), "must-be-empty /boot\n");
        let err = run(&opts(temp.path(), &profile)).unwrap_err();
        assert!(err.to_string().contains("/boot"));
    }

    #[test]
    fn check_ldconfig_enables_feature() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("etc")).unwrap();
        fs::write(tree.join("etc/ld.so.cache"), "cache").unwrap();
        fs::create_dir_all(tree.join("usr")).unwrap();
        fs::write(tree.join("usr/lib.so"), "lib").unwrap();

        let profile = write_profile(
            temp.path(),
            "check-ldconfig\noverlay-unless-empty /usr\nignore-empty-subdirs /\n",
        );
        let analysis = run(&opts(temp.path(), &profile)).unwrap();
        assert!(analysis.config.environments[0].layers[0].use_ldconfig);
    }

    #[test]
    fn check_binaries_emits_wrapper_profiles() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("usr/bin")).unwrap();
        let exe = tree.join("usr/bin/tool");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(tree.join("usr/bin/data.txt"), "not executable").unwrap();

        let profile = write_profile(
            temp.path(),
            "overlay /usr\nignore-empty-subdirs /\ncheck-binaries /usr/bin\n",
        );
        let mut options = opts(temp.path(), &profile);
        options.wrapper_directory = Some(PathBuf::from("/usr/lib/burrow/bin"));

        let analysis = run(&options).unwrap();
        let profiles = &analysis.config.profiles;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "tool");
        assert_eq!(
            profiles[0].wrapper.as_deref(),
            Some("/usr/lib/burrow/bin/tool")
        );
        assert_eq!(profiles[0].command.as_deref(), Some("/usr/bin/tool"));
        assert_eq!(profiles[0].environment.as_deref(), Some("captured"));
    }

    #[test]
    fn output_target_resolution() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(&tree).unwrap();

        let profile = write_profile(temp.path(), "ignore strays\n");
        let mut options = opts(temp.path(), &profile);
        let analysis = run(&options).unwrap();

        assert_eq!(output_path(&analysis, &options).unwrap(), None);

        options.output = Some("auto".to_string());
        assert_eq!(
            output_path(&analysis, &options).unwrap(),
            Some(temp.path().join("environ.conf"))
        );

        options.output = Some("/tmp/out.conf".to_string());
        assert_eq!(
            output_path(&analysis, &options).unwrap(),
            Some(PathBuf::from("/tmp/out.conf"))
        );
    }
}
