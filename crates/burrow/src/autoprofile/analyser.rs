//! Profile execution and the stray-file pass.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use burrow_common::{BurrowError, BurrowResult};
use burrow_config::{
    Config, EnvironmentConfig, LayerConfig, LayerKind, PathDirective, PathKind, ProfileConfig,
};

use crate::fsutil::{self, walk_tree, TreeVisitor, WalkAction, WalkOptions};
use crate::pathstate::{PathState, PathStateTree};

use super::profile::{AutoProfile, EmittedKind, ProfileAction};

/// How many individual stray files get logged before the report goes
/// quiet.
const STRAY_LOG_LIMIT: usize = 100;

/// Inputs of an analysis run beyond the tree and profile.
#[derive(Debug, Clone, Default)]
pub struct AnalyserOptions {
    /// Name of the emitted environment.
    pub environment_name: String,
    /// Capabilities the environment provides.
    pub provides: Vec<String>,
    /// Capabilities the environment requires.
    pub requires: Vec<String>,
    /// Where `check-binaries` wrapper links live.
    pub wrapper_directory: Option<PathBuf>,
}

/// Analyse a captured tree against a profile, producing the config that
/// describes it as a layer.
pub fn analyse(
    tree_root: &Path,
    profile: &AutoProfile,
    opts: &AnalyserOptions,
) -> BurrowResult<Config> {
    let mut analyser = Analyser {
        tree_root: tree_root.to_path_buf(),
        state: PathStateTree::new(),
        directives: Vec::new(),
        emitted_kind: EmittedKind::default(),
        use_ldconfig: false,
        ignore_strays: false,
        wrappers: Vec::new(),
        stray_total: 0,
        stray_logged: 0,
        opts: opts.clone(),
    };

    for action in &profile.actions {
        analyser.apply(action)?;
    }

    if !analyser.ignore_strays {
        analyser.stray_pass()?;
    }

    analyser.emit()
}

struct Analyser {
    tree_root: PathBuf,
    state: PathStateTree,
    directives: Vec<PathDirective>,
    emitted_kind: EmittedKind,
    use_ldconfig: bool,
    ignore_strays: bool,
    wrappers: Vec<ProfileConfig>,
    stray_total: usize,
    stray_logged: usize,
    opts: AnalyserOptions,
}

impl Analyser {
    /// Filesystem location of an absolute tree path.
    fn fs_path(&self, tree_path: &str) -> PathBuf {
        burrow_common::paths::join_below(Some(&self.tree_root), tree_path)
    }

    fn record_directive(&mut self, kind: PathKind, path: &str, state: PathState) {
        self.directives.push(PathDirective {
            kind,
            path: path.to_string(),
        });
        self.state.set(path, state);
    }

    fn apply(&mut self, action: &ProfileAction) -> BurrowResult<()> {
        match action {
            ProfileAction::EnvironmentType(kind) => self.emitted_kind = *kind,
            ProfileAction::IgnoreStrays => self.ignore_strays = true,
            ProfileAction::OptionalDirectory(_) => {}

            ProfileAction::Ignore(path) => {
                if fsutil::exists(&self.fs_path(path)) {
                    self.state.set(path, PathState::Ignored);
                }
            }
            ProfileAction::IgnoreIfEmpty(path) => {
                self.state.mark(path, |marks| marks.ignore_if_empty = true);
            }
            ProfileAction::IgnoreEmptySubdirs(path) => {
                self.state
                    .mark(path, |marks| marks.ignore_empty_subdirs = true);
            }

            ProfileAction::Overlay(path) => {
                self.require_exists(path)?;
                self.record_directive(
                    PathKind::Overlay,
                    path,
                    PathState::OverlayMounted { upperdir: None },
                );
            }
            ProfileAction::Bind(path) => {
                self.require_exists(path)?;
                self.record_directive(PathKind::Bind, path, PathState::BindMounted);
            }

            ProfileAction::OverlayUnlessEmpty(path) => {
                if self.tree_empty(path)? {
                    self.ignore_existing(path);
                } else {
                    self.record_directive(
                        PathKind::Overlay,
                        path,
                        PathState::OverlayMounted { upperdir: None },
                    );
                }
            }
            ProfileAction::BindUnlessEmpty(path) => {
                if self.tree_empty(path)? {
                    self.ignore_existing(path);
                } else {
                    self.record_directive(PathKind::Bind, path, PathState::BindMounted);
                }
            }

            ProfileAction::MustBeEmpty(path) => {
                if !self.tree_empty(path)? {
                    return Err(BurrowError::Validation {
                        message: format!("Directory {path} should be empty but is not"),
                    });
                }
                self.ignore_existing(path);
            }

            ProfileAction::CheckLdconfig(path) => {
                let path = path.as_deref().unwrap_or("/etc/ld.so.cache");
                if fsutil::exists(&self.fs_path(path)) {
                    self.use_ldconfig = true;
                    self.state.set(path, PathState::Ignored);
                }
            }

            ProfileAction::MountTmpfs(path) => {
                self.record_directive(
                    PathKind::Mount {
                        fstype: "tmpfs".to_string(),
                        device: None,
                        options: None,
                    },
                    path,
                    PathState::SystemMount {
                        fstype: "tmpfs".to_string(),
                        device: None,
                    },
                );
            }

            ProfileAction::CheckBinaries(path) => self.check_binaries(path)?,
        }
        Ok(())
    }

    fn require_exists(&self, path: &str) -> BurrowResult<()> {
        if !fsutil::exists(&self.fs_path(path)) {
            return Err(BurrowError::Validation {
                message: format!("{path} does not exist in the captured tree"),
            });
        }
        Ok(())
    }

    fn tree_empty(&self, path: &str) -> BurrowResult<bool> {
        fsutil::tree_is_empty(&self.fs_path(path))
    }

    fn ignore_existing(&mut self, path: &str) {
        if fsutil::exists(&self.fs_path(path)) {
            self.state.set(path, PathState::Ignored);
        }
    }

    /// For each executable immediate child of the directory, emit a
    /// wrapper profile mapping `<wrapper-dir>/<name>` to `<dir>/<name>`.
    fn check_binaries(&mut self, dir: &str) -> BurrowResult<()> {
        let Some(wrapper_dir) = self.opts.wrapper_directory.clone() else {
            tracing::trace!(dir, "no wrapper directory configured, skipping check-binaries");
            return Ok(());
        };

        let fs_dir = self.fs_path(dir);
        let entries = match fs::read_dir(&fs_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        for name in names {
            let mut profile = ProfileConfig::new(&name);
            profile.wrapper = Some(wrapper_dir.join(&name).to_string_lossy().into_owned());
            profile.command = Some(format!("{}/{name}", dir.trim_end_matches('/')));
            profile.environment = Some(self.opts.environment_name.clone());
            self.wrappers.push(profile);
        }

        Ok(())
    }

    /// Walk the tree depth-first looking for entries no profile action
    /// accounted for. A non-zero stray count means the profile is
    /// incomplete for this tree. An unreadable directory fails the walk
    /// rather than being skipped.
    fn stray_pass(&mut self) -> BurrowResult<()> {
        let root = self.tree_root.clone();
        let inherited = self.state.marks("/").ignore_empty_subdirs;

        let mut visitor = StrayVisitor {
            analyser: &mut *self,
            stack: vec![StrayFrame {
                logical: "/".to_string(),
                strays: 0,
                inherited_ignore: inherited,
            }],
        };
        walk_tree(&root, WalkOptions::default(), &mut visitor)?;

        if self.stray_total > 0 {
            return Err(BurrowError::Validation {
                message: format!(
                    "{} stray file(s) not covered by the profile",
                    self.stray_total
                ),
            });
        }
        Ok(())
    }

    fn count_stray(&mut self, logical: &str) {
        self.stray_total += 1;
        if self.stray_logged < STRAY_LOG_LIMIT {
            tracing::error!(path = logical, "stray file in tree");
            self.stray_logged += 1;
        }
    }

    /// Emit the final config: one environment with one layer describing
    /// the tree, plus any wrapper profiles.
    fn emit(self) -> BurrowResult<Config> {
        let kind = match self.emitted_kind {
            EmittedKind::Layer => LayerKind::Layer {
                directory: self.tree_root.clone(),
            },
            EmittedKind::Image => LayerKind::Image {
                image: self.tree_root.to_string_lossy().into_owned(),
            },
        };

        let mut env = EnvironmentConfig::new(&self.opts.environment_name);
        env.provides = self.opts.provides.clone();
        env.requires = self.opts.requires.clone();
        env.layers.push(LayerConfig {
            kind,
            use_ldconfig: self.use_ldconfig,
            paths: self.directives,
        });

        Ok(Config {
            profiles: self.wrappers,
            environments: vec![env],
            ..Config::default()
        })
    }
}

/// One directory level of the stray scan.
struct StrayFrame {
    logical: String,
    strays: usize,
    inherited_ignore: bool,
}

/// Depth-first scan state: a frame per open directory; counts percolate
/// upward when a directory is left.
struct StrayVisitor<'a> {
    analyser: &'a mut Analyser,
    stack: Vec<StrayFrame>,
}

impl StrayVisitor<'_> {
    fn child_logical(&self, path: &Path) -> String {
        let parent = self.stack.last().expect("root frame always present");
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if parent.logical == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", parent.logical)
        }
    }
}

impl TreeVisitor for StrayVisitor<'_> {
    fn enter(&mut self, path: &Path, file_type: fs::FileType) -> BurrowResult<WalkAction> {
        let logical = self.child_logical(path);

        // Anything a profile action already decided about is settled.
        if self
            .analyser
            .state
            .get(&logical)
            .is_some_and(|state| *state != PathState::Unchanged)
        {
            return Ok(WalkAction::SkipSubtree);
        }

        if file_type.is_dir() {
            let parent_ignore = self.stack.last().expect("root frame").inherited_ignore;
            let marks = self.analyser.state.marks(&logical);
            self.stack.push(StrayFrame {
                logical,
                strays: 0,
                inherited_ignore: parent_ignore || marks.ignore_empty_subdirs,
            });
        } else {
            self.analyser.count_stray(&logical);
            self.stack.last_mut().expect("root frame").strays += 1;
        }

        Ok(WalkAction::Continue)
    }

    fn leave(&mut self, _path: &Path) -> BurrowResult<WalkAction> {
        let frame = self.stack.pop().expect("frame pushed on enter");
        let marks = self.analyser.state.marks(&frame.logical);

        if frame.strays == 0 && (marks.ignore_if_empty || frame.inherited_ignore) {
            self.analyser.state.set(&frame.logical, PathState::Ignored);
        } else {
            self.stack.last_mut().expect("root frame").strays += frame.strays;
        }

        Ok(WalkAction::Continue)
    }
}
