//! The digger: capture a build command's mutations into a new layer.
//!
//! The inverse of assembly. A command runs inside a freshly-assembled
//! namespace where every host mount has been re-overlaid with a dedicated
//! upper directory; on exit, the union of non-empty upper directories
//! becomes a standalone layer with a minimal config next to it.

mod harvest;

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use burrow_common::paths::const_basename;
use burrow_common::{BurrowError, BurrowResult};
use burrow_config::{Config, EnvironmentConfig, LayerConfig};
use tempfile::NamedTempFile;

use crate::assembler::Environment;
use crate::engine::Engine;
use crate::exec::{default_shell, CommandSpec};
use crate::fsutil::{self, OverlayMount};
use crate::namespace;
use crate::pathstate::{snapshot_mounts, PathState, PathStateTree};

/// Filesystem types the capture view bind-mounts from the host instead of
/// overlaying.
const VIRTUAL_FILESYSTEMS: &[&str] = &[
    "bpf",
    "cgroup",
    "cgroup2",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "hugetlbfs",
    "mqueue",
    "proc",
    "pstore",
    "securityfs",
    "sysfs",
    "tmpfs",
];

/// Filesystem types overlayfs cannot use as a lower layer.
const NO_OVERLAY_FILESYSTEMS: &[&str] = &["fat", "vfat", "nfs"];

/// Options of a digger session.
#[derive(Debug, Clone, Default)]
pub struct DiggerOptions {
    /// Where the captured layer is assembled.
    pub overlay_root: PathBuf,
    /// Stack on the layers of this environment (resolved by name or
    /// capability).
    pub base_environment: Option<String>,
    /// Name of the emitted environment; defaults to the overlay root's
    /// basename.
    pub environment_name: Option<String>,
    /// Use a plain mount namespace instead of a user namespace.
    pub privileged_namespace: bool,
    /// Remove an existing overlay root first.
    pub clean: bool,
    /// Mount this directory at `/build` and start the command there.
    pub build_directory: Option<PathBuf>,
    /// Mount this script at `/build.sh` and run it as the command.
    pub build_script: Option<PathBuf>,
    /// Extra filesystem types treated like the built-in virtual ones.
    pub bind_mount_types: Vec<String>,
}

/// A digger session: the capture environment plus the bookkeeping needed
/// for harvest.
struct DiggerSession {
    overlay_root: PathBuf,
    env: Environment,
    provides_file: Option<NamedTempFile>,
}

/// Run a digger session end to end. Returns the overlay root holding the
/// captured `tree/` and its `.digger.conf`.
pub fn dig(engine: &mut Engine, opts: &DiggerOptions, command: &[String]) -> BurrowResult<PathBuf> {
    let overlay_root = opts.overlay_root.clone();
    if overlay_root.as_os_str().is_empty() {
        return Err(BurrowError::Config {
            message: "Please specify a root directory via --overlay-directory".to_string(),
        });
    }

    prepare_overlay_root(&overlay_root, opts.clean)?;

    if opts.privileged_namespace {
        namespace::create_mount_namespace()?;
    } else {
        namespace::create_user_namespace()?;
    }
    fsutil::make_fs_private(Path::new("/"))?;

    let env_name = match &opts.environment_name {
        Some(name) => name.clone(),
        None => const_basename(&overlay_root.to_string_lossy())
            .unwrap_or("layer")
            .to_string(),
    };

    let env = match &opts.base_environment {
        Some(base) => {
            let base_name = engine.resolve_environment(base)?;
            let base_env = engine
                .environment(&base_name)
                .expect("resolved environment exists");
            let mut env = Environment::derived(&env_name, base_env);
            env.requires.push(base.clone());
            env
        }
        None => Environment::empty(&env_name),
    };

    let mut session = DiggerSession {
        overlay_root: overlay_root.clone(),
        env,
        provides_file: None,
    };

    session.smoke_and_mirrors(engine, opts)?;

    let mut argv: Vec<String> = command.to_vec();

    if let Some(build_dir) = &opts.build_directory {
        tracing::debug!(dir = %build_dir.display(), "Binding build directory at /build");
        session.bind_into_view(build_dir, "/build")?;
        session.env.set_working_directory("/build");
    }

    if let Some(build_script) = &opts.build_script {
        tracing::debug!(script = %build_script.display(), "Binding build script at /build.sh");
        session.bind_into_view(build_script, "/build.sh")?;
        argv.insert(0, "/build.sh".to_string());
    }

    session.mount_provides_file()?;

    if argv.is_empty() {
        argv = default_shell();
    }

    session.build(&argv)?;
    session.harvest()?;

    tracing::debug!(
        captured_bytes = fsutil::tree_size(&overlay_root.join("tree")),
        snapshot = %serde_json::to_string(&session.env.snapshot())
            .unwrap_or_else(|_| "<unserializable>".to_string()),
        "Captured environment"
    );

    session.write_config()?;

    Ok(overlay_root)
}

fn prepare_overlay_root(overlay_root: &Path, clean: bool) -> BurrowResult<()> {
    if fsutil::is_dir(overlay_root) {
        if !clean {
            return Err(BurrowError::Config {
                message: format!(
                    "Directory {} already exists. Please remove, or invoke me with --clean.",
                    overlay_root.display()
                ),
            });
        }
        fsutil::remove_recursively(overlay_root)?;
    }

    fsutil::makedirs(overlay_root, 0o755)
}

impl DiggerSession {
    fn working_dir(&self, name: &str) -> BurrowResult<PathBuf> {
        let dir = self.overlay_root.join(name);
        fsutil::makedirs(&dir, 0o755)?;
        Ok(dir)
    }

    /// Build the transparent capture view: bind the base at `lower`,
    /// overlay it writable into `root`, apply the base environment's
    /// directives, then re-overlay every live host mount.
    fn smoke_and_mirrors(&mut self, engine: &mut Engine, opts: &DiggerOptions) -> BurrowResult<()> {
        // An image base is materialised up front; its root becomes the
        // thing we overlay instead of the host's /.
        let base_image: Option<String> = match self.env.layers().first().map(|layer| &layer.kind) {
            Some(burrow_config::LayerKind::Image { image }) => Some(image.clone()),
            _ => None,
        };
        let image_root = match base_image {
            Some(image) => {
                let ctx = engine.assembly_context();
                let local = crate::runtime::local_container_name(&image);
                if !ctx.runtime.container_exists(&local)? {
                    ctx.runtime.container_start(&image, &local)?;
                }
                let root = ctx.runtime.container_mount(&local)?;
                self.env.set_orig_root_directory(&root);
                Some(root)
            }
            None => None,
        };

        let mnt_tree = snapshot_mounts(None, None)?;

        let lower = self.working_dir("lower")?;
        let tree = self.working_dir("tree")?;
        let work = self.working_dir("work")?;
        let root = self.working_dir("root")?;

        // User namespaces are picky about overlaying / directly; binding
        // the base first is the form the kernel accepts.
        let base: &Path = image_root.as_deref().unwrap_or(Path::new("/"));
        fsutil::mount_bind(base, &lower, true)?;

        OverlayMount::writable(&lower, &tree, &work, &root).mount()?;
        tracing::debug!(root = %root.display(), "Capture overlay mounted");
        fsutil::lazy_umount(&lower)?;

        // root becomes the image root of this environment.
        self.env.set_root_directory(&root);

        let ctx = engine.assembly_context();
        self.env.assemble(&ctx)?;

        self.remount_filesystems(&mnt_tree, opts)
    }

    /// Walk the original mount snapshot and re-establish each live mount
    /// inside the capture view, either as a host bind or as a dedicated
    /// capture overlay.
    fn remount_filesystems(
        &mut self,
        mnt_tree: &PathStateTree,
        opts: &DiggerOptions,
    ) -> BurrowResult<()> {
        let is_image_based = self
            .env
            .layers()
            .first()
            .is_some_and(LayerConfig::is_image);
        let overlay_root = self.overlay_root.clone();
        let mut mount_index = 0u32;

        let mut walk = mnt_tree.walk();
        while let Some((mount_point, state)) = walk.next() {
            let PathState::SystemMount { fstype, device } = state else {
                continue;
            };

            if mount_point == "/" {
                tracing::trace!("Skipping root directory");
                continue;
            }

            let is_virtual = VIRTUAL_FILESYSTEMS.contains(&fstype.as_str())
                || opts.bind_mount_types.iter().any(|t| t == fstype);

            if is_virtual {
                self.rebind_filesystem(&mount_point, fstype)?;
                walk.skip_children();
            } else if NO_OVERLAY_FILESYSTEMS.contains(&fstype.as_str()) {
                tracing::trace!(
                    mount_point,
                    fstype,
                    "file system type does not support overlays, ignoring"
                );
            } else if burrow_common::paths::is_path_prefix(
                &mount_point,
                &overlay_root.to_string_lossy(),
            ) {
                tracing::trace!(
                    mount_point,
                    "parent of our overlay directory, ignoring to avoid recursion"
                );
            } else if !fsutil::accessible(Path::new(&mount_point)) {
                tracing::trace!(mount_point, fstype, "inaccessible to this user, ignoring");
            } else if is_image_based {
                tracing::trace!(mount_point, fstype, ?device, "image based, ignoring system mount");
            } else {
                tracing::trace!(mount_point, fstype, ?device, "overlaying live mount");

                let subtree = overlay_root.join(format!("subtree.{mount_index}"));
                mount_index += 1;
                let upper = subtree.join("tree");
                let work = subtree.join("work");
                fsutil::makedirs(&upper, 0o755)?;
                fsutil::makedirs(&work, 0o755)?;

                let dest =
                    burrow_common::paths::join_below(self.env.root_directory(), &mount_point);

                OverlayMount::writable(Path::new(&mount_point), &upper, &work, &dest).mount()?;
                self.env.tree_state.set(
                    &mount_point,
                    PathState::OverlayMounted {
                        upperdir: Some(upper),
                    },
                );
            }
        }

        Ok(())
    }

    fn rebind_filesystem(&mut self, mount_point: &str, fstype: &str) -> BurrowResult<()> {
        if !fsutil::accessible(Path::new(mount_point)) {
            tracing::trace!(mount_point, fstype, "inaccessible to this user, ignoring");
            return Ok(());
        }

        tracing::trace!(mount_point, fstype, "bind mounting host view");
        self.bind_into_view(Path::new(mount_point), mount_point)
    }

    /// Bind a host path to the corresponding path inside the capture
    /// view, recording it in the state tree.
    fn bind_into_view(&mut self, source: &Path, view_path: &str) -> BurrowResult<()> {
        let dest = burrow_common::paths::join_below(self.env.root_directory(), view_path);
        fsutil::mount_bind(source, &dest, true)?;
        self.env.tree_state.set(view_path, PathState::BindMounted);
        Ok(())
    }

    /// Export an empty `/provides` file into the view; the build script
    /// writes capability identifiers into it, one per line.
    fn mount_provides_file(&mut self) -> BurrowResult<()> {
        let temp = NamedTempFile::new()?;
        self.bind_into_view(temp.path(), "/provides")?;
        self.provides_file = Some(temp);
        Ok(())
    }

    /// Run the build command inside the view.
    fn build(&mut self, argv: &[String]) -> BurrowResult<()> {
        let mut spec = CommandSpec::new(argv.to_vec());
        spec.root_directory = self.env.root_directory().map(Path::to_path_buf);
        spec.working_directory = self.env.working_directory().map(Path::to_path_buf);
        spec.env
            .push(("PS1".to_string(), "(burrow) # ".to_string()));

        spec.run_checked()?;
        tracing::debug!(command = %argv[0], "Command completed");
        Ok(())
    }

    fn harvest(&mut self) -> BurrowResult<()> {
        harvest::combine_and_clean(&self.overlay_root, &mut self.env)?;
        self.update_provides()
    }

    /// Collect the capability identifiers the build wrote to `/provides`.
    fn update_provides(&mut self) -> BurrowResult<()> {
        let Some(temp) = self.provides_file.take() else {
            return Ok(());
        };

        let mut file = temp.reopen()?;
        file.rewind()?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!(capability = line, "Layer provides");
            self.env.provides.push(line.to_string());
        }

        Ok(())
    }

    /// Emit the minimal config describing the captured layer.
    fn write_config(&self) -> BurrowResult<()> {
        let mut env_config = EnvironmentConfig::new(&self.env.name);
        env_config.provides = self.env.provides.clone();
        env_config.requires = self.env.requires.clone();
        env_config.layers.push(LayerConfig::for_directory("tree"));

        let config = Config {
            environments: vec![env_config],
            ..Config::default()
        };

        config.write(&self.overlay_root.join(".digger.conf"))
    }
}
