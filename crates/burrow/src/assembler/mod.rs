//! Environment assembly.
//!
//! Given a flattened environment, mutate the current mount namespace so
//! the process sees the composed view, recording every mutation in the
//! environment's path-state tree. The caller owns the namespace: it must
//! have created one (plain or user) and made `/` private before calling
//! [`Environment::assemble`], and it performs the chroot itself when an
//! image layer fixed a root directory.

mod directives;
mod ldconfig;
mod scaffold;

use std::path::{Path, PathBuf};

use burrow_common::{BurrowError, BurrowResult};
use burrow_config::{FlatEnvironment, LayerConfig, LayerKind};
use serde::{Deserialize, Serialize};

use crate::pathstate::PathStateTree;
use crate::runtime::{local_container_name, ContainerRuntime};

pub use scaffold::Scaffold;

/// Assembly lifecycle of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentState {
    /// Configured but never assembled.
    Configured,
    /// Assembly in progress.
    Assembling,
    /// The namespace holds the composed view.
    Ready,
    /// Assembly failed; terminal within this process.
    Failed,
}

/// External collaborators the assembler needs.
pub struct AssemblyContext<'a> {
    /// The wrapper client executable, bound by `wormhole` directives.
    pub client_path: &'a Path,
    /// Container runtime used to materialise image layers.
    pub runtime: &'a dyn ContainerRuntime,
}

/// A named environment: flattened layer stack, capability metadata, and
/// the record of what assembly did to the namespace.
pub struct Environment {
    /// Environment name.
    pub name: String,
    /// Capabilities provided.
    pub provides: Vec<String>,
    /// Capabilities required.
    pub requires: Vec<String>,
    layers: Vec<LayerConfig>,
    state: EnvironmentState,
    /// Record of every mutation assembly performed.
    pub tree_state: PathStateTree,
    root_directory: Option<PathBuf>,
    orig_root_directory: Option<PathBuf>,
    working_directory: Option<PathBuf>,
}

impl Environment {
    /// An environment with no layers.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Environment {
            name: name.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            layers: Vec::new(),
            state: EnvironmentState::Configured,
            tree_state: PathStateTree::new(),
            root_directory: None,
            orig_root_directory: None,
            working_directory: None,
        }
    }

    /// Build from a flattened configuration.
    #[must_use]
    pub fn from_flat(flat: FlatEnvironment) -> Self {
        let mut env = Environment::empty(flat.name);
        env.provides = flat.provides;
        env.requires = flat.requires;
        env.layers = flat.layers;
        env
    }

    /// A new environment that stacks on the layers of `base`, as the
    /// digger does for `--base-environment`.
    #[must_use]
    pub fn derived(name: impl Into<String>, base: &Environment) -> Self {
        let mut env = Environment::empty(name);
        env.layers = base.layers.clone();
        env
    }

    /// The flattened layer stack, bottom first.
    #[must_use]
    pub fn layers(&self) -> &[LayerConfig] {
        &self.layers
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    /// The physical root to chroot into, set when an image layer (or the
    /// digger) fixed one.
    #[must_use]
    pub fn root_directory(&self) -> Option<&Path> {
        self.root_directory.as_deref()
    }

    /// Fix the physical root of the view, stashing any previous value.
    pub fn set_root_directory(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        if let Some(previous) = self.root_directory.replace(root.clone()) {
            self.orig_root_directory = Some(previous);
        }
        self.tree_state.set_root_directory(root);
    }

    /// The root the view was derived from, when
    /// [`set_root_directory`](Self::set_root_directory) replaced one.
    #[must_use]
    pub fn orig_root_directory(&self) -> Option<&Path> {
        self.orig_root_directory.as_deref()
    }

    /// Record where the original root came from without changing the
    /// current root. The digger uses this when it pre-materialises an
    /// image base itself.
    pub fn set_orig_root_directory(&mut self, root: impl Into<PathBuf>) {
        self.orig_root_directory = Some(root.into());
    }

    /// Directory the wrapped command starts in.
    #[must_use]
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Set the command's working directory.
    pub fn set_working_directory(&mut self, dir: impl Into<PathBuf>) {
        self.working_directory = Some(dir.into());
    }

    /// Assemble the environment into the current mount namespace.
    ///
    /// Pre-conditions: the caller created a mount namespace and made `/`
    /// private. Any mount failure marks the environment failed; partial
    /// mounts are not unwound, the caller discards the namespace instead.
    pub fn assemble(&mut self, ctx: &AssemblyContext<'_>) -> BurrowResult<()> {
        if self.state == EnvironmentState::Failed {
            return Err(BurrowError::EnvironmentFailed {
                name: self.name.clone(),
            });
        }

        self.state = EnvironmentState::Assembling;
        self.tree_state = PathStateTree::new();
        if let Some(root) = &self.root_directory {
            self.tree_state.set_root_directory(root);
        }

        match self.assemble_layers(ctx) {
            Ok(()) => {
                self.state = EnvironmentState::Ready;
                tracing::debug!(environment = self.name, "Environment assembled");
                Ok(())
            }
            Err(err) => {
                self.state = EnvironmentState::Failed;
                Err(err)
            }
        }
    }

    fn assemble_layers(&mut self, ctx: &AssemblyContext<'_>) -> BurrowResult<()> {
        for index in 0..self.layers.len() {
            let layer = self.layers[index].clone();
            if index > 0 && layer.is_image() {
                return Err(BurrowError::Config {
                    message: format!(
                        "environment {} specifies an image container, but it's not the bottom most layer",
                        self.name
                    ),
                });
            }
            self.layer_setup(&layer, ctx)?;
        }
        Ok(())
    }

    fn layer_setup(&mut self, layer: &LayerConfig, ctx: &AssemblyContext<'_>) -> BurrowResult<()> {
        let source_root = match &layer.kind {
            LayerKind::Layer { directory } => directory.clone(),
            LayerKind::Image { image } => self.image_root(image, ctx)?,
            LayerKind::Reference { environment } => {
                return Err(BurrowError::Internal {
                    message: format!(
                        "reference to \"{environment}\" survived flattening in environment {}",
                        self.name
                    ),
                });
            }
        };

        // Image layers apply their directives inside the image root; the
        // source prefix stays empty so directive sources resolve against
        // the live host view.
        let scaffold = if layer.is_image() {
            Scaffold::new(None, self.root_directory.clone())
        } else {
            Scaffold::new(Some(source_root.clone()), self.root_directory.clone())
        };

        for directive in &layer.paths {
            tracing::debug!(
                environment = self.name,
                kind = directive.kind.keyword(),
                path = directive.path,
                "Applying path directive"
            );
            directives::apply(self, directive, &scaffold, ctx)?;
        }

        if layer.use_ldconfig {
            ldconfig::apply(self, &source_root, &scaffold)?;
        }

        Ok(())
    }

    /// Resolve an image layer to a mounted root directory and fix it as
    /// the environment root.
    fn image_root(&mut self, image: &str, ctx: &AssemblyContext<'_>) -> BurrowResult<PathBuf> {
        // The digger materialises the capture view itself and records the
        // original image root; the image is already in place then.
        if self.root_directory.is_some() {
            if let Some(orig) = &self.orig_root_directory {
                return Ok(orig.clone());
            }
            return Err(BurrowError::Config {
                message: format!(
                    "Unable to set up image layer: environment {} root directory already set",
                    self.name
                ),
            });
        }

        let local_name = local_container_name(image);
        if !ctx.runtime.container_exists(&local_name)? {
            ctx.runtime.container_start(image, &local_name)?;
        }
        let root = ctx.runtime.container_mount(&local_name)?;

        tracing::debug!(
            environment = self.name,
            image,
            root = %root.display(),
            "Mounted container image"
        );

        self.root_directory = Some(root.clone());
        self.tree_state.set_root_directory(&root);
        Ok(root)
    }
}
