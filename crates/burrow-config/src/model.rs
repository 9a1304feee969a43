//! In-memory configuration model.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default location of the wrapper client binary, bound into layers by
/// `wormhole` path directives.
pub const DEFAULT_CLIENT_PATH: &str = "/usr/bin/burrow";

/// What a path directive does during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathKind {
    /// Make the path invisible. Parsed but not implemented.
    Hide,
    /// Bind-mount the layer's copy of the path onto the view.
    Bind,
    /// Overlay the destination, then bind each immediate child of the
    /// layer's copy individually (children stay individually writable).
    BindChildren,
    /// Overlay the layer's copy as an additional read-only lower layer.
    Overlay,
    /// Like `Overlay`, applied per immediate child directory.
    OverlayChildren,
    /// Mount a fresh virtual filesystem.
    Mount {
        /// Filesystem type, e.g. `tmpfs` or `proc`.
        fstype: String,
        /// Source device; most virtual filesystems take none.
        device: Option<String>,
        /// Mount data string.
        options: Option<String>,
    },
    /// Bind the wrapper client executable onto the path, so a command run
    /// inside the layer re-enters a different environment.
    Wormhole,
}

impl PathKind {
    /// Config keyword for this kind.
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            PathKind::Hide => "hide",
            PathKind::Bind => "bind",
            PathKind::BindChildren => "bind-children",
            PathKind::Overlay => "overlay",
            PathKind::OverlayChildren => "overlay-children",
            PathKind::Mount { .. } => "mount",
            PathKind::Wormhole => "wormhole",
        }
    }
}

/// One path directive within a layer. Order between directives is
/// significant; later directives layer on earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathDirective {
    /// What to do at the path.
    pub kind: PathKind,
    /// Absolute path inside the assembled view; may be a glob pattern.
    pub path: String,
}

/// Where a layer's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    /// A directory tree on the host under which relative path directives
    /// resolve.
    Layer {
        /// The layer's source directory.
        directory: PathBuf,
    },
    /// An OCI image resolved through the container-runtime facade. Must be
    /// the bottom of the stack.
    Image {
        /// Image reference, e.g. `registry.opensuse.org/.../leap:15.3`.
        image: String,
    },
    /// Splice in the layers of another environment at this position.
    /// Resolved away at configure time.
    Reference {
        /// Name of the referenced environment.
        environment: String,
    },
}

/// A configured layer: a content source plus ordered path directives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Content source.
    pub kind: LayerKind,
    /// Regenerate and bind an `ld.so.cache` for this layer after its
    /// directives are applied.
    pub use_ldconfig: bool,
    /// Ordered path directives.
    pub paths: Vec<PathDirective>,
}

impl LayerConfig {
    /// A plain directory layer with no directives.
    #[must_use]
    pub fn for_directory(directory: impl Into<PathBuf>) -> Self {
        LayerConfig {
            kind: LayerKind::Layer {
                directory: directory.into(),
            },
            use_ldconfig: false,
            paths: Vec::new(),
        }
    }

    /// True for `Reference` layers.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, LayerKind::Reference { .. })
    }

    /// True for `Image` layers.
    #[must_use]
    pub fn is_image(&self) -> bool {
        matches!(self.kind, LayerKind::Image { .. })
    }
}

/// A named environment: an ordered layer stack plus capability metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment name.
    pub name: String,
    /// Capabilities this environment provides.
    pub provides: Vec<String>,
    /// Capabilities this environment requires.
    pub requires: Vec<String>,
    /// Declared layers, bottom first. May contain `Reference` entries
    /// until flattening.
    pub layers: Vec<LayerConfig>,
}

impl EnvironmentConfig {
    /// An empty environment with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        EnvironmentConfig {
            name: name.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            layers: Vec::new(),
        }
    }
}

/// A wrapper profile: maps an invoked command to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Profile name, matched against the basename of `argv[0]`.
    pub name: String,
    /// Path of the wrapper symlink, matched against absolute `argv[0]`.
    pub wrapper: Option<String>,
    /// Command to exec inside the assembled environment.
    pub command: Option<String>,
    /// Environment the command runs in.
    pub environment: Option<String>,
}

impl ProfileConfig {
    /// An empty profile with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ProfileConfig {
            name: name.into(),
            wrapper: None,
            command: None,
            environment: None,
        }
    }
}

/// A fully loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Pathname of the wrapper client executable.
    pub client_path: PathBuf,
    /// Declared profiles, in declaration order.
    pub profiles: Vec<ProfileConfig>,
    /// Declared environments, in declaration order.
    pub environments: Vec<EnvironmentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_path: PathBuf::from(DEFAULT_CLIENT_PATH),
            profiles: Vec::new(),
            environments: Vec::new(),
        }
    }
}

impl Config {
    /// Find an environment by name.
    #[must_use]
    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|env| env.name == name)
    }

    /// Find a profile by name.
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|profile| profile.name == name)
    }
}
