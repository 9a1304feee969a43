//! Source/destination prefix handling during layer setup.

use std::path::{Path, PathBuf};

use burrow_common::paths::{join_below, strip_path_prefix};

/// The two prefixes a layer's directives resolve against: sources inside
/// the layer's directory (or the live host view for image layers),
/// destinations inside the environment root (or the live `/`).
#[derive(Debug, Clone)]
pub struct Scaffold {
    source_prefix: Option<PathBuf>,
    dest_prefix: Option<PathBuf>,
}

impl Scaffold {
    /// Build a scaffold from the optional prefixes.
    #[must_use]
    pub fn new(source_prefix: Option<PathBuf>, dest_prefix: Option<PathBuf>) -> Self {
        Scaffold {
            source_prefix,
            dest_prefix,
        }
    }

    /// Where the layer's copy of an absolute path lives.
    #[must_use]
    pub fn source_path(&self, abs_path: &str) -> PathBuf {
        join_below(self.source_prefix.as_deref(), abs_path)
    }

    /// Invert [`source_path`](Self::source_path): recover the absolute
    /// view path from an expanded source path. `None` when the path does
    /// not lie strictly below the source prefix.
    #[must_use]
    pub fn strip_source(&self, source: &Path) -> Option<String> {
        let source = source.to_str()?;
        match &self.source_prefix {
            None => Some(source.to_string()),
            Some(prefix) => {
                let stripped = strip_path_prefix(source, prefix.to_str()?)?;
                (stripped != "/").then(|| stripped.to_string())
            }
        }
    }

    /// Where an absolute view path lands in the namespace being built.
    #[must_use]
    pub fn dest_path(&self, abs_path: &str) -> PathBuf {
        join_below(self.dest_prefix.as_deref(), abs_path)
    }
}
