//! Container runtime facade.
//!
//! Image layers are materialised by an external container runtime; the
//! core only ever sees three operations and the returned root path.

pub mod podman;

use std::path::PathBuf;

use burrow_common::{BurrowError, BurrowResult};

pub use podman::PodmanRuntime;

/// The three operations the core needs from a container runtime.
pub trait ContainerRuntime {
    /// Does a container with this local name exist?
    fn container_exists(&self, local_name: &str) -> BurrowResult<bool>;

    /// Create a container for the image under the local name.
    fn container_start(&self, image_ref: &str, local_name: &str) -> BurrowResult<()>;

    /// Mount the container's filesystem, returning its root directory.
    /// The path stays valid until the container is unmounted.
    fn container_mount(&self, local_name: &str) -> BurrowResult<PathBuf>;
}

/// Select a runtime backend by name; `None` and `"default"` both pick
/// podman.
pub fn select_runtime(name: Option<&str>) -> BurrowResult<Box<dyn ContainerRuntime>> {
    match name {
        None | Some("default" | "podman") => Ok(Box::new(PodmanRuntime)),
        Some(other) => Err(BurrowError::Runtime {
            message: format!("Unknown container runtime \"{other}\""),
        }),
    }
}

/// Derive the local container name from an image reference: the tag is
/// truncated at `:`, path separators become `_`, and everything gets a
/// `burrow_` prefix.
#[must_use]
pub fn local_container_name(image_ref: &str) -> String {
    let without_tag = image_ref.split(':').next().unwrap_or(image_ref);
    format!("burrow_{}", without_tag.replace('/', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_name_derivation() {
        assert_eq!(
            local_container_name("registry.opensuse.org/opensuse/leap:15.3"),
            "burrow_registry.opensuse.org_opensuse_leap"
        );
        assert_eq!(local_container_name("leap"), "burrow_leap");
    }

    #[test]
    fn unknown_runtime_rejected() {
        assert!(select_runtime(Some("rocket")).is_err());
        assert!(select_runtime(None).is_ok());
    }
}
