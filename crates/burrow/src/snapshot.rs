//! Serializable environment state.
//!
//! A snapshot captures what assembly did: the resolved root, the
//! capability metadata, and one record per changed path. It is what the
//! diagnostics surface prints and what a supervising process can persist
//! next to a namespace fd.

use std::fs;
use std::path::{Path, PathBuf};

use burrow_common::BurrowResult;
use serde::{Deserialize, Serialize};

use crate::assembler::{Environment, EnvironmentState};
use crate::pathstate::PathState;

/// One changed path and its disposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    /// Canonical absolute path inside the view.
    pub path: String,
    /// What assembly did there.
    pub state: PathState,
}

/// Snapshot of an environment after assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Environment name.
    pub name: String,
    /// Lifecycle state at snapshot time.
    pub state: EnvironmentState,
    /// Physical root of the view, when one was fixed.
    pub root_directory: Option<PathBuf>,
    /// Capabilities provided.
    pub provides: Vec<String>,
    /// Capabilities required.
    pub requires: Vec<String>,
    /// Every changed path, in tree pre-order.
    pub mounts: Vec<MountRecord>,
}

impl EnvironmentSnapshot {
    /// Persist as JSON.
    pub fn save(&self, path: &Path) -> BurrowResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| burrow_common::BurrowError::Serialization(err.to_string()))?;
        fs::write(path, json)?;
        tracing::debug!(name = self.name, path = %path.display(), "Saved environment snapshot");
        Ok(())
    }

    /// Load a persisted snapshot.
    pub fn load(path: &Path) -> BurrowResult<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|err| burrow_common::BurrowError::Serialization(err.to_string()))
    }
}

impl Environment {
    /// Snapshot the current state of this environment.
    #[must_use]
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            name: self.name.clone(),
            state: self.state(),
            root_directory: self.root_directory().map(Path::to_path_buf),
            provides: self.provides.clone(),
            requires: self.requires.clone(),
            mounts: self
                .tree_state
                .walk()
                .map(|(path, state)| MountRecord {
                    path,
                    state: state.clone(),
                })
                .collect(),
        }
    }
}
