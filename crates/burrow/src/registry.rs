//! Capability registry.
//!
//! A directory maps capability strings to the config files that provide
//! them, as a farm of symbolic links: each link is named after a
//! capability and points at the config file defining the layer or image
//! that provides it. Resolution scans for links matching the requested
//! name whose version satisfies the requirement and picks the highest.
//!
//! Individual `symlink`/`unlink` calls are not atomic as a group;
//! concurrent writers may race. Documented limitation.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use burrow_common::{BurrowError, BurrowResult, Capability};

/// Default registry location.
pub const DEFAULT_REGISTRY_DIR: &str = "/var/lib/burrow/capability";

/// Symlink farm mapping capability identifiers to config paths.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    dir: PathBuf,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        CapabilityRegistry {
            dir: PathBuf::from(DEFAULT_REGISTRY_DIR),
        }
    }
}

impl CapabilityRegistry {
    /// A registry rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CapabilityRegistry { dir: dir.into() }
    }

    fn link_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    /// Register every capability in `provides` as pointing at
    /// `config_path`.
    ///
    /// A capability already pointing at the same file is left alone; one
    /// pointing elsewhere is a conflict and fails the whole operation
    /// before any link is created.
    pub fn register(&self, provides: &[String], config_path: &Path) -> BurrowResult<()> {
        if provides.is_empty() {
            return Ok(());
        }

        let target = fs::canonicalize(config_path).map_err(|err| BurrowError::Capability {
            message: format!("{} is not a valid path: {err}", config_path.display()),
        })?;

        let mut install = Vec::new();
        for id in provides {
            match fs::read_link(self.link_path(id)) {
                Ok(existing) if existing == target => {
                    tracing::trace!(id, "capability already installed, nothing to activate");
                }
                Ok(existing) => {
                    return Err(BurrowError::Capability {
                        message: format!(
                            "Capability {id} already provided by {}",
                            existing.display()
                        ),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => install.push(id),
                Err(err) => {
                    return Err(BurrowError::Capability {
                        message: format!("readlink {}/{id} failed: {err}", self.dir.display()),
                    });
                }
            }
        }

        for id in install {
            tracing::debug!(id, target = %target.display(), "Installing capability");
            symlink(&target, self.link_path(id)).map_err(|err| BurrowError::Capability {
                message: format!(
                    "Unable to create symbolic link {}/{id}: {err}",
                    self.dir.display()
                ),
            })?;
        }

        Ok(())
    }

    /// Remove the links for `provides` that point at `config_path`;
    /// links pointing elsewhere are left alone.
    pub fn unregister(&self, provides: &[String], config_path: &Path) -> BurrowResult<()> {
        if provides.is_empty() {
            return Ok(());
        }

        let target = fs::canonicalize(config_path).map_err(|err| BurrowError::Capability {
            message: format!("{} is not a valid path: {err}", config_path.display()),
        })?;

        for id in provides {
            match fs::read_link(self.link_path(id)) {
                Ok(existing) if existing == target => {
                    tracing::debug!(id, "Removing capability");
                    fs::remove_file(self.link_path(id)).map_err(|err| {
                        BurrowError::Capability {
                            message: format!(
                                "Unable to remove symbolic link {}/{id}: {err}",
                                self.dir.display()
                            ),
                        }
                    })?;
                }
                Ok(_) => {
                    tracing::trace!(id, "capability refers to a different config file");
                }
                Err(_) => {
                    tracing::trace!(id, "symlink does not exist, nothing to deactivate");
                }
            }
        }

        Ok(())
    }

    /// Remove links whose target no longer exists.
    pub fn gc(&self) -> BurrowResult<()> {
        let mut stale = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            // metadata() follows the symlink; failure means it dangles.
            if fs::metadata(entry.path()).is_err() {
                stale.push(entry.path());
            }
        }

        for path in stale {
            tracing::debug!(path = %path.display(), "Removing stale capability link");
            fs::remove_file(&path).map_err(|err| BurrowError::Capability {
                message: format!(
                    "Unable to remove stale capability link {}: {err}",
                    path.display()
                ),
            })?;
        }

        Ok(())
    }

    /// Resolve a requirement to the config path of the best installed
    /// provider: equal name, version greater than or equal, highest wins.
    pub fn best_match(&self, id: &str) -> BurrowResult<Option<PathBuf>> {
        let requirement = Capability::parse(id).ok_or_else(|| BurrowError::Capability {
            message: format!("Unable to parse capability string \"{id}\""),
        })?;

        let mut best: Option<(Capability, PathBuf)> = None;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            // Silently skip unparseable names in the link farm.
            let Some(candidate) = Capability::parse(&name) else {
                continue;
            };
            if !candidate.satisfies(&requirement) {
                continue;
            }
            if let Some((current, _)) = &best {
                if !candidate.satisfies(current) {
                    continue;
                }
            }

            match fs::canonicalize(entry.path()) {
                Ok(resolved) => best = Some((candidate, resolved)),
                Err(_) => tracing::warn!(link = name, "Dangling capability link"),
            }
        }

        if let Some((capability, path)) = &best {
            tracing::trace!(
                id,
                winner = capability.id,
                path = %path.display(),
                "Resolved capability requirement"
            );
        }

        Ok(best.map(|(_, path)| path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "environment e {\n}\n").unwrap();
        path
    }

    #[test]
    fn register_and_resolve() {
        let temp = tempdir().unwrap();
        let registry = CapabilityRegistry::new(temp.path().join("reg"));
        fs::create_dir(temp.path().join("reg")).unwrap();

        let older = config_file(temp.path(), "older.conf");
        let newer = config_file(temp.path(), "newer.conf");

        registry
            .register(&["python3-devel-3.7.9".into()], &older)
            .unwrap();
        registry
            .register(
                &["python3-devel-3.8.1".into(), "python3-devel-3.8.0rc".into()],
                &newer,
            )
            .unwrap();

        let best = registry.best_match("python3-devel-3.8").unwrap().unwrap();
        assert_eq!(best, fs::canonicalize(&newer).unwrap());

        assert!(registry.best_match("python3-devel-4.0").unwrap().is_none());
        assert!(registry.best_match("ruby-devel-1.0").unwrap().is_none());
    }

    #[test]
    fn conflicting_registration_fails() {
        let temp = tempdir().unwrap();
        let registry = CapabilityRegistry::new(temp.path().join("reg"));
        fs::create_dir(temp.path().join("reg")).unwrap();

        let first = config_file(temp.path(), "first.conf");
        let second = config_file(temp.path(), "second.conf");

        registry.register(&["tool-1.0".into()], &first).unwrap();
        // Same file again is fine.
        registry.register(&["tool-1.0".into()], &first).unwrap();
        // A different file is a conflict.
        assert!(registry.register(&["tool-1.0".into()], &second).is_err());
    }

    #[test]
    fn unregister_and_gc() {
        let temp = tempdir().unwrap();
        let registry = CapabilityRegistry::new(temp.path().join("reg"));
        fs::create_dir(temp.path().join("reg")).unwrap();

        let conf = config_file(temp.path(), "a.conf");
        registry
            .register(&["tool-1.0".into(), "tool-extra-1.0".into()], &conf)
            .unwrap();

        registry.unregister(&["tool-1.0".into()], &conf).unwrap();
        assert!(registry.best_match("tool-1.0").unwrap().is_none());
        assert!(registry.best_match("tool-extra-1.0").unwrap().is_some());

        // Delete the config file; gc removes the now-dangling link.
        fs::remove_file(&conf).unwrap();
        registry.gc().unwrap();
        assert!(fs::read_dir(temp.path().join("reg")).unwrap().next().is_none());
    }
}
