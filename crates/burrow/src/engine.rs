//! The engine: configured environments and profiles for one process.
//!
//! One engine is constructed at program start from the loaded config and
//! threaded through the subcomponents; there is no process-wide mutable
//! state anywhere in the core.

use std::path::{Path, PathBuf};

use burrow_common::{BurrowError, BurrowResult};
use burrow_config::{flatten_one, Config, ProfileConfig};

use crate::assembler::{AssemblyContext, Environment};
use crate::exec::{command_path, CommandSpec};
use crate::fsutil;
use crate::namespace;
use crate::registry::CapabilityRegistry;
use crate::runtime::{select_runtime, ContainerRuntime};

/// Default config file location; `BURROW_CONFIG` overrides it.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/burrow/burrow.conf";

/// A configured wrapper profile.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Profile name, matched against the command's basename.
    pub name: String,
    /// Wrapper path matched against absolute `argv[0]`.
    pub wrapper: Option<String>,
    /// Command exec'd inside the environment.
    pub command: Option<String>,
    /// Environment the profile refers to.
    pub environment: Option<String>,
}

impl Profile {
    fn from_config(config: &ProfileConfig) -> Self {
        Profile {
            name: config.name.clone(),
            wrapper: config.wrapper.clone(),
            command: config.command.clone(),
            environment: config.environment.clone(),
        }
    }
}

/// Configured environments and profiles, plus the external collaborators
/// assembly needs.
pub struct Engine {
    config: Config,
    environments: Vec<Environment>,
    profiles: Vec<Profile>,
    client_path: PathBuf,
    registry: CapabilityRegistry,
    runtime: Box<dyn ContainerRuntime>,
}

impl Engine {
    /// Build an engine from a loaded configuration: flatten every
    /// environment and resolve profile references.
    pub fn configure(config: Config) -> BurrowResult<Self> {
        let mut environments = Vec::new();
        for env_config in &config.environments {
            let flat = flatten_one(&config, &env_config.name)?;
            environments.push(Environment::from_flat(flat));
        }

        let mut profiles = Vec::new();
        for profile_config in &config.profiles {
            if let Some(env_name) = &profile_config.environment {
                if config.environment(env_name).is_none() {
                    return Err(BurrowError::Config {
                        message: format!(
                            "Profile {} references environment \"{env_name}\", which does not exist",
                            profile_config.name
                        ),
                    });
                }
            }
            profiles.push(Profile::from_config(profile_config));
        }

        Ok(Engine {
            client_path: config.client_path.clone(),
            config,
            environments,
            profiles,
            registry: CapabilityRegistry::default(),
            runtime: select_runtime(None)?,
        })
    }

    /// Load the config file and configure an engine from it. `path`
    /// falls back to `$BURROW_CONFIG`, then the system default.
    pub fn load(path: Option<&Path>) -> BurrowResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var("BURROW_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let config = burrow_config::load(&path)?;
        Self::configure(config)
    }

    /// Replace the capability registry, e.g. for tests.
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The capability registry.
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Find an environment by name.
    #[must_use]
    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }

    /// Find an environment by name, mutably.
    pub fn environment_mut(&mut self, name: &str) -> Option<&mut Environment> {
        self.environments.iter_mut().find(|env| env.name == name)
    }

    /// Find the profile for an invoked command.
    ///
    /// Absolute names are first compared against every profile's wrapper
    /// path, then against the command paths; bare names fall back to a
    /// basename match against the profile names.
    #[must_use]
    pub fn find_profile(&self, argv0: &str) -> Option<&Profile> {
        if argv0.starts_with('/') {
            if let Some(profile) = self
                .profiles
                .iter()
                .find(|profile| profile.wrapper.as_deref() == Some(argv0))
            {
                return Some(profile);
            }
            if let Some(profile) = self
                .profiles
                .iter()
                .find(|profile| profile.command.as_deref() == Some(argv0))
            {
                return Some(profile);
            }
        }

        let name = burrow_common::paths::const_basename(argv0)?;
        self.profiles.iter().find(|profile| profile.name == name)
    }

    /// Resolve an environment by name or, failing that, by capability
    /// through the registry. Environments found through the registry are
    /// loaded from their config file and added to the engine.
    pub fn resolve_environment(&mut self, name: &str) -> BurrowResult<String> {
        if self.environment(name).is_some() {
            return Ok(name.to_string());
        }

        let config_path =
            self.registry
                .best_match(name)?
                .ok_or_else(|| BurrowError::EnvironmentNotFound {
                    name: name.to_string(),
                })?;

        tracing::debug!(
            name,
            config = %config_path.display(),
            "Resolving environment through capability registry"
        );

        let loaded = burrow_config::load(&config_path)?;
        let mut matched = None;

        for env_config in &loaded.environments {
            if self.config.environment(&env_config.name).is_some() {
                continue;
            }
            self.config.environments.push(env_config.clone());
        }

        for env_config in &loaded.environments {
            if env_config.name == name
                || env_config.provides.iter().any(|id| provides_satisfies(id, name))
            {
                matched = Some(env_config.name.clone());
                break;
            }
        }

        // Rebuild the flattened environments for the freshly added
        // configs.
        for env_config in &loaded.environments {
            if self.environment(&env_config.name).is_none() {
                let flat = flatten_one(&self.config, &env_config.name)?;
                self.environments.push(Environment::from_flat(flat));
            }
        }

        matched.ok_or_else(|| BurrowError::EnvironmentNotFound {
            name: name.to_string(),
        })
    }

    /// Assembly collaborators for [`Environment::assemble`].
    #[must_use]
    pub fn assembly_context(&self) -> AssemblyContext<'_> {
        AssemblyContext {
            client_path: &self.client_path,
            runtime: self.runtime.as_ref(),
        }
    }

    /// Create the namespace and assemble the named environment into it.
    ///
    /// This mutates the calling process's mount namespace; the caller
    /// either execs the wrapped command or discards the process.
    pub fn setup_environment(&mut self, name: &str, user_namespace: bool) -> BurrowResult<()> {
        let Engine {
            environments,
            client_path,
            runtime,
            ..
        } = self;

        let env = environments
            .iter_mut()
            .find(|env| env.name == name)
            .ok_or_else(|| BurrowError::EnvironmentNotFound {
                name: name.to_string(),
            })?;

        if env.layers().is_empty() {
            tracing::debug!(environment = name, "No layers, using the root context");
            return Ok(());
        }

        if user_namespace {
            namespace::create_user_namespace()?;
        } else {
            namespace::create_mount_namespace()?;
        }
        fsutil::make_fs_private(Path::new("/"))?;

        let ctx = AssemblyContext {
            client_path: client_path.as_path(),
            runtime: runtime.as_ref(),
        };
        env.assemble(&ctx)
    }

    /// Wrapper entry point: resolve `argv0` to a profile, assemble its
    /// environment and exec the profile's command with the original argv.
    /// Only returns on error.
    pub fn run_wrapped(&mut self, argv: &[String], user_namespace: bool) -> BurrowError {
        let argv0 = match argv.first() {
            Some(argv0) => command_path(argv0).to_string_lossy().into_owned(),
            None => {
                return BurrowError::Config {
                    message: "empty argv".to_string(),
                };
            }
        };

        let Some(profile) = self.find_profile(&argv0) else {
            return BurrowError::ProfileNotFound { name: argv0 };
        };
        let profile = profile.clone();

        let Some(command) = profile.command.clone() else {
            return BurrowError::Config {
                message: format!("Profile {} has no command", profile.name),
            };
        };

        let mut spec = CommandSpec::new(
            std::iter::once(command)
                .chain(argv.iter().skip(1).cloned())
                .collect(),
        );

        if let Some(env_name) = &profile.environment {
            if let Err(err) = self.setup_environment(env_name, user_namespace) {
                return err;
            }
            let env = self.environment(env_name).expect("environment exists");
            spec.root_directory = env.root_directory().map(Path::to_path_buf);
            spec.working_directory = env.working_directory().map(Path::to_path_buf);
        }

        tracing::trace!(profile = profile.name, "Environment ready, exec'ing");
        spec.exec()
    }
}

fn provides_satisfies(provided: &str, required: &str) -> bool {
    use burrow_common::Capability;
    match (Capability::parse(provided), Capability::parse(required)) {
        (Some(provided), Some(required)) => provided.satisfies(&required),
        _ => provided == required,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_config::parse_str;

    fn sample_engine() -> Engine {
        let config = parse_str(
            "profile yast2 {\n\
             \twrapper /usr/lib/burrow/bin/yast2\n\
             \tcommand /sbin/yast2\n\
             \tenvironment yast\n\
             }\n\
             environment yast {\n\
             \tdefine-layer {\n\
             \t\tdirectory /opt/layers/yast\n\
             \t\tbind /sbin/yast2\n\
             \t}\n\
             }\n",
        )
        .unwrap();
        Engine::configure(config).unwrap()
    }

    #[test]
    fn profile_lookup_by_basename() {
        let engine = sample_engine();
        let profile = engine.find_profile("/usr/bin/yast2").unwrap();
        assert_eq!(profile.name, "yast2");
        assert_eq!(profile.command.as_deref(), Some("/sbin/yast2"));
    }

    #[test]
    fn profile_lookup_by_wrapper_and_command() {
        let engine = sample_engine();
        assert!(engine.find_profile("/usr/lib/burrow/bin/yast2").is_some());
        assert!(engine.find_profile("/sbin/yast2").is_some());
        assert!(engine.find_profile("/usr/bin/unrelated").is_none());
    }

    #[test]
    fn missing_profile_environment_rejected() {
        let config = parse_str(
            "profile broken {\n\
             \tcommand /bin/true\n\
             \tenvironment ghost\n\
             }\n",
        )
        .unwrap();
        assert!(Engine::configure(config).is_err());
    }

    #[test]
    fn environments_are_flattened_at_configure_time() {
        let config = parse_str(
            "environment base {\n\
             \tdefine-layer {\n\
             \t\tdirectory /base\n\
             \t}\n\
             }\n\
             environment top {\n\
             \tuse-environment base\n\
             \tdefine-layer {\n\
             \t\tdirectory /top\n\
             \t}\n\
             }\n",
        )
        .unwrap();
        let engine = Engine::configure(config).unwrap();
        let env = engine.environment("top").unwrap();
        assert_eq!(env.layers().len(), 2);
        assert!(env.layers().iter().all(|layer| !layer.is_reference()));
    }

    #[test]
    fn resolve_environment_through_registry() {
        let temp = tempfile::tempdir().unwrap();
        let registry_dir = temp.path().join("registry");
        std::fs::create_dir(&registry_dir).unwrap();

        let extra_conf = temp.path().join("extra.conf");
        std::fs::write(
            &extra_conf,
            "environment extra {\n\
             \tprovides extra-tools-2.1\n\
             \tdefine-layer {\n\
             \t\tdirectory /opt/extra\n\
             \t}\n\
             }\n",
        )
        .unwrap();

        let registry = CapabilityRegistry::new(&registry_dir);
        registry
            .register(&["extra-tools-2.1".to_string()], &extra_conf)
            .unwrap();

        let mut engine = sample_engine().with_registry(registry);
        let resolved = engine.resolve_environment("extra-tools-2.0").unwrap();
        assert_eq!(resolved, "extra");
        assert!(engine.environment("extra").is_some());
    }
}
