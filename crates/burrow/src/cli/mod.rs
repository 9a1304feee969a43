//! CLI of the `burrow` wrapper binary.
//!
//! Invoked under its own name, `burrow` offers subcommands; invoked
//! through a symlink (the usual deployment), it behaves as the wrapper
//! for that command: resolve a profile, assemble the environment, exec
//! the profile's command with the original argv.

use std::path::PathBuf;

use burrow_common::BurrowResult;
use clap::{Parser, Subcommand};

use crate::engine::Engine;
use crate::registry::CapabilityRegistry;

/// Burrow - layered mount-namespace environments
#[derive(Parser)]
#[command(name = "burrow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "BURROW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase debugging verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub debug: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble a profile's environment and run its command
    Run {
        /// Profile name or wrapper path
        profile: String,

        /// Use a plain mount namespace instead of a user namespace
        #[arg(long)]
        privileged_namespace: bool,

        /// Arguments passed to the wrapped command
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Show the environments and profiles of the loaded configuration
    Show,

    /// Manage the capability registry
    Capability {
        #[command(subcommand)]
        action: CapabilityAction,
    },
}

#[derive(Subcommand)]
pub enum CapabilityAction {
    /// Register the capabilities a config file provides
    Activate {
        /// Configuration file to register
        config_file: PathBuf,
    },

    /// Unregister the capabilities a config file provides
    Deactivate {
        /// Configuration file to unregister
        config_file: PathBuf,
    },

    /// Remove stale capability links
    Prune,
}

impl Cli {
    /// Execute the selected subcommand.
    pub fn execute(self) -> BurrowResult<()> {
        match self.command {
            Commands::Run {
                profile,
                privileged_namespace,
                args,
            } => {
                let mut engine = Engine::load(self.config.as_deref())?;
                let mut argv = vec![profile];
                argv.extend(args);
                // Only returns on error.
                Err(engine.run_wrapped(&argv, !privileged_namespace))
            }

            Commands::Show => {
                let engine = Engine::load(self.config.as_deref())?;
                print!("{}", engine.config().to_config_string());
                Ok(())
            }

            Commands::Capability { action } => run_capability(action),
        }
    }
}

fn run_capability(action: CapabilityAction) -> BurrowResult<()> {
    let registry = CapabilityRegistry::default();

    match action {
        CapabilityAction::Activate { config_file } => {
            let provides = collect_provides(&config_file)?;
            if provides.is_empty() {
                tracing::warn!(
                    config = %config_file.display(),
                    "does not provide any capabilities, nothing to be done"
                );
                return Ok(());
            }
            registry.register(&provides, &config_file)
        }

        CapabilityAction::Deactivate { config_file } => {
            let provides = collect_provides(&config_file)?;
            if provides.is_empty() {
                tracing::warn!(
                    config = %config_file.display(),
                    "does not provide any capabilities, nothing to be done"
                );
                return Ok(());
            }
            registry.unregister(&provides, &config_file)
        }

        CapabilityAction::Prune => registry.gc(),
    }
}

/// Every capability any environment in the file provides.
fn collect_provides(config_file: &std::path::Path) -> BurrowResult<Vec<String>> {
    let config = burrow_config::load(config_file)?;
    Ok(config
        .environments
        .iter()
        .flat_map(|env| env.provides.iter().cloned())
        .collect())
}
