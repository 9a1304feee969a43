//! Digger entry point: wrap a build command with a capture overlay and
//! turn its filesystem mutations into a standalone layer.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use burrow::digger::{dig, DiggerOptions};
use burrow::Engine;

/// Burrow digger - capture a build into a new layer
#[derive(Parser)]
#[command(name = "burrow-digger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    /// Increase debugging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Use this environment as the base for the capture
    #[arg(long, value_name = "NAME")]
    base_environment: Option<String>,

    /// Output directory for the captured layer
    #[arg(long, visible_alias = "overlay-root", value_name = "PATH")]
    overlay_directory: PathBuf,

    /// Name of the emitted environment
    #[arg(long, value_name = "NAME")]
    environment_name: Option<String>,

    /// Create the capture in a plain namespace rather than a user
    /// namespace
    #[arg(long)]
    privileged_namespace: bool,

    /// Clean up the output directory first
    #[arg(long)]
    clean: bool,

    /// Mount this directory as /build and start the command there
    #[arg(long, value_name = "PATH")]
    build_directory: Option<PathBuf>,

    /// Mount this script as /build.sh and run it as the command
    #[arg(long, value_name = "PATH")]
    build_script: Option<PathBuf>,

    /// Treat this filesystem type like the built-in virtual ones
    /// (repeatable)
    #[arg(long, value_name = "FSTYPE")]
    bind_mount_type: Vec<String>,

    /// Command to run inside the capture (defaults to a shell)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default = match cli.debug {
        0 => "burrow=info",
        1 => "burrow=debug",
        _ => "burrow=trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(default.parse()?))
        .init();

    let mut engine = Engine::load(cli.config.as_deref())?;

    let opts = DiggerOptions {
        overlay_root: cli.overlay_directory,
        base_environment: cli.base_environment,
        environment_name: cli.environment_name,
        privileged_namespace: cli.privileged_namespace,
        clean: cli.clean,
        build_directory: cli.build_directory,
        build_script: cli.build_script,
        bind_mount_types: cli.bind_mount_type,
    };

    match dig(&mut engine, &opts, &cli.command) {
        Ok(overlay_root) => {
            println!("Combined overlay tree is now in {}", overlay_root.display());
            Ok(())
        }
        Err(err) => Err(eyre!("Failed to dig burrow: {err}")),
    }
}
