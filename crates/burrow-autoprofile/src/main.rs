//! Autoprofile entry point: analyse a captured tree and emit the layer
//! config describing it.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use burrow::autoprofile::{output_path, run, AutoProfileOptions};

/// Burrow autoprofile - derive a layer config from a captured tree
#[derive(Parser)]
#[command(name = "burrow-autoprofile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase debugging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// The captured tree, or a digger overlay root
    #[arg(long, visible_alias = "overlay-root", value_name = "PATH")]
    overlay_directory: PathBuf,

    /// Name of the emitted environment
    #[arg(long, value_name = "NAME")]
    environment_name: Option<String>,

    /// Output file, "auto", or "-" for stdout
    #[arg(long, value_name = "PATH")]
    output_file: Option<String>,

    /// Profile to apply: built-in tag or absolute path
    #[arg(long, default_value = "default", value_name = "NAME|PATH")]
    profile: String,

    /// Capability the environment provides (repeatable)
    #[arg(long, value_name = "ID")]
    provides: Vec<String>,

    /// Capability the environment requires (repeatable)
    #[arg(long, value_name = "ID")]
    requires: Vec<String>,

    /// Directory where wrapper symlinks are expected
    #[arg(long, value_name = "PATH")]
    wrapper_directory: Option<PathBuf>,

    /// Emit wrapper profiles for executables in this directory
    /// (repeatable)
    #[arg(long, value_name = "PATH")]
    check_binaries: Vec<String>,
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

    let opts = AutoProfileOptions {
        overlay_root: cli.overlay_directory,
        environment_name: cli.environment_name,
        output: cli.output_file,
        profile: cli.profile,
        provides: cli.provides,
        requires: cli.requires,
        wrapper_directory: cli.wrapper_directory,
        check_binaries: cli.check_binaries,
    };

    let analysis = run(&opts).map_err(|err| eyre!("{err}"))?;

    match output_path(&analysis, &opts)? {
        Some(path) => {
            analysis.config.write(&path)?;
            println!("Environment definition written to {}", path.display());
        }
        None => print!("{}", analysis.config.to_config_string()),
    }

    Ok(())
}
