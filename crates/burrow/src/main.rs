//! Burrow wrapper entry point.

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use burrow::cli::Cli;
use burrow::Engine;

fn init_tracing(debug: u8) -> Result<()> {
    let default = match debug {
        0 => "burrow=info",
        1 => "burrow=debug",
        _ => "burrow=trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(default.parse()?))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let argv: Vec<String> = std::env::args().collect();
    let invoked_as = argv
        .first()
        .and_then(|argv0| burrow_common::paths::const_basename(argv0))
        .unwrap_or("burrow");

    // Deployed as a symlink named after the wrapped command: skip the
    // subcommand surface entirely and wrap.
    if invoked_as != "burrow" {
        init_tracing(
            std::env::var("BURROW_DEBUG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(0),
        )?;

        let mut engine = Engine::load(None)?;
        let err = engine.run_wrapped(&argv, true);
        return Err(eyre!("{err}"));
    }

    let cli = Cli::parse();
    init_tracing(cli.debug)?;
    cli.execute().map_err(|err| eyre!("{err}"))
}
