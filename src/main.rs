//! Server binary: CLI parsing, logging setup, signal wiring.

use std::fs::OpenOptions;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Target, WriteStyle};
use log::LevelFilter;

use termchat_server::{Cli, Server};

fn init_logging(cli: &Cli) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if cli.quiet {
        LevelFilter::Error
    } else {
        cli.log_level
    });
    builder.format_timestamp_millis();
    builder.write_style(match cli.color.as_str() {
        "always" => WriteStyle::Always,
        "never" => WriteStyle::Never,
        _ => WriteStyle::Auto,
    });
    if let Some(path) = &cli.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    log::info!("termchat-server v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.runtime_config().context("invalid configuration")?;
    let server = Server::bind(config).context("failed to start server")?;

    // The handler only flips the flag and broadcasts; all cleanup happens
    // on the accept loop thread once it observes the trigger.
    let ctx = server.context();
    ctrlc::set_handler(move || ctx.shutdown.trigger())
        .context("failed to install signal handler")?;

    server.run().context("server failed")?;
    Ok(())
}
