use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod config;
mod ecs;
mod engine;
mod errors;
mod events;
mod host;
mod reader;
mod relay;

#[cfg(test)]
mod tests;

use errors::Result;
use events::{Event, EventSender};
use reader::CommandReader;

use crate::config::{CONFIGURATION_FILE, Config};
use crate::ecs::setup_app;

/// `Spotcast` is the command-line interface of the screen-sharing presenter
/// daemon. It either launches the daemon or talks to a running one.
#[derive(Clone, Debug, Default, Parser)]
#[command(
    version = clap::crate_version!(),
    author = clap::crate_authors!(),
    about = clap::crate_description!(),
)]
pub struct Spotcast {
    /// The subcommand to execute (e.g., `launch`, `send-cmd`).
    #[clap(subcommand)]
    subcmd: Option<SubCmd>,
}

/// `SubCmd` enumerates the available command-line subcommands.
#[derive(Clone, Debug, Default, Subcommand)]
pub enum SubCmd {
    /// Launches the `spotcast` daemon directly in the console (default
    /// behavior).
    #[default]
    Launch,

    /// Sends a command via a Unix socket to the running daemon.
    SendCmd {
        #[arg(trailing_var_arg = true)]
        cmd: Vec<String>,
    },
}

/// The main entry point of the `spotcast` application.
/// It sets up logging and dispatches commands accordingly.
///
/// # Returns
///
/// `Ok(())` if the application runs successfully, otherwise `Err(Error)`.
fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_level(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    match Spotcast::parse().subcmd.unwrap_or_default() {
        SubCmd::Launch => {
            let config = match CONFIGURATION_FILE.as_ref() {
                Some(path) => Config::new(path)?,
                None => Config::default(),
            };
            let (sender, receiver) = EventSender::new();
            let interrupt = sender.clone();
            ctrlc::set_handler(move || {
                _ = interrupt.send(Event::Exit);
            })?;
            CommandReader::new(sender.clone()).start();
            setup_app(sender, receiver, &config)?.run();
        }
        SubCmd::SendCmd { cmd } => CommandReader::send_command(cmd)?,
    }
    Ok(())
}
