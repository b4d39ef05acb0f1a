use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread;
use stdext::function_name;
use tracing::{debug, error, info, warn};

use crate::config::parse_command;
use crate::errors::{Error, Result};
use crate::events::{Event, EventSender};

/// Path of the control socket: the XDG runtime directory when available,
/// the temp directory otherwise.
fn socket_path() -> PathBuf {
    xdg::BaseDirectories::with_prefix("spotcast")
        .place_runtime_file("control.sock")
        .unwrap_or_else(|_| std::env::temp_dir().join("spotcast-control.sock"))
}

/// Accepts newline-delimited operator commands on a Unix socket and feeds
/// them into the main loop.
pub struct CommandReader {
    sender: EventSender,
}

impl CommandReader {
    pub fn new(sender: EventSender) -> Self {
        CommandReader { sender }
    }

    /// Binds the socket and spawns the accept loop on its own thread.
    pub fn start(self) {
        thread::spawn(move || {
            if let Err(err) = self.run() {
                error!("command reader terminated: {err}");
            }
        });
    }

    fn run(&self) -> Result<()> {
        let path = socket_path();
        if path.exists() {
            // Stale socket from a previous run.
            _ = std::fs::remove_file(&path);
        }
        let listener = UnixListener::bind(&path)?;
        info!("listening for commands on {}", path.display());

        for stream in listener.incoming() {
            let Ok(stream) = stream.inspect_err(|err| warn!("accept failed: {err}")) else {
                continue;
            };
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else {
                    break;
                };
                let argv = line.split_whitespace().collect::<Vec<_>>();
                if argv.is_empty() {
                    continue;
                }
                match parse_command(&argv) {
                    Ok(command) => {
                        debug!("command: {command:?}");
                        self.sender.send(Event::Command { command })?;
                    }
                    Err(err) => warn!("ignoring malformed command '{line}': {err}"),
                }
            }
        }
        Ok(())
    }

    /// Sends a command line to the running daemon.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The command words, e.g. `["select", "2"]`.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the line is written, otherwise `Err(Error)` when the
    /// command is malformed or no daemon is listening.
    pub fn send_command(cmd: Vec<String>) -> Result<()> {
        // Validate locally for a friendlier error than a daemon log line.
        let argv = cmd.iter().map(String::as_str).collect::<Vec<_>>();
        parse_command(&argv)?;

        let path = socket_path();
        let mut stream = UnixStream::connect(&path).map_err(|err| {
            Error::NotFound(format!(
                "{}: no daemon listening on {} ({err})",
                function_name!(),
                path.display()
            ))
        })?;
        stream.write_all(cmd.join(" ").as_bytes())?;
        stream.write_all(b"\n")?;
        Ok(())
    }
}
