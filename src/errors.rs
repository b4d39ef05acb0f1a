use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All the ways `spotcast` can fail.
///
/// Most of the focus pipeline operates by suppression rather than error:
/// a signal that cannot be attributed is simply dropped. The variants here
/// cover the genuinely fallible edges: configuration, I/O, and the control
/// socket.
#[derive(Debug)]
pub enum Error {
    /// The configuration file is malformed or violates an invariant.
    InvalidConfig(String),
    /// A caller handed us something nonsensical.
    InvalidInput(String),
    /// A lookup came up empty.
    NotFound(String),
    /// The event channel to the main loop is gone.
    ChannelClosed(String),
    /// Underlying I/O failure (config file, control socket).
    Io(std::io::Error),
    /// TOML parse failure.
    Toml(toml::de::Error),
    /// JSON encoding failure on the wire path.
    Encoding(serde_json::Error),
    /// Config watcher failure.
    Watcher(notify::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::NotFound(msg) => write!(f, "not found: {msg}"),
            Error::ChannelClosed(msg) => write!(f, "channel closed: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Toml(err) => write!(f, "toml error: {err}"),
            Error::Encoding(err) => write!(f, "encoding error: {err}"),
            Error::Watcher(err) => write!(f, "watcher error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Toml(err) => Some(err),
            Error::Encoding(err) => Some(err),
            Error::Watcher(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Toml(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err)
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watcher(err)
    }
}

impl From<ctrlc::Error> for Error {
    fn from(err: ctrlc::Error) -> Self {
        Error::InvalidInput(format!("signal handler: {err}"))
    }
}
