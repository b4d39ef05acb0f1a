use bevy::prelude::Message;
use bevy::math::IVec2;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use stdext::function_name;

use crate::commands::Command;
use crate::engine::{ScreenEntry, ScreenId};
use crate::errors::{Error, Result};

/// Everything that can reach the main loop from the outside: discrete host
/// interaction events, topology and configuration changes, and operator
/// commands from the control socket.
///
/// Host events deliberately carry raw positions, not display attributions;
/// attribution is the intent detector's job.
#[derive(Clone, Debug, Message)]
pub enum Event {
    /// Mouse button press, single or double.
    MouseDown { point: IVec2, double: bool },
    DragStarted { point: IVec2 },
    DragEnded { point: IVec2 },
    Scrolled { point: IVec2 },
    /// A burst of keystrokes; the host may know the focused window's
    /// display.
    TypingBurst { window_display: Option<ScreenId> },
    /// The OS moved keyboard focus to a window on the given display.
    WindowFocused { window_display: Option<ScreenId> },
    /// The display set changed; replaces the topology atomically.
    DisplaysChanged { screens: Vec<ScreenEntry> },
    /// The configuration file changed on disk.
    ConfigRefresh(notify::Event),
    /// Operator command from the control socket.
    Command { command: Command },
    /// Shut the daemon down.
    Exit,
}

/// Clonable handle for feeding events into the main loop from any thread
/// (control socket reader, config watcher, signal handler).
#[derive(Clone)]
pub struct EventSender(Arc<Mutex<Sender<Event>>>);

impl EventSender {
    /// Creates the sender together with the receiving end the main loop
    /// drains.
    pub fn new() -> (Self, Receiver<Event>) {
        let (sender, receiver) = channel();
        (EventSender(Arc::new(Mutex::new(sender))), receiver)
    }

    /// Queues an event for the main loop.
    ///
    /// # Returns
    ///
    /// `Err(Error::ChannelClosed)` once the main loop is gone.
    pub fn send(&self, event: Event) -> Result<()> {
        let sender = self.0.lock().map_err(|_| {
            Error::ChannelClosed(format!("{}: sender lock poisoned", function_name!()))
        })?;
        sender
            .send(event)
            .map_err(|err| Error::ChannelClosed(format!("{}: {err}", function_name!())))
    }
}
