use bevy::app::{AppExit, PreUpdate};
use bevy::ecs::message::{MessageReader, MessageWriter};
use bevy::ecs::system::{Commands, Res};
use bevy::math::IVec2;
use tracing::{Level, debug, info, instrument};

use crate::ecs::params::FocusCtl;
use crate::ecs::{CursorHandle, HostFeed, ViewerJoinedTrigger};
use crate::engine::{CommandAction, ScreenId};
use crate::events::Event;

/// Synthetic host interaction injected over the control socket. Lets a
/// headless daemon be driven end-to-end without any OS hooks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Inject {
    Click { point: IVec2, double: bool },
    /// Teleports the polled cursor; movement and hover emerge from the
    /// regular sampling tick.
    Move { point: IVec2 },
    Scroll { point: IVec2 },
    Typing,
    FocusWindow { screen: ScreenId },
}

/// Operator commands accepted on the control socket.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Toggles automatic focus inference.
    Auto,
    /// Toggles the freeze; the active screen is preserved while frozen.
    Freeze,
    /// Pins the active screen until cleared.
    Select(ScreenId),
    /// Clears the manual pin.
    ClearSelection,
    /// Simulates a viewer joining mid-session (late-joiner sync).
    Join(String),
    /// Injects a synthetic host event.
    Inject(Inject),
    /// Dumps snapshot and metrics to the log.
    PrintState,
    Quit,
}

pub fn register_commands(app: &mut bevy::app::App) {
    app.add_systems(
        PreUpdate,
        (
            command_auto_handler,
            command_freeze_handler,
            command_select_handler,
            command_clear_handler,
            command_join_handler,
            command_inject_handler,
            print_internal_state_handler,
            command_quit_handler,
        ),
    );
}

fn filter_commands<'a, F: Fn(&Command) -> bool>(
    messages: &'a mut MessageReader<Event>,
    filter: F,
) -> impl Iterator<Item = &'a Command> {
    messages.read().filter_map(move |event| {
        if let Event::Command { command } = event
            && filter(command)
        {
            Some(command)
        } else {
            None
        }
    })
}

#[allow(clippy::needless_pass_by_value)]
fn command_auto_handler(mut messages: MessageReader<Event>, mut focus: FocusCtl) {
    for _ in filter_commands(&mut messages, |cmd| matches!(cmd, Command::Auto)) {
        focus.apply(CommandAction::ToggleAutoFocus, None);
    }
}

#[allow(clippy::needless_pass_by_value)]
fn command_freeze_handler(mut messages: MessageReader<Event>, mut focus: FocusCtl) {
    for _ in filter_commands(&mut messages, |cmd| matches!(cmd, Command::Freeze)) {
        focus.apply(CommandAction::ToggleFreeze, None);
    }
}

#[allow(clippy::needless_pass_by_value)]
fn command_select_handler(mut messages: MessageReader<Event>, mut focus: FocusCtl) {
    let selections = filter_commands(&mut messages, |cmd| matches!(cmd, Command::Select(_)))
        .filter_map(|cmd| match cmd {
            Command::Select(screen) => Some(*screen),
            _ => None,
        })
        .collect::<Vec<_>>();
    for screen in selections {
        focus.apply(CommandAction::ManualSelect, Some(screen));
    }
}

#[allow(clippy::needless_pass_by_value)]
fn command_clear_handler(mut messages: MessageReader<Event>, mut focus: FocusCtl) {
    for _ in filter_commands(&mut messages, |cmd| matches!(cmd, Command::ClearSelection)) {
        focus.apply(CommandAction::ClearManual, None);
    }
}

/// Simulated viewer joins flow through the same trigger a signaling layer
/// would use, so the late-joiner path is exercised end-to-end.
#[allow(clippy::needless_pass_by_value)]
fn command_join_handler(mut messages: MessageReader<Event>, mut commands: Commands) {
    let joins = filter_commands(&mut messages, |cmd| matches!(cmd, Command::Join(_)))
        .filter_map(|cmd| match cmd {
            Command::Join(viewer) => Some(viewer.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    for viewer in joins {
        info!("viewer '{viewer}' joined");
        commands.trigger(ViewerJoinedTrigger(viewer));
    }
}

/// Replays injected interactions through the host event feed, so they take
/// the exact path a platform layer would use.
#[allow(clippy::needless_pass_by_value)]
#[instrument(level = Level::DEBUG, skip_all)]
fn command_inject_handler(
    mut messages: MessageReader<Event>,
    cursor: Res<CursorHandle>,
    feed: Res<HostFeed>,
) {
    let injections = filter_commands(&mut messages, |cmd| matches!(cmd, Command::Inject(_)))
        .filter_map(|cmd| match cmd {
            Command::Inject(inject) => Some(*inject),
            _ => None,
        })
        .collect::<Vec<_>>();

    for inject in injections {
        debug!("injecting {inject:?}");
        let event = match inject {
            Inject::Click { point, double } => Some(Event::MouseDown { point, double }),
            Inject::Scroll { point } => Some(Event::Scrolled { point }),
            Inject::Typing => Some(Event::TypingBurst {
                window_display: None,
            }),
            Inject::FocusWindow { screen } => Some(Event::WindowFocused {
                window_display: Some(screen),
            }),
            Inject::Move { point } => {
                cursor.set(point);
                None
            }
        };
        if let Some(event) = event
            && let Err(err) = feed.send(event)
        {
            debug!("dropping injected event: {err}");
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
#[instrument(level = Level::DEBUG, skip_all)]
fn print_internal_state_handler(mut messages: MessageReader<Event>, focus: FocusCtl) {
    if filter_commands(&mut messages, |cmd| matches!(cmd, Command::PrintState))
        .next()
        .is_none()
    {
        return;
    }

    let snapshot = focus.snapshot();
    let metrics = focus.metrics();
    info!(
        "state: active {:?}, mode {:?}, frozen {}, seq {}",
        snapshot.active_screen_id, snapshot.mode, snapshot.frozen, snapshot.sequence,
    );
    info!(
        "metrics: {} changes, {} cooldown blocks, {} dwell resets, {} idle blocks",
        metrics.focus_changes, metrics.cooldown_blocks, metrics.dwell_resets, metrics.idle_blocks,
    );
    info!("signal counts: {:?}", metrics.signal_counts);
}

#[allow(clippy::needless_pass_by_value)]
fn command_quit_handler(mut messages: MessageReader<Event>, mut exit: MessageWriter<AppExit>) {
    if filter_commands(&mut messages, |cmd| matches!(cmd, Command::Quit))
        .next()
        .is_some()
    {
        info!("operator requested shutdown");
        exit.write(AppExit::Success);
    }
}
