use bevy::app::AppExit;
use bevy::ecs::message::{MessageReader, MessageWriter};
use bevy::ecs::system::{Commands, Local, NonSend, Res, ResMut};
use notify::EventKind;
use notify::event::ModifyKind;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::trace;

use super::{
    ConfigRefreshTrigger, CursorDevice, Detector, DisplaysChangedTrigger, Engine, FocusChangeTrigger,
    FocusStateTrigger, SessionClock, SignalMessage, SinkBuffer,
};
use crate::engine::resolve;
use crate::events::Event;
use crate::relay::Outbound;

/// Drains the host event queue into the frame's message buffer.
///
/// The adaptive timeout keeps the run loop from spinning while the session
/// is quiet: each idle frame waits a little longer, capped at half a
/// second, and any traffic snaps it back down.
pub(super) fn pump_events(
    mut exit: MessageWriter<AppExit>,
    mut messages: MessageWriter<Event>,
    incoming_events: Option<NonSend<Receiver<Event>>>,
    mut timeout: Local<u32>,
) {
    const LOOP_MAX_TIMEOUT_MS: u32 = 500;
    const LOOP_TIMEOUT_STEP: u32 = 1;

    let Some(incoming_events) = incoming_events else {
        // No incoming event pipe - probably executing in a unit test.
        return;
    };

    loop {
        // Repeatedly drain the events until timeout.
        match incoming_events.recv_timeout(Duration::from_millis((*timeout).into())) {
            Ok(Event::Exit) | Err(RecvTimeoutError::Disconnected) => {
                exit.write(AppExit::Success);
                break;
            }
            Ok(event) => {
                messages.write(event);
                *timeout = LOOP_TIMEOUT_STEP;
            }
            Err(RecvTimeoutError::Timeout) => {
                *timeout = timeout.min(LOOP_MAX_TIMEOUT_MS) + LOOP_TIMEOUT_STEP;
                break;
            }
        }
    }
}

/// Routes queue events that reconfigure the session onto their observers.
/// Interaction events are consumed by `host_event_intake`; operator
/// commands by the handlers in `crate::commands`.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn dispatch_toplevel_triggers(
    mut messages: MessageReader<Event>,
    mut commands: Commands,
) {
    for event in messages.read() {
        match event {
            Event::DisplaysChanged { screens } => {
                commands.trigger(DisplaysChangedTrigger(screens.clone()));
            }
            Event::ConfigRefresh(fs_event) => {
                if matches!(
                    fs_event.kind,
                    EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
                ) {
                    commands.trigger(ConfigRefreshTrigger);
                }
            }
            _ => {}
        }
    }
}

/// The 20 Hz sampling tick: reads the cursor, lets the detector synthesize
/// movement and hover, and queues whatever comes out.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn sample_cursor(
    cursor: Res<CursorDevice>,
    mut detector: ResMut<Detector>,
    clock: Res<SessionClock>,
    mut signals: MessageWriter<SignalMessage>,
) {
    let Some(sample) = cursor.sample() else {
        trace!("cursor unavailable, skipping tick");
        return;
    };
    let now = clock.now_ms();
    for signal in detector.tick(sample, now) {
        signals.write(SignalMessage(signal));
    }
}

/// Converts discrete host events into attributed signals.
///
/// Everything a single frame delivers shares one timestamp, so a burst is
/// first reduced to its strongest representative before it reaches the
/// engine.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn host_event_intake(
    mut messages: MessageReader<Event>,
    detector: Res<Detector>,
    clock: Res<SessionClock>,
    mut signals: MessageWriter<SignalMessage>,
) {
    let now = clock.now_ms();
    let mut batch = Vec::new();
    for event in messages.read() {
        let signal = match event {
            Event::MouseDown { point, double } => detector.click(*point, *double, now),
            Event::DragStarted { point } => detector.drag_started(*point, now),
            Event::DragEnded { point } => detector.drag_ended(*point, now),
            Event::Scrolled { point } => detector.scroll(*point, now),
            Event::TypingBurst { window_display } => detector.typing(*window_display, now),
            Event::WindowFocused { window_display } => detector.window_focus(*window_display, now),
            _ => None,
        };
        if let Some(signal) = signal {
            batch.push(signal);
        }
    }

    match batch.as_slice() {
        [] => {}
        [single] => {
            signals.write(SignalMessage(*single));
        }
        _ => {
            if let Some(winner) = resolve(&batch) {
                trace!("reduced {} simultaneous events to {:?}", batch.len(), winner.kind);
                signals.write(SignalMessage(*winner));
            }
        }
    }
}

/// Feeds queued signals to the engine, in order.
pub(super) fn process_signals(
    mut signals: MessageReader<SignalMessage>,
    mut engine: ResMut<Engine>,
) {
    for SignalMessage(signal) in signals.read() {
        engine.process_signal(signal);
    }
}

/// Forwards everything the engine emitted this frame to the observers.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn drain_engine_output(buffer: Res<SinkBuffer>, mut commands: Commands) {
    for outbound in buffer.drain() {
        match outbound {
            Outbound::Change(event) => commands.trigger(FocusChangeTrigger(event)),
            Outbound::State(state) => commands.trigger(FocusStateTrigger(state)),
        }
    }
}
