use bevy::ecs::observer::On;
use bevy::ecs::system::{Commands, Res, ResMut};
use tracing::{debug, error, info, warn};

use super::{
    Cache, ConfigRefreshTrigger, Detector, DisplaysChangedTrigger, Engine, FocusChangeTrigger,
    FocusStateTrigger, Relay, ViewerJoinedTrigger,
};
use crate::config::{CONFIGURATION_FILE, Config};
use crate::engine::DisplayTopology;
use crate::relay::{encode_change, encode_state};

/// Relays an authoritative switch to every viewer and caches it for
/// late-joiner sync.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn focus_change_trigger(
    trigger: On<FocusChangeTrigger>,
    relay: Res<Relay>,
    mut cache: ResMut<Cache>,
) {
    let event = &trigger.event().0;
    cache.record_change(event);
    match encode_change(event) {
        Ok(payload) => relay.deliver(None, &payload),
        Err(err) => warn!("dropping focus change {}: {err}", event.sequence),
    }
}

/// Relays a mode change or stay-refresh. Lossy by contract, so an encoding
/// failure only costs a log line.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn focus_state_trigger(
    trigger: On<FocusStateTrigger>,
    relay: Res<Relay>,
    mut cache: ResMut<Cache>,
) {
    let state = &trigger.event().0;
    cache.record_state(state);
    match encode_state(state) {
        Ok(payload) => relay.deliver(None, &payload),
        Err(err) => warn!("dropping focus state refresh: {err}"),
    }
}

/// Brings a late joiner up to speed: the cached latest change for sequence
/// continuity, then a fresh authoritative snapshot.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn viewer_joined_trigger(
    trigger: On<ViewerJoinedTrigger>,
    relay: Res<Relay>,
    cache: Res<Cache>,
    engine: Res<Engine>,
) {
    let viewer = &trigger.event().0;
    debug!("viewer '{viewer}' catching up on session {}", engine.session_id());
    match cache.catch_up(&engine.snapshot()) {
        Ok(payloads) => {
            for payload in payloads {
                relay.deliver(Some(viewer), &payload);
            }
        }
        Err(err) => warn!("catch-up for '{viewer}' failed: {err}"),
    }
}

/// Replaces the display topology atomically. A layout that fails
/// validation is rejected wholesale; the session keeps running on the old
/// one.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn displays_changed_trigger(
    trigger: On<DisplaysChangedTrigger>,
    mut engine: ResMut<Engine>,
    config: Res<Config>,
) {
    let screens = &trigger.event().0;
    match DisplayTopology::from_entries(screens, config.tuning().max_screens) {
        Ok(topology) => {
            info!("display topology replaced: {} screens", topology.len());
            engine.update_displays(topology);
        }
        Err(err) => error!("rejecting display change: {err}"),
    }
}

/// Applies a changed configuration file to the running session: tuning,
/// detector options and the display layout.
#[allow(clippy::needless_pass_by_value)]
pub(super) fn config_refresh_trigger(
    _trigger: On<ConfigRefreshTrigger>,
    config: Res<Config>,
    mut engine: ResMut<Engine>,
    mut detector: ResMut<Detector>,
    mut commands: Commands,
) {
    let Some(path) = CONFIGURATION_FILE.as_ref() else {
        return;
    };
    if let Err(err) = config.reload_config(path) {
        warn!("config reload failed, keeping previous: {err}");
        return;
    }
    if let Err(err) = engine.update_tuning(config.tuning()) {
        warn!("rejecting reloaded tuning: {err}");
    }
    if let Err(err) = detector.set_options(config.detector_options()) {
        warn!("rejecting reloaded detector options: {err}");
    }
    commands.trigger(DisplaysChangedTrigger(config.screens()));
    debug!("configuration reloaded from {}", path.display());
}
