use arc_swap::ArcSwap;
use bevy::MinimalPlugins;
use bevy::app::App as BevyApp;
use bevy::app::{PostUpdate, PreUpdate, Update};
use bevy::ecs::message::Messages;
use bevy::ecs::resource::Resource;
use bevy::ecs::schedule::IntoScheduleConfigs;
use bevy::prelude::{Event as BevyEvent, Message};
use bevy::time::common_conditions::on_timer;
use bevy::time::{Time, Virtual};
use derive_more::{Deref, DerefMut};
use notify::{RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::commands::register_commands;
use crate::config::{CONFIGURATION_FILE, Config};
use crate::engine::{
    FocusChangeEvent, FocusEngine, FocusStateSnapshot, IntentDetector, IntentSignal, ScreenEntry,
};
use crate::errors::Result;
use crate::events::{Event, EventSender};
use crate::host::{CursorApi, SharedCursor, generate_session_id};
use crate::relay::{BufferSink, LogRelay, RelayApi, SessionCache};

pub mod params;
mod systems;
mod triggers;

/// Registers the schedule: the event pump and command dispatch run early,
/// the sampling tick and signal processing in the main pass, and outbound
/// delivery after everything has settled.
pub fn register_systems(app: &mut BevyApp, poll_interval_ms: u64) {
    app.add_systems(
        PreUpdate,
        (systems::pump_events, systems::dispatch_toplevel_triggers),
    );
    app.add_systems(
        Update,
        (
            systems::sample_cursor.run_if(on_timer(Duration::from_millis(poll_interval_ms))),
            systems::host_event_intake,
            systems::process_signals,
        )
            .chain(),
    );
    app.add_systems(PostUpdate, systems::drain_engine_output);
}

/// Registers the observers relaying engine output and applying runtime
/// reconfiguration.
pub fn register_triggers(app: &mut BevyApp) {
    app.add_observer(triggers::focus_change_trigger)
        .add_observer(triggers::focus_state_trigger)
        .add_observer(triggers::viewer_joined_trigger)
        .add_observer(triggers::displays_changed_trigger)
        .add_observer(triggers::config_refresh_trigger);
}

/// The per-session focus engine.
#[derive(Deref, DerefMut, Resource)]
pub struct Engine(pub FocusEngine);

/// The intent detector feeding the engine.
#[derive(Deref, DerefMut, Resource)]
pub struct Detector(pub IntentDetector);

/// Host cursor seam, polled on every sampling tick.
#[derive(Deref, Resource)]
pub struct CursorDevice(pub Box<dyn CursorApi>);

/// Handle for teleporting the daemon's shared cursor (`inject move`).
#[derive(Clone, Deref, Resource)]
pub struct CursorHandle(pub SharedCursor);

/// Signaling seam towards the viewers.
#[derive(Deref, Resource)]
pub struct Relay(pub Box<dyn RelayApi>);

/// Latest outbound records, kept for late joiners.
#[derive(Default, Deref, DerefMut, Resource)]
pub struct Cache(pub SessionCache);

/// The buffer the engine's sink writes into; drained once per frame.
#[derive(Clone, Deref, Resource)]
pub struct SinkBuffer(pub BufferSink);

/// Way back into the host event queue, used by injected interactions so
/// they travel the same path as real platform events.
#[derive(Clone, Deref, Resource)]
pub struct HostFeed(pub EventSender);

/// Monotonic milliseconds since session start.
///
/// This is the only place in the process that reads time on behalf of the
/// focus pipeline; signals and commands are stamped here and the engine
/// only ever compares those stamps. Tests switch the clock to manual mode
/// for full determinism.
#[derive(Resource)]
pub struct SessionClock {
    epoch: Instant,
    manual: Option<u64>,
}

impl SessionClock {
    pub fn wall() -> Self {
        SessionClock {
            epoch: Instant::now(),
            manual: None,
        }
    }

    pub fn fixed(start_ms: u64) -> Self {
        SessionClock {
            epoch: Instant::now(),
            manual: Some(start_ms),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.manual.unwrap_or_else(|| {
            u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
        })
    }

    /// Moves a manual clock forward; never backwards.
    pub fn advance_to(&mut self, now_ms: u64) {
        self.manual = Some(self.manual.map_or(now_ms, |current| current.max(now_ms)));
    }
}

/// One attributed signal on its way from a producer to the engine.
#[derive(Clone, Copy, Debug, Message)]
pub struct SignalMessage(pub IntentSignal);

/// An authoritative switch leaving the engine.
#[derive(BevyEvent)]
pub struct FocusChangeTrigger(pub FocusChangeEvent);

/// A mode change or stay-refresh leaving the engine.
#[derive(BevyEvent)]
pub struct FocusStateTrigger(pub FocusStateSnapshot);

/// A viewer joined mid-session and needs to catch up.
#[derive(BevyEvent)]
pub struct ViewerJoinedTrigger(pub String);

/// The display set changed.
#[derive(BevyEvent)]
pub struct DisplaysChangedTrigger(pub Vec<ScreenEntry>);

/// The configuration file changed on disk.
#[derive(BevyEvent)]
pub struct ConfigRefreshTrigger;

/// Forwards file-system notifications about the configuration file into
/// the event queue.
struct ConfigHandler(EventSender);

impl notify::EventHandler for ConfigHandler {
    fn handle_event(&mut self, event: notify::Result<notify::Event>) {
        if let Ok(event) = event {
            _ = self.0.send(Event::ConfigRefresh(event)).inspect_err(|err| {
                warn!("error sending config refresh: {err}");
            });
        }
    }
}

fn setup_config_watcher(sender: EventSender, path: &Path) -> Result<Box<dyn Watcher>> {
    let setup = notify::Config::default().with_poll_interval(Duration::from_secs(3));
    let mut watcher: Box<dyn Watcher> =
        Box::new(notify::RecommendedWatcher::new(ConfigHandler(sender), setup)?);
    debug!("watching config file {} for changes.", path.display());
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Assembles the daemon: engine, detector, cursor, relay and schedule.
///
/// # Arguments
///
/// * `sender` - Event handle shared with the control socket reader and the
///   config watcher.
/// * `receiver` - The matching queue end, drained by the event pump.
/// * `config` - Validated configuration; also inserted as a resource.
///
/// # Returns
///
/// A ready-to-run bevy `App`, or `Err(Error)` when the topology or tuning
/// is unusable.
pub fn setup_app(sender: EventSender, receiver: Receiver<Event>, config: &Config) -> Result<BevyApp> {
    let tuning = config.tuning();
    let detector_options = config.detector_options();
    let topology = config.topology()?;
    let park = topology
        .iter()
        .next()
        .map(|(_, bounds)| bounds.rect().center())
        .unwrap_or_default();
    let displays = Arc::new(ArcSwap::from_pointee(topology));

    let buffer = BufferSink::default();
    let session_id = config.session_id().unwrap_or_else(generate_session_id);
    let engine = FocusEngine::new(
        session_id,
        tuning,
        displays.clone(),
        Box::new(buffer.clone()),
    )?;
    let detector = IntentDetector::new(detector_options, displays)?;
    let cursor = SharedCursor::parked_at(park);

    let mut app = BevyApp::new();
    app.add_plugins(MinimalPlugins)
        .init_resource::<Messages<Event>>()
        .init_resource::<Messages<SignalMessage>>()
        .insert_resource(Time::<Virtual>::from_max_delta(Duration::from_secs(10)))
        .insert_resource(config.clone())
        .insert_resource(Engine(engine))
        .insert_resource(Detector(detector))
        .insert_resource(CursorHandle(cursor.clone()))
        .insert_resource(CursorDevice(Box::new(cursor)))
        .insert_resource(Relay(Box::new(LogRelay)))
        .insert_resource(Cache(SessionCache::default()))
        .insert_resource(SinkBuffer(buffer))
        .insert_resource(HostFeed(sender.clone()))
        .insert_resource(SessionClock::wall());

    register_systems(&mut app, detector_options.poll_interval_ms);
    register_triggers(&mut app);
    register_commands(&mut app);

    if let Some(path) = CONFIGURATION_FILE.as_ref() {
        let watcher = setup_config_watcher(sender, path)?;
        app.insert_non_send_resource(watcher);
    }
    app.insert_non_send_resource(receiver);

    Ok(app)
}
