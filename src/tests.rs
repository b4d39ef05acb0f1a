use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use super::*;
use arc_swap::ArcSwap;
use bevy::math::IVec2;
use bevy::time::TimeUpdateStrategy;

use crate::commands::{Command, Inject};
use crate::config::Config;
use crate::ecs::{Cache, CursorHandle, Engine, Relay, SessionClock, setup_app};
use crate::engine::{
    DisplayTopology, FocusChangeEvent, FocusEngine, FocusSink, FocusStateSnapshot, FocusTuning,
    IntentSignal, ScreenEntry, ScreenId, SignalType,
};
use crate::events::{Event, EventSender};
use crate::relay::RelayApi;

const D1: ScreenId = ScreenId(1);
const D2: ScreenId = ScreenId(2);
const D3: ScreenId = ScreenId(3);

/// The canonical three-display layout used throughout the suite.
fn triple_topology() -> Arc<ArcSwap<DisplayTopology>> {
    let entries = [
        ScreenEntry {
            id: 1,
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            scale: 1.0,
        },
        ScreenEntry {
            id: 2,
            x: 1920,
            y: 0,
            width: 1920,
            height: 1080,
            scale: 1.0,
        },
        ScreenEntry {
            id: 3,
            x: 4480,
            y: 0,
            width: 1920,
            height: 1080,
            scale: 1.0,
        },
    ];
    Arc::new(ArcSwap::from_pointee(
        DisplayTopology::from_entries(&entries, 3).unwrap(),
    ))
}

fn center_of(screen: ScreenId) -> IVec2 {
    match screen {
        D2 => IVec2::new(2880, 540),
        D3 => IVec2::new(5440, 540),
        _ => IVec2::new(960, 540),
    }
}

/// Records everything the engine emits, in order.
#[derive(Default)]
struct RecordingSink {
    changes: Mutex<Vec<FocusChangeEvent>>,
    states: Mutex<Vec<FocusStateSnapshot>>,
}

struct SharedSink(Arc<RecordingSink>);

impl FocusSink for SharedSink {
    fn focus_changed(&self, event: &FocusChangeEvent) {
        self.0.changes.lock().unwrap().push(event.clone());
    }

    fn focus_state(&self, state: &FocusStateSnapshot) {
        self.0.states.lock().unwrap().push(state.clone());
    }
}

fn scenario_engine() -> (FocusEngine, Arc<RecordingSink>) {
    let recorder = Arc::new(RecordingSink::default());
    let engine = FocusEngine::new(
        "sess-test".into(),
        FocusTuning::default(),
        triple_topology(),
        Box::new(SharedSink(recorder.clone())),
    )
    .unwrap();
    (engine, recorder)
}

fn click(screen: ScreenId, ts: u64) -> IntentSignal {
    IntentSignal::discrete(SignalType::Click, screen, center_of(screen), ts)
}

fn pointer(screen: ScreenId, ts: u64, speed: f64) -> IntentSignal {
    IntentSignal::pointer_move(screen, center_of(screen), speed, ts)
}

fn manual_select(screen: ScreenId, ts: u64) -> crate::engine::PresenterCommand {
    crate::engine::PresenterCommand {
        action: crate::engine::CommandAction::ManualSelect,
        screen: Some(screen),
        timestamp_ms: ts,
    }
}

#[test]
fn test_click_dwell_satisfied() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D2, 1000));
    engine.process_signal(&click(D2, 1400));

    let changes = recorder.changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    let event = &changes[0];
    assert_eq!(event.screen_id, D2);
    assert_eq!(event.reason, SignalType::Click);
    assert_eq!(event.dwell_ms, 400);
    assert!((event.confidence - 0.95).abs() < f64::EPSILON);
    assert_eq!(event.sequence, 1);
    assert_eq!(event.timestamp_ms, 1400);
}

#[test]
fn test_click_dwell_unsatisfied_then_satisfied() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D2, 1000));
    engine.process_signal(&click(D2, 1200));
    assert!(recorder.changes.lock().unwrap().is_empty());

    engine.process_signal(&click(D2, 1400));
    let changes = recorder.changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].sequence, 1);
    assert_eq!(changes[0].dwell_ms, 400);
}

#[test]
fn test_dwell_reset_by_competing_screen() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D2, 1000));
    engine.process_signal(&click(D1, 1150));
    // The D1 run is only 100ms old, below the 300ms click dwell.
    engine.process_signal(&click(D1, 1250));
    assert!(recorder.changes.lock().unwrap().is_empty());
    assert_eq!(engine.metrics().dwell_resets, 2);
}

#[test]
fn test_cooldown_blocks_opposite_click() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D2, 1000));
    engine.process_signal(&click(D2, 1400));
    // Effective confidence of the D1 clicks inside cooldown is
    // 0.95 - 0.15 - 0.15 = 0.65, below the 0.80 switch threshold. The
    // second one lands exactly at the inclusive cooldown boundary.
    engine.process_signal(&click(D1, 1500));
    engine.process_signal(&click(D1, 1900));

    let changes = recorder.changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].screen_id, D2);
    assert!(engine.metrics().cooldown_blocks >= 2);
}

#[test]
fn test_manual_overrides_cooldown() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D2, 1000));
    engine.process_signal(&click(D2, 1400));
    engine.handle_command(&manual_select(D1, 1500));

    let changes = recorder.changes.lock().unwrap();
    assert_eq!(changes.len(), 2);
    let event = &changes[1];
    assert_eq!(event.screen_id, D1);
    assert_eq!(event.reason, SignalType::Manual);
    assert!((event.confidence - 1.0).abs() < f64::EPSILON);
    assert_eq!(event.dwell_ms, 0);
    assert_eq!(event.sequence, 2);
}

#[test]
fn test_rapid_transit_does_not_thrash() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D1, 500));
    for i in 0..20u64 {
        let screen = if i % 2 == 0 { D2 } else { D1 };
        engine.process_signal(&pointer(screen, 530 + i * 30, 2000.0));
    }

    let changes = recorder.changes.lock().unwrap();
    assert!(changes.iter().all(|e| e.reason != SignalType::PointerMove));
    assert!(changes.is_empty());
}

#[test]
fn test_idle_gate_suppresses_motion() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D1, 500));
    engine.process_signal(&click(D1, 900));
    assert_eq!(recorder.changes.lock().unwrap().len(), 1);

    // Only motion after a 4-second silence: idle since t=900, and motion
    // does not revive the session.
    for i in 0..10u64 {
        engine.process_signal(&pointer(D2, 5000 + i * 50, 600.0));
    }
    let changes = recorder.changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].screen_id, D1);
    assert_eq!(engine.metrics().idle_blocks, 10);
}

#[test]
fn test_emitted_events_satisfy_invariants() {
    let (mut engine, recorder) = scenario_engine();
    engine.process_signal(&click(D2, 1000));
    engine.process_signal(&click(D2, 1400));
    engine.handle_command(&manual_select(D1, 1500));
    engine.handle_command(&crate::engine::PresenterCommand {
        action: crate::engine::CommandAction::ClearManual,
        screen: None,
        timestamp_ms: 1600,
    });
    engine.process_signal(&click(D3, 2500));
    engine.process_signal(&click(D3, 2900));
    engine.process_signal(&pointer(D1, 3000, 400.0));
    engine.process_signal(&click(D1, 4000));
    engine.process_signal(&click(D1, 4400));

    let changes = recorder.changes.lock().unwrap();
    assert!(changes.len() >= 3);
    for pair in changes.windows(2) {
        assert!(pair[1].sequence > pair[0].sequence);
        assert!(pair[1].timestamp_ms >= pair[0].timestamp_ms);
    }
    for event in changes.iter() {
        assert!((0.0..=1.0).contains(&event.confidence));
        // At most two fractional digits.
        let scaled = event.confidence * 100.0;
        assert!((scaled - scaled.round()).abs() < 1e-9);
        assert_eq!(event.session_id, "sess-test");
    }
}

#[test]
fn test_consecutive_switches_respect_cooldown_or_confidence() {
    let (mut engine, recorder) = scenario_engine();
    // A window-focus burst hopping between screens, with dwell satisfied
    // each time; whatever gets emitted must obey the cooldown invariant.
    let script = [
        (D2, 1000),
        (D2, 1400),
        (D3, 1500),
        (D3, 1900),
        (D3, 2300),
        (D1, 2500),
        (D1, 2900),
        (D1, 3300),
    ];
    for (screen, ts) in script {
        let signal = IntentSignal::discrete(
            SignalType::WindowFocus,
            screen,
            center_of(screen),
            ts,
        )
        .with_window_display(Some(screen));
        engine.process_signal(&signal);
    }

    let changes = recorder.changes.lock().unwrap();
    let tuning = FocusTuning::default();
    for pair in changes.windows(2) {
        if pair[1].reason != SignalType::Manual {
            let gap = pair[1].timestamp_ms - pair[0].timestamp_ms;
            // Inside the cooldown the event can only exist because its
            // confidence survived the 0.15 penalty.
            assert!(
                gap > tuning.cooldown_ms
                    || pair[1].confidence >= tuning.switch_threshold
            );
        }
    }
}

// --- harness-level tests -------------------------------------------------

const TEST_CONFIG: &str = r#"
[session]
id = "sess-harness"

[[displays]]
id = 1
x = 0
y = 0
width = 1920
height = 1080

[[displays]]
id = 2
x = 1920
y = 0
width = 1920
height = 1080

[[displays]]
id = 3
x = 4480
y = 0
width = 1920
height = 1080
"#;

/// Relay that records every delivery instead of logging it.
#[derive(Clone, Default)]
struct RecordingRelay(Arc<Mutex<Vec<(Option<String>, String)>>>);

impl RelayApi for RecordingRelay {
    fn deliver(&self, viewer: Option<&str>, payload: &str) {
        self.0
            .lock()
            .unwrap()
            .push((viewer.map(str::to_owned), payload.to_owned()));
    }
}

fn setup_harness() -> (bevy::app::App, RecordingRelay) {
    static DONE: OnceLock<()> = OnceLock::new();
    DONE.get_or_init(|| {
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
    });

    let config: Config = TEST_CONFIG.try_into().expect("Failed to parse config");
    let (sender, receiver) = EventSender::new();
    let mut app = setup_app(sender, receiver, &config).expect("Failed to assemble app");

    // Deterministic time: virtual time steps 100ms per update, and the
    // session clock only moves when a test advances it.
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(
        100,
    )));
    app.insert_resource(SessionClock::fixed(0));

    let relay = RecordingRelay::default();
    app.insert_resource(Relay(Box::new(relay.clone())));
    (app, relay)
}

fn advance(app: &mut bevy::app::App, now_ms: u64) {
    app.world_mut()
        .resource_mut::<SessionClock>()
        .advance_to(now_ms);
    app.update();
}

#[test]
fn test_harness_clicks_switch_and_relay_broadcasts() {
    let (mut app, relay) = setup_harness();
    // Park the cursor on display 2 so the sampling tick and the injected
    // clicks argue for the same candidate.
    app.world().resource::<CursorHandle>().set(IVec2::new(2880, 540));

    app.world_mut().write_message(Event::MouseDown {
        point: IVec2::new(2880, 540),
        double: false,
    });
    advance(&mut app, 1000);

    app.world_mut().write_message(Event::MouseDown {
        point: IVec2::new(2880, 540),
        double: false,
    });
    advance(&mut app, 1400);
    // One extra frame so PostUpdate delivery has drained everything.
    advance(&mut app, 1450);

    let engine = app.world().resource::<Engine>();
    assert_eq!(engine.active(), Some(D2));
    assert_eq!(engine.sequence(), 1);

    let cache = app.world().resource::<Cache>();
    let last = cache.last_change().expect("no cached focus change");
    assert_eq!(last.screen_id, D2);
    assert_eq!(last.session_id, "sess-harness");

    let deliveries = relay.0.lock().unwrap();
    assert!(
        deliveries
            .iter()
            .any(|(viewer, payload)| viewer.is_none() && payload.contains("\"type\":\"focusChange\""))
    );
}

#[test]
fn test_harness_operator_commands_route_to_engine() {
    let (mut app, relay) = setup_harness();

    app.world_mut().write_message(Event::Command {
        command: Command::Freeze,
    });
    advance(&mut app, 100);
    assert!(app.world().resource::<Engine>().frozen());

    app.world_mut().write_message(Event::Command {
        command: Command::Select(D3),
    });
    advance(&mut app, 200);
    let engine = app.world().resource::<Engine>();
    assert_eq!(engine.active(), Some(D3));
    assert_eq!(engine.manual_override(), Some(D3));

    app.world_mut().write_message(Event::Command {
        command: Command::Join("alice".into()),
    });
    advance(&mut app, 300);
    advance(&mut app, 350);

    let deliveries = relay.0.lock().unwrap();
    let to_alice = deliveries
        .iter()
        .filter(|(viewer, _)| viewer.as_deref() == Some("alice"))
        .collect::<Vec<_>>();
    // Catch-up is the cached change plus a fresh snapshot.
    assert_eq!(to_alice.len(), 2);
    assert!(to_alice[0].1.contains("\"type\":\"focusChange\""));
    assert!(to_alice[1].1.contains("\"type\":\"focusState\""));
    assert!(to_alice[1].1.contains("\"mode\":\"manual\""));
}

#[test]
fn test_harness_injected_move_produces_motion() {
    let (mut app, _relay) = setup_harness();

    // Prime the sampler on display 1, then teleport across to display 2;
    // the next tick synthesizes a PointerMove from the travel.
    advance(&mut app, 1000);
    advance(&mut app, 1010);
    app.world_mut().write_message(Event::Command {
        command: Command::Inject(Inject::Move {
            point: IVec2::new(2880, 540),
        }),
    });
    advance(&mut app, 1050);
    advance(&mut app, 1100);

    let engine = app.world().resource::<Engine>();
    let metrics = engine.metrics();
    assert!(metrics.signal_count(SignalType::PointerMove) >= 1);
    // Motion alone must not have switched focus.
    assert_eq!(engine.active(), Some(D1));
    assert_eq!(metrics.focus_changes, 0);
}

#[test]
fn test_harness_displays_changed_repins_active() {
    let (mut app, _relay) = setup_harness();

    app.world_mut().write_message(Event::Command {
        command: Command::Select(D3),
    });
    advance(&mut app, 100);
    assert_eq!(app.world().resource::<Engine>().active(), Some(D3));

    // Display 3 goes away mid-session.
    let remaining = vec![
        ScreenEntry {
            id: 1,
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            scale: 1.0,
        },
        ScreenEntry {
            id: 2,
            x: 1920,
            y: 0,
            width: 1920,
            height: 1080,
            scale: 1.0,
        },
    ];
    app.world_mut()
        .write_message(Event::DisplaysChanged { screens: remaining });
    advance(&mut app, 200);

    let engine = app.world().resource::<Engine>();
    assert_eq!(engine.active(), Some(D1));
    assert_eq!(engine.manual_override(), None);
}
