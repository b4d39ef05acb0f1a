use arc_swap::ArcSwap;
use std::sync::Arc;
use stdext::function_name;
use tracing::{debug, info, trace, warn};

use crate::engine::display::{DisplayTopology, ScreenId};
use crate::engine::signal::{
    CommandAction, FocusChangeEvent, FocusMode, FocusStateSnapshot, IntentSignal,
    PresenterCommand, SIGNAL_KINDS, SignalType, round_confidence,
};
use crate::errors::{Error, Result};
use crate::host::SessionId;

/// Bonus when the OS-reported window display agrees with the candidate.
const WINDOW_HINT_BONUS: f64 = 0.05;
/// Bonus once the same candidate has persisted this long.
const SUSTAINED_CANDIDATE_BONUS: f64 = 0.05;
const SUSTAINED_CANDIDATE_MS: u64 = 1000;
/// Penalty for pointer transit faster than `movement_speed_high_px_s`.
const TRANSIT_PENALTY: f64 = 0.10;
/// Penalty for trying to leave the active screen inside the cooldown
/// window. Applied both as a confidence modifier and in the explicit
/// cooldown step; the stacking is deliberate.
const COOLDOWN_PENALTY: f64 = 0.15;

/// All numeric parameters of the focus state machine. Defaults are
/// authoritative; anything else arrives from the configuration file and is
/// validated before it reaches the engine.
#[derive(Clone, Copy, Debug)]
pub struct FocusTuning {
    pub max_screens: usize,
    /// Confidence required to move focus to another display.
    pub switch_threshold: f64,
    /// Confidence required to refresh the current display's standing.
    pub stay_threshold: f64,
    pub cooldown_ms: u64,
    pub idle_ms: u64,
    pub click_dwell_ms: u64,
    pub typing_dwell_ms: u64,
    pub scroll_dwell_ms: u64,
    pub hover_dwell_ms: u64,
    pub movement_dwell_ms: u64,
    pub movement_speed_high_px_s: f64,
    /// Length of the cooldown window opened when a freeze is lifted.
    pub resume_grace_ms: u64,
}

impl Default for FocusTuning {
    fn default() -> Self {
        FocusTuning {
            max_screens: 3,
            switch_threshold: 0.80,
            stay_threshold: 0.50,
            cooldown_ms: 500,
            idle_ms: 2000,
            click_dwell_ms: 300,
            typing_dwell_ms: 300,
            scroll_dwell_ms: 300,
            hover_dwell_ms: 500,
            movement_dwell_ms: 800,
            movement_speed_high_px_s: 1200.0,
            resume_grace_ms: 300,
        }
    }
}

impl FocusTuning {
    /// Rejects configurations the state machine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_screens == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: max_screens must be at least 1",
                function_name!()
            )));
        }
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.switch_threshold) || !in_unit(self.stay_threshold) {
            return Err(Error::InvalidConfig(format!(
                "{}: thresholds must lie in [0, 1]",
                function_name!()
            )));
        }
        if self.switch_threshold < self.stay_threshold {
            return Err(Error::InvalidConfig(format!(
                "{}: switch_threshold {} below stay_threshold {}",
                function_name!(),
                self.switch_threshold,
                self.stay_threshold,
            )));
        }
        if self.movement_speed_high_px_s <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "{}: movement_speed_high_px_s must be positive",
                function_name!()
            )));
        }
        if self.resume_grace_ms > self.cooldown_ms {
            return Err(Error::InvalidConfig(format!(
                "{}: resume_grace_ms {} exceeds cooldown_ms {}",
                function_name!(),
                self.resume_grace_ms,
                self.cooldown_ms,
            )));
        }
        Ok(())
    }

    /// Minimum time a candidate must persist before this kind of signal may
    /// promote it. Unlisted future kinds get the conservative movement
    /// dwell.
    pub fn dwell_for(&self, kind: SignalType) -> u64 {
        match kind {
            SignalType::Manual => 0,
            SignalType::Click | SignalType::DoubleClick | SignalType::DragStart => {
                self.click_dwell_ms
            }
            SignalType::Typing | SignalType::WindowFocus => self.typing_dwell_ms,
            SignalType::Scroll | SignalType::Gesture => self.scroll_dwell_ms,
            SignalType::Hover => self.hover_dwell_ms,
            _ => self.movement_dwell_ms,
        }
    }
}

/// Append-only counters of the engine. A metrics snapshot is a plain copy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FocusMetrics {
    pub focus_changes: u64,
    pub cooldown_blocks: u64,
    pub dwell_resets: u64,
    pub idle_blocks: u64,
    pub signal_counts: [u64; SIGNAL_KINDS],
}

impl FocusMetrics {
    pub fn signal_count(&self, kind: SignalType) -> u64 {
        self.signal_counts[usize::from(kind.priority())]
    }
}

/// Receiver of engine output. The signaling collaborator implements this;
/// tests implement it with a recorder. Invoked strictly after state
/// mutation, so observed state is always consistent with delivered events.
pub trait FocusSink: Send + Sync {
    /// One authoritative switch. Relay verbatim to every viewer and cache
    /// the latest for late-joiner sync.
    fn focus_changed(&self, event: &FocusChangeEvent);
    /// Mode change or stay-refresh. Lossy; receivers may coalesce.
    fn focus_state(&self, state: &FocusStateSnapshot);
}

/// The presenter-intent state machine.
///
/// One instance per session, owned by the presenter side. Every entry point
/// is synchronous, runs to completion and must be serialized by the caller;
/// the engine never reads a clock, every comparison uses the timestamp of
/// the incoming signal or command.
pub struct FocusEngine {
    session_id: SessionId,
    tuning: FocusTuning,
    displays: Arc<ArcSwap<DisplayTopology>>,
    sink: Box<dyn FocusSink>,

    active: Option<ScreenId>,
    frozen: bool,
    auto_enabled: bool,
    manual_override: Option<ScreenId>,
    last_switch_ts: u64,
    candidate: Option<ScreenId>,
    candidate_since_ts: u64,
    last_activity_ts: u64,
    last_seen_ts: u64,
    sequence: u64,
    metrics: FocusMetrics,
}

impl FocusEngine {
    /// Builds an engine for one session.
    ///
    /// # Arguments
    ///
    /// * `session_id` - Identifier carried on every outbound event.
    /// * `tuning` - Validated here; invalid tuning is a construction error.
    /// * `displays` - Shared topology handle, also read by the detector.
    /// * `sink` - Receiver of focus-change and focus-state output.
    ///
    /// # Returns
    ///
    /// `Ok(FocusEngine)` pinned to the topology's first display, otherwise
    /// `Err(Error::InvalidConfig)`.
    pub fn new(
        session_id: SessionId,
        tuning: FocusTuning,
        displays: Arc<ArcSwap<DisplayTopology>>,
        sink: Box<dyn FocusSink>,
    ) -> Result<Self> {
        tuning.validate()?;
        if displays.load().is_empty() {
            warn!("session {session_id} starting with no displays");
        }
        let active = displays.load().first();
        info!("session {session_id}: initial display {active:?}");
        Ok(FocusEngine {
            session_id,
            tuning,
            displays,
            sink,
            active,
            frozen: false,
            auto_enabled: true,
            manual_override: None,
            last_switch_ts: 0,
            candidate: None,
            candidate_since_ts: 0,
            last_activity_ts: 0,
            last_seen_ts: 0,
            sequence: 0,
            metrics: FocusMetrics::default(),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn active(&self) -> Option<ScreenId> {
        self.active
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn auto_enabled(&self) -> bool {
        self.auto_enabled
    }

    pub fn manual_override(&self) -> Option<ScreenId> {
        self.manual_override
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn mode(&self) -> FocusMode {
        if self.manual_override.is_some() {
            FocusMode::Manual
        } else if self.frozen {
            FocusMode::Frozen
        } else {
            FocusMode::Auto
        }
    }

    /// Plain-value summary of the current state; never mutates. The
    /// timestamp is the latest one the engine has observed, keeping the
    /// snapshot clock-free.
    pub fn snapshot(&self) -> FocusStateSnapshot {
        FocusStateSnapshot {
            active_screen_id: self.active,
            mode: self.mode(),
            frozen: self.frozen,
            sequence: self.sequence,
            timestamp_ms: self.last_seen_ts,
        }
    }

    /// Copy of the counters. Counters never decrease within a session.
    pub fn metrics(&self) -> FocusMetrics {
        self.metrics
    }

    /// Replaces the tuning at runtime (configuration hot-reload).
    pub fn update_tuning(&mut self, tuning: FocusTuning) -> Result<()> {
        tuning.validate()?;
        self.tuning = tuning;
        Ok(())
    }

    /// Atomically replaces the display topology.
    ///
    /// A vanished active display re-pins focus to the new first display and
    /// announces the correction; a vanished candidate or manual override is
    /// simply dropped.
    pub fn update_displays(&mut self, topology: DisplayTopology) {
        let first = topology.first();
        let repin = match self.active {
            Some(active) => !topology.contains(active),
            None => first.is_some(),
        };
        if let Some(cand) = self.candidate
            && !topology.contains(cand)
        {
            self.candidate = None;
            self.candidate_since_ts = self.last_seen_ts;
        }
        if let Some(pinned) = self.manual_override
            && !topology.contains(pinned)
        {
            debug!("manual override {pinned} left the topology");
            self.manual_override = None;
        }
        self.displays.store(Arc::new(topology));

        if repin {
            if let Some(first) = first {
                let now = self.last_seen_ts;
                self.candidate = Some(first);
                self.candidate_since_ts = now;
                self.set_active(first, SignalType::Manual, 1.0, now);
            } else {
                self.active = None;
                self.sink.focus_state(&self.snapshot());
            }
        }
    }

    /// Situational confidence of `signal` arguing for `cand`, clamped to
    /// `[0, 1]`.
    fn confidence(&self, signal: &IntentSignal, cand: ScreenId, now: u64) -> f64 {
        let mut conf = signal.kind.base_confidence();
        if signal.window_display == Some(cand) {
            conf += WINDOW_HINT_BONUS;
        }
        if self.candidate == Some(cand)
            && now.saturating_sub(self.candidate_since_ts) >= SUSTAINED_CANDIDATE_MS
        {
            conf += SUSTAINED_CANDIDATE_BONUS;
        }
        if signal.kind == SignalType::PointerMove
            && signal
                .speed_px_s
                .is_some_and(|speed| speed > self.tuning.movement_speed_high_px_s)
        {
            conf -= TRANSIT_PENALTY;
        }
        if self.active != Some(cand)
            && now.saturating_sub(self.last_switch_ts) <= self.tuning.cooldown_ms
        {
            conf -= COOLDOWN_PENALTY;
        }
        conf.clamp(0.0, 1.0)
    }

    /// Commits a switch: bumps the sequence, mutates state, then notifies
    /// the sink.
    fn set_active(&mut self, screen: ScreenId, reason: SignalType, conf: f64, now: u64) {
        self.sequence += 1;
        let dwell_ms = now.saturating_sub(self.candidate_since_ts);
        self.active = Some(screen);
        self.last_switch_ts = now;
        self.metrics.focus_changes += 1;
        let event = FocusChangeEvent {
            session_id: self.session_id.clone(),
            screen_id: screen,
            reason,
            confidence: round_confidence(conf),
            dwell_ms,
            sequence: self.sequence,
            timestamp_ms: now,
        };
        debug!(
            "focus -> {screen} ({reason:?}, conf {:.2}, dwell {dwell_ms}ms, seq {})",
            event.confidence, event.sequence,
        );
        self.sink.focus_changed(&event);
    }

    /// Feeds one intent signal through the decision pipeline.
    ///
    /// The pipeline order is load-bearing: counting, activity tracking,
    /// freeze and auto precedence, manual override, attribution,
    /// confidence, idle, cooldown, candidate tracking, dwell, hysteresis.
    pub fn process_signal(&mut self, signal: &IntentSignal) {
        let now = signal.timestamp_ms;
        self.last_seen_ts = self.last_seen_ts.max(now);
        self.metrics.signal_counts[usize::from(signal.kind.priority())] += 1;

        if signal.kind.is_activity() {
            self.last_activity_ts = now;
        }

        if self.frozen {
            trace!("frozen, dropping {:?}", signal.kind);
            return;
        }
        if !self.auto_enabled {
            return;
        }
        if let Some(pinned) = self.manual_override {
            if self.active != Some(pinned) {
                self.candidate = Some(pinned);
                self.candidate_since_ts = now;
                self.set_active(pinned, SignalType::Manual, 1.0, now);
            }
            return;
        }

        let Some(cand) = self.displays.load().attribute(signal) else {
            trace!("unattributable {:?}, dropping", signal.kind);
            return;
        };

        let mut conf = self.confidence(signal, cand, now);

        if now.saturating_sub(self.last_activity_ts) > self.tuning.idle_ms {
            self.metrics.idle_blocks += 1;
            trace!("idle for {}ms, dropping {:?}", now - self.last_activity_ts, signal.kind);
            return;
        }

        // Inclusive comparison: a signal exactly cooldown_ms after a switch
        // is still penalized.
        if now.saturating_sub(self.last_switch_ts) <= self.tuning.cooldown_ms
            && signal.kind != SignalType::Manual
        {
            conf = (conf - COOLDOWN_PENALTY).max(0.0);
            self.metrics.cooldown_blocks += 1;
        }

        if self.candidate != Some(cand) {
            self.candidate = Some(cand);
            self.candidate_since_ts = now;
            self.metrics.dwell_resets += 1;
        }

        let needed = self.tuning.dwell_for(signal.kind);
        if now.saturating_sub(self.candidate_since_ts) < needed {
            return;
        }

        if self.active != Some(cand) || self.sequence == 0 {
            // The sequence guard makes the very first confirmation of the
            // provisional initial display an authoritative event too.
            if conf >= self.tuning.switch_threshold {
                self.set_active(cand, signal.kind, conf, now);
            }
        } else if conf >= self.tuning.stay_threshold {
            self.sink.focus_state(&self.snapshot());
        }
    }

    /// Applies one operator command. Commands bypass idle, cooldown and
    /// dwell entirely.
    pub fn handle_command(&mut self, cmd: &PresenterCommand) {
        let now = cmd.timestamp_ms;
        self.last_seen_ts = self.last_seen_ts.max(now);

        match cmd.action {
            CommandAction::ToggleAutoFocus => {
                self.auto_enabled = !self.auto_enabled;
                info!("auto focus {}", if self.auto_enabled { "on" } else { "off" });
                self.sink.focus_state(&self.snapshot());
            }
            CommandAction::ToggleFreeze => {
                self.frozen = !self.frozen;
                if !self.frozen {
                    // Resume grace: dwell re-accrues from scratch and a
                    // short cooldown window keeps the first post-freeze
                    // signals from flipping focus immediately.
                    self.candidate_since_ts = now;
                    let grace_anchor = (now + self.tuning.resume_grace_ms)
                        .saturating_sub(self.tuning.cooldown_ms);
                    self.last_switch_ts = self.last_switch_ts.max(grace_anchor);
                }
                info!("freeze {}", if self.frozen { "on" } else { "off" });
                self.sink.focus_state(&self.snapshot());
            }
            CommandAction::ManualSelect => {
                let Some(screen) = cmd.screen else {
                    debug!("manual select without a screen, ignoring");
                    return;
                };
                if !self.displays.load().contains(screen) {
                    debug!("manual select of unknown screen {screen}, ignoring");
                    return;
                }
                self.manual_override = Some(screen);
                if self.active != Some(screen) || self.sequence == 0 {
                    self.candidate = Some(screen);
                    self.candidate_since_ts = now;
                    self.set_active(screen, SignalType::Manual, 1.0, now);
                } else {
                    self.sink.focus_state(&self.snapshot());
                }
            }
            CommandAction::ClearManual => {
                self.manual_override = None;
                self.sink.focus_state(&self.snapshot());
            }
        }
    }
}
