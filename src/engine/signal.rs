use bevy::math::IVec2;
use num_enum::IntoPrimitive;
use serde::{Deserialize, Serialize};

use crate::engine::display::ScreenId;
use crate::host::SessionId;

/// Every kind of interaction the engine understands, ordered by priority.
///
/// The discriminant is the priority: lower wins when near-simultaneous
/// signals have to be reduced to one. The enum is closed on purpose; a new
/// interaction kind has to take a position in this order before the engine
/// will consider it.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "camelCase")]
pub enum SignalType {
    Manual = 0,
    Click = 1,
    DragStart = 2,
    DoubleClick = 3,
    DragEnd = 4,
    WindowFocus = 5,
    Typing = 6,
    Scroll = 7,
    Gesture = 8,
    Hover = 9,
    PointerMove = 10,
}

/// Number of variants, sized for the per-kind metrics table.
pub const SIGNAL_KINDS: usize = 11;

impl SignalType {
    /// Conflict-resolution rank; lower wins.
    pub fn priority(self) -> u8 {
        u8::from(self)
    }

    /// How strongly this kind of interaction indicates presenter intent,
    /// before situational modifiers.
    pub fn base_confidence(self) -> f64 {
        match self {
            SignalType::Manual => 1.0,
            SignalType::Click | SignalType::DragStart | SignalType::DoubleClick => 0.95,
            SignalType::WindowFocus | SignalType::Typing => 0.90,
            SignalType::Scroll | SignalType::Gesture | SignalType::DragEnd => 0.85,
            SignalType::Hover => 0.70,
            SignalType::PointerMove => 0.40,
        }
    }

    /// Activity signals keep the session out of the idle state. Pointer
    /// motion and hover deliberately do not: motion alone cannot revive an
    /// idle session.
    pub fn is_activity(self) -> bool {
        !matches!(self, SignalType::PointerMove | SignalType::Hover)
    }
}

/// One attributed interaction, the canonical unit flowing into the focus
/// engine. Immutable once constructed; timestamps are monotonic
/// milliseconds supplied by the producer, never read from a clock here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntentSignal {
    pub kind: SignalType,
    /// Pre-attributed display, set when the producer knows it
    /// authoritatively.
    pub screen: Option<ScreenId>,
    pub point: IVec2,
    pub timestamp_ms: u64,
    /// Meaningful only for `PointerMove`.
    pub speed_px_s: Option<f64>,
    /// The display the OS reports the focused window on, when known.
    pub window_display: Option<ScreenId>,
}

impl IntentSignal {
    pub fn pointer_move(screen: ScreenId, point: IVec2, speed_px_s: f64, now: u64) -> Self {
        IntentSignal {
            kind: SignalType::PointerMove,
            screen: Some(screen),
            point,
            timestamp_ms: now,
            speed_px_s: Some(speed_px_s),
            window_display: None,
        }
    }

    pub fn hover(screen: ScreenId, point: IVec2, now: u64) -> Self {
        IntentSignal {
            kind: SignalType::Hover,
            screen: Some(screen),
            point,
            timestamp_ms: now,
            speed_px_s: None,
            window_display: None,
        }
    }

    pub fn discrete(kind: SignalType, screen: ScreenId, point: IVec2, now: u64) -> Self {
        IntentSignal {
            kind,
            screen: Some(screen),
            point,
            timestamp_ms: now,
            speed_px_s: None,
            window_display: None,
        }
    }

    pub fn with_window_display(mut self, display: Option<ScreenId>) -> Self {
        self.window_display = display;
        self
    }
}

/// Explicit operator action, routed around the intent stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandAction {
    ToggleAutoFocus,
    ToggleFreeze,
    ManualSelect,
    ClearManual,
}

/// An operator command with its injection timestamp. `screen` is required
/// only for `ManualSelect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenterCommand {
    pub action: CommandAction,
    pub screen: Option<ScreenId>,
    pub timestamp_ms: u64,
}

/// Authoritative focus transition, relayed verbatim to every viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusChangeEvent {
    pub session_id: SessionId,
    pub screen_id: ScreenId,
    pub reason: SignalType,
    pub confidence: f64,
    pub dwell_ms: u64,
    pub sequence: u64,
    pub timestamp_ms: u64,
}

/// Which regime currently owns the active screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusMode {
    Auto,
    Manual,
    Frozen,
}

/// Point-in-time summary of the engine, used for mode-change notifications
/// and for initializing late joiners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusStateSnapshot {
    pub active_screen_id: Option<ScreenId>,
    pub mode: FocusMode,
    pub frozen: bool,
    pub sequence: u64,
    pub timestamp_ms: u64,
}

/// Rounds a confidence value to two fractional digits, the precision every
/// emitted event carries.
pub fn round_confidence(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reduces a batch of near-simultaneous signals to the single most
/// meaningful one.
///
/// Ordering: lower priority number wins; on a tie the higher base
/// confidence wins; on a further tie the later timestamp wins. Fully equal
/// triples keep the first occurrence, so the reduction is stable.
pub fn resolve(signals: &[IntentSignal]) -> Option<&IntentSignal> {
    fn beats(challenger: &IntentSignal, champion: &IntentSignal) -> bool {
        let by_priority = challenger.kind.priority().cmp(&champion.kind.priority());
        if by_priority != std::cmp::Ordering::Equal {
            return by_priority == std::cmp::Ordering::Less;
        }
        let challenger_base = challenger.kind.base_confidence();
        let champion_base = champion.kind.base_confidence();
        if challenger_base != champion_base {
            return challenger_base > champion_base;
        }
        challenger.timestamp_ms > champion.timestamp_ms
    }

    let mut winner: Option<&IntentSignal> = None;
    for signal in signals {
        match winner {
            None => winner = Some(signal),
            Some(current) if beats(signal, current) => winner = Some(signal),
            Some(_) => {}
        }
    }
    winner
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(kind: SignalType, ts: u64) -> IntentSignal {
        IntentSignal {
            kind,
            screen: Some(ScreenId(1)),
            point: IVec2::ZERO,
            timestamp_ms: ts,
            speed_px_s: None,
            window_display: None,
        }
    }

    #[test]
    fn test_priority_order_is_total() {
        let ordered = [
            SignalType::Manual,
            SignalType::Click,
            SignalType::DragStart,
            SignalType::DoubleClick,
            SignalType::DragEnd,
            SignalType::WindowFocus,
            SignalType::Typing,
            SignalType::Scroll,
            SignalType::Gesture,
            SignalType::Hover,
            SignalType::PointerMove,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
        assert_eq!(ordered.len(), SIGNAL_KINDS);
    }

    #[test]
    fn test_resolve_prefers_priority() {
        let signals = [
            at(SignalType::Hover, 100),
            at(SignalType::Click, 50),
            at(SignalType::PointerMove, 200),
        ];
        assert_eq!(resolve(&signals).unwrap().kind, SignalType::Click);
    }

    #[test]
    fn test_resolve_tie_breaks_on_timestamp() {
        let signals = [at(SignalType::Click, 100), at(SignalType::Click, 300)];
        assert_eq!(resolve(&signals).unwrap().timestamp_ms, 300);
    }

    #[test]
    fn test_resolve_is_stable_for_equal_triples() {
        let mut first = at(SignalType::Scroll, 100);
        first.point = IVec2::new(11, 12);
        let second = at(SignalType::Scroll, 100);
        let signals = [first, second];
        // Same kind, base confidence and timestamp: the first entry wins.
        assert_eq!(resolve(&signals).unwrap().point, IVec2::new(11, 12));
        assert!(resolve(&[]).is_none());
    }

    #[test]
    fn test_wire_shape_of_focus_change() {
        let event = FocusChangeEvent {
            session_id: "sess-1".into(),
            screen_id: ScreenId(2),
            reason: SignalType::DragStart,
            confidence: 0.95,
            dwell_ms: 400,
            sequence: 1,
            timestamp_ms: 1400,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            "{\"sessionId\":\"sess-1\",\"screenId\":2,\"reason\":\"dragStart\",\
             \"confidence\":0.95,\"dwellMs\":400,\"sequence\":1,\"timestampMs\":1400}"
        );
    }

    #[test]
    fn test_confidence_rounding() {
        assert!((round_confidence(0.654_999) - 0.65).abs() < f64::EPSILON);
        assert!((round_confidence(0.999) - 1.0).abs() < f64::EPSILON);
        assert!((round_confidence(0.0) - 0.0).abs() < f64::EPSILON);
    }
}
