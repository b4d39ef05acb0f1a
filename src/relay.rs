use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::engine::{FocusChangeEvent, FocusSink, FocusStateSnapshot};
use crate::errors::Result;

/// Self-describing record crossing the process boundary. Internally tagged
/// so viewers can dispatch on `type` without peeking at the fields.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WirePayload {
    FocusChange(FocusChangeEvent),
    FocusState(FocusStateSnapshot),
}

pub fn encode_change(event: &FocusChangeEvent) -> Result<String> {
    Ok(serde_json::to_string(&WirePayload::FocusChange(
        event.clone(),
    ))?)
}

pub fn encode_state(state: &FocusStateSnapshot) -> Result<String> {
    Ok(serde_json::to_string(&WirePayload::FocusState(
        state.clone(),
    ))?)
}

/// Transport seam towards the viewers. The production implementation is a
/// signaling service; the daemon ships a log-backed one and the tests a
/// recorder.
pub trait RelayApi: Send + Sync {
    /// Delivers a payload to one viewer, or to everyone when `viewer` is
    /// `None`. Delivery is fire-and-forget; retries are the transport's
    /// business, not ours.
    fn deliver(&self, viewer: Option<&str>, payload: &str);
}

/// Relay that writes every payload to the log. Stands in for a signaling
/// connection when the daemon runs headless.
pub struct LogRelay;

impl RelayApi for LogRelay {
    fn deliver(&self, viewer: Option<&str>, payload: &str) {
        match viewer {
            Some(viewer) => info!("-> {viewer}: {payload}"),
            None => info!("-> all: {payload}"),
        }
    }
}

/// The engine-facing sink: buffers outbound records under a mutex so the
/// engine can stay synchronous while the harness forwards on its own
/// schedule.
#[derive(Clone, Default)]
pub struct BufferSink {
    queue: Arc<Mutex<Vec<Outbound>>>,
}

/// One buffered engine emission.
#[derive(Clone, Debug)]
pub enum Outbound {
    Change(FocusChangeEvent),
    State(FocusStateSnapshot),
}

impl BufferSink {
    /// Takes everything buffered so far, in emission order.
    pub fn drain(&self) -> Vec<Outbound> {
        match self.queue.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => Vec::new(),
        }
    }
}

impl FocusSink for BufferSink {
    fn focus_changed(&self, event: &FocusChangeEvent) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(Outbound::Change(event.clone()));
        }
    }

    fn focus_state(&self, state: &FocusStateSnapshot) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(Outbound::State(state.clone()));
        }
    }
}

/// Latest authoritative records, kept for viewers that join mid-session.
#[derive(Debug, Default)]
pub struct SessionCache {
    last_change: Option<FocusChangeEvent>,
    last_state: Option<FocusStateSnapshot>,
}

impl SessionCache {
    pub fn record_change(&mut self, event: &FocusChangeEvent) {
        self.last_change = Some(event.clone());
    }

    pub fn record_state(&mut self, state: &FocusStateSnapshot) {
        self.last_state = Some(state.clone());
    }

    pub fn last_change(&self) -> Option<&FocusChangeEvent> {
        self.last_change.as_ref()
    }

    pub fn last_state(&self) -> Option<&FocusStateSnapshot> {
        self.last_state.as_ref()
    }

    /// Payloads a late joiner needs to catch up: the latest focus change
    /// for sequence continuity, then the authoritative snapshot.
    pub fn catch_up(&self, fresh: &FocusStateSnapshot) -> Result<Vec<String>> {
        let mut payloads = Vec::with_capacity(2);
        if let Some(change) = &self.last_change {
            payloads.push(encode_change(change)?);
        }
        payloads.push(encode_state(fresh)?);
        debug!("late joiner catch-up: {} payloads", payloads.len());
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FocusMode, ScreenId, SignalType};

    fn change(sequence: u64) -> FocusChangeEvent {
        FocusChangeEvent {
            session_id: "sess-1".into(),
            screen_id: ScreenId(2),
            reason: SignalType::Click,
            confidence: 0.95,
            dwell_ms: 400,
            sequence,
            timestamp_ms: 1400,
        }
    }

    fn state() -> FocusStateSnapshot {
        FocusStateSnapshot {
            active_screen_id: Some(ScreenId(2)),
            mode: FocusMode::Auto,
            frozen: false,
            sequence: 1,
            timestamp_ms: 1400,
        }
    }

    #[test]
    fn test_payloads_carry_type_tags() {
        let json = encode_change(&change(1)).unwrap();
        assert!(json.starts_with("{\"type\":\"focusChange\""));
        assert!(json.contains("\"screenId\":2"));

        let json = encode_state(&state()).unwrap();
        assert!(json.starts_with("{\"type\":\"focusState\""));
        assert!(json.contains("\"mode\":\"auto\""));
    }

    #[test]
    fn test_buffer_sink_preserves_emission_order() {
        let sink = BufferSink::default();
        sink.focus_changed(&change(1));
        sink.focus_state(&state());
        sink.focus_changed(&change(2));

        let drained = sink.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(&drained[0], Outbound::Change(e) if e.sequence == 1));
        assert!(matches!(&drained[1], Outbound::State(_)));
        assert!(matches!(&drained[2], Outbound::Change(e) if e.sequence == 2));
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn test_cache_keeps_latest_only() {
        let mut cache = SessionCache::default();
        cache.record_change(&change(1));
        cache.record_change(&change(2));
        cache.record_state(&state());
        assert_eq!(cache.last_change().unwrap().sequence, 2);
        assert_eq!(cache.last_state().unwrap().sequence, 1);

        let payloads = cache.catch_up(&state()).unwrap();
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].contains("focusChange"));
        assert!(payloads[1].contains("focusState"));

        // A fresh cache still produces the snapshot.
        let payloads = SessionCache::default().catch_up(&state()).unwrap();
        assert_eq!(payloads.len(), 1);
    }
}
