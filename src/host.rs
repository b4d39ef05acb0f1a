use bevy::math::IVec2;
use serde::{Deserialize, Serialize};

use crate::engine::ScreenId;

/// Identifier of a sharing session, carried on every outbound event.
pub type SessionId = String;

/// Generates a session identifier from the wall clock.
/// Used when the configuration does not pin one explicitly.
pub fn generate_session_id() -> SessionId {
    format!("sess-{}", chrono::Utc::now().timestamp_millis())
}

/// One cursor reading from the host.
///
/// `screen_hint` is the display the OS itself reports the pointer on, when
/// the host exposes that. It takes precedence over geometric attribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSample {
    pub point: IVec2,
    pub screen_hint: Option<ScreenId>,
}

impl CursorSample {
    pub fn at(x: i32, y: i32) -> Self {
        CursorSample {
            point: IVec2::new(x, y),
            screen_hint: None,
        }
    }
}

/// Interface to the host's cursor. The desktop shell implements this with
/// whatever OS facility it has; the daemon and the tests implement it with
/// fixtures. Must be cheap and non-blocking: it is called on every poll
/// tick.
pub trait CursorApi: Send + Sync {
    /// Returns the current pointer position, or `None` when the host can
    /// not produce one (screen locked, capture denied). A `None` sample
    /// skips the tick entirely.
    fn sample(&self) -> Option<CursorSample>;
}

/// Cursor provider whose position can be teleported from another thread or
/// system. The headless daemon parks it on the first display; all
/// liveliness then comes from injected events on the control socket.
#[derive(Clone, Default)]
pub struct SharedCursor {
    point: std::sync::Arc<std::sync::Mutex<IVec2>>,
}

impl SharedCursor {
    pub fn parked_at(point: IVec2) -> Self {
        SharedCursor {
            point: std::sync::Arc::new(std::sync::Mutex::new(point)),
        }
    }

    pub fn set(&self, point: IVec2) {
        if let Ok(mut current) = self.point.lock() {
            *current = point;
        }
    }
}

impl CursorApi for SharedCursor {
    fn sample(&self) -> Option<CursorSample> {
        self.point.lock().ok().map(|point| CursorSample {
            point: *point,
            screen_hint: None,
        })
    }
}
