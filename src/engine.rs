//! The focus core: display attribution, the canonical signal model, the
//! intent detector and the focus state machine.
//!
//! Everything in here is synchronous and clock-free; timestamps ride on
//! the signals themselves. The surrounding harness (`crate::ecs`) owns
//! scheduling, queues and delivery.

pub use display::{DisplayBounds, DisplayTopology, ScreenEntry, ScreenId};
pub use focus::{FocusEngine, FocusMetrics, FocusSink, FocusTuning};
pub use intent::{DetectorOptions, IntentDetector};
pub use signal::{
    CommandAction, FocusChangeEvent, FocusMode, FocusStateSnapshot, IntentSignal,
    PresenterCommand, SIGNAL_KINDS, SignalType, resolve, round_confidence,
};

mod display;
mod focus;
mod intent;
mod signal;
