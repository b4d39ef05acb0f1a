use arc_swap::ArcSwap;
use bevy::math::IVec2;
use std::sync::Arc;
use stdext::function_name;
use tracing::trace;

use crate::engine::display::{DisplayTopology, ScreenId};
use crate::engine::signal::{IntentSignal, SignalType};
use crate::errors::{Error, Result};
use crate::host::CursorSample;

/// Tuning knobs of the intent detector.
#[derive(Clone, Copy, Debug)]
pub struct DetectorOptions {
    /// Cursor poll period; 50 ms is the 20 Hz target.
    pub poll_interval_ms: u64,
    /// Minimum travel between two samples that counts as movement.
    pub movement_threshold_px: f64,
    /// Radius of the hover disc around the anchor.
    pub hover_radius_px: f64,
    /// How long the pointer must rest inside the disc before a hover fires.
    pub hover_threshold_ms: u64,
    /// Speed floor below which travel is treated as sensor drift.
    pub idle_motion_px_s: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        DetectorOptions {
            poll_interval_ms: 50,
            movement_threshold_px: 3.0,
            hover_radius_px: 8.0,
            hover_threshold_ms: 300,
            idle_motion_px_s: 5.0,
        }
    }
}

impl DetectorOptions {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: poll interval must be positive",
                function_name!()
            )));
        }
        if self.movement_threshold_px < 0.0
            || self.hover_radius_px < 0.0
            || self.idle_motion_px_s < 0.0
        {
            return Err(Error::InvalidConfig(format!(
                "{}: detector thresholds must not be negative",
                function_name!()
            )));
        }
        Ok(())
    }
}

fn euclid(a: IVec2, b: IVec2) -> f64 {
    let dx = f64::from(a.x - b.x);
    let dy = f64::from(a.y - b.y);
    (dx * dx + dy * dy).sqrt()
}

/// Turns the periodic cursor stream plus injected discrete host events into
/// the canonical, attributed signal stream the focus engine consumes.
///
/// The detector holds the same atomically-swappable topology as the engine,
/// so a display change takes effect on the very next sample. It never calls
/// the engine; the harness carries its output through a queue.
pub struct IntentDetector {
    options: DetectorOptions,
    displays: Arc<ArcSwap<DisplayTopology>>,
    last_sample: Option<(IVec2, u64)>,
    hover_anchor: Option<(IVec2, u64)>,
    hover_emitted: bool,
}

impl IntentDetector {
    pub fn new(options: DetectorOptions, displays: Arc<ArcSwap<DisplayTopology>>) -> Result<Self> {
        options.validate()?;
        Ok(IntentDetector {
            options,
            displays,
            last_sample: None,
            hover_anchor: None,
            hover_emitted: false,
        })
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: DetectorOptions) -> Result<()> {
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Attributes a point, honouring a host-supplied display hint first.
    fn attribute_point(&self, point: IVec2, hint: Option<ScreenId>) -> Option<ScreenId> {
        let topology = self.displays.load();
        hint.filter(|id| topology.contains(*id))
            .or_else(|| topology.resolve_point(point))
    }

    /// The position discrete events without coordinates fall back to.
    fn fallback_point(&self) -> IVec2 {
        self.last_sample
            .map(|(point, _)| point)
            .or_else(|| self.hover_anchor.map(|(point, _)| point))
            .unwrap_or(IVec2::ZERO)
    }

    /// One poll tick. Returns at most two signals: a movement and a hover.
    ///
    /// Internal state (last sample, hover anchor) always advances, even
    /// when attribution fails and nothing is emitted.
    pub fn tick(&mut self, sample: CursorSample, now: u64) -> Vec<IntentSignal> {
        let point = sample.point;
        let mut out = Vec::with_capacity(2);

        let travel = self.last_sample.map(|(last, last_ts)| {
            let dist = euclid(point, last);
            let dt = now.saturating_sub(last_ts);
            #[allow(clippy::cast_precision_loss)]
            let speed = if dt > 0 { dist / dt as f64 * 1000.0 } else { 0.0 };
            (dist, speed)
        });

        let screen = self.attribute_point(point, sample.screen_hint);

        if let (Some((dist, speed)), Some(screen)) = (travel, screen) {
            if dist >= self.options.movement_threshold_px && speed >= self.options.idle_motion_px_s
            {
                trace!("movement on {screen}: {dist:.1}px at {speed:.0}px/s");
                out.push(IntentSignal::pointer_move(screen, point, speed, now));
            }
        }

        match self.hover_anchor {
            Some((anchor, _)) if euclid(point, anchor) > self.options.hover_radius_px => {
                self.hover_anchor = Some((point, now));
                self.hover_emitted = false;
            }
            Some((_, anchor_ts)) => {
                if !self.hover_emitted
                    && now.saturating_sub(anchor_ts) >= self.options.hover_threshold_ms
                    && let Some(screen) = screen
                {
                    trace!("hover on {screen} at {point}");
                    self.hover_emitted = true;
                    out.push(IntentSignal::hover(screen, point, now));
                }
            }
            None => {
                self.hover_anchor = Some((point, now));
                self.hover_emitted = false;
            }
        }

        self.last_sample = Some((point, now));
        out
    }

    /// Injected host event: a mouse click, single or double.
    pub fn click(&self, point: IVec2, double: bool, now: u64) -> Option<IntentSignal> {
        let kind = if double {
            SignalType::DoubleClick
        } else {
            SignalType::Click
        };
        let screen = self.attribute_point(point, None)?;
        Some(IntentSignal::discrete(kind, screen, point, now))
    }

    pub fn drag_started(&self, point: IVec2, now: u64) -> Option<IntentSignal> {
        let screen = self.attribute_point(point, None)?;
        Some(IntentSignal::discrete(
            SignalType::DragStart,
            screen,
            point,
            now,
        ))
    }

    pub fn drag_ended(&self, point: IVec2, now: u64) -> Option<IntentSignal> {
        let screen = self.attribute_point(point, None)?;
        Some(IntentSignal::discrete(
            SignalType::DragEnd,
            screen,
            point,
            now,
        ))
    }

    pub fn scroll(&self, point: IVec2, now: u64) -> Option<IntentSignal> {
        let screen = self.attribute_point(point, None)?;
        Some(IntentSignal::discrete(
            SignalType::Scroll,
            screen,
            point,
            now,
        ))
    }

    /// Injected typing burst. Falls back to the current cursor position
    /// when the host does not report the focused window's display.
    pub fn typing(&self, window_display: Option<ScreenId>, now: u64) -> Option<IntentSignal> {
        let point = self.fallback_point();
        let screen = self.attribute_point(point, window_display)?;
        Some(
            IntentSignal::discrete(SignalType::Typing, screen, point, now)
                .with_window_display(window_display),
        )
    }

    /// Injected window-focus change reported by the host.
    pub fn window_focus(&self, window_display: Option<ScreenId>, now: u64) -> Option<IntentSignal> {
        let point = self.fallback_point();
        let screen = self.attribute_point(point, window_display)?;
        Some(
            IntentSignal::discrete(SignalType::WindowFocus, screen, point, now)
                .with_window_display(window_display),
        )
    }
}
