use bevy::math::{IRect, IVec2};
use serde::{Deserialize, Serialize};
use std::fmt;
use stdext::function_name;
use tracing::debug;

use crate::engine::signal::{IntentSignal, SignalType};
use crate::errors::{Error, Result};

/// Opaque, stable identifier of a shared display within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScreenId(pub u32);

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel rectangle of one display in the unified coordinate space, plus its
/// DPI scale factor. The rectangle is half-open: `[x, x+w) × [y, y+h)`, so
/// the column at `x + w` already belongs to the neighbour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayBounds {
    rect: IRect,
    scale: f64,
}

impl DisplayBounds {
    pub fn new(x: i32, y: i32, width: i32, height: i32, scale: f64) -> Self {
        DisplayBounds {
            rect: IRect::new(x, y, x + width, y + height),
            scale,
        }
    }

    pub fn rect(&self) -> IRect {
        self.rect
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Half-open containment test.
    pub fn contains(&self, point: IVec2) -> bool {
        point.x >= self.rect.min.x
            && point.x < self.rect.max.x
            && point.y >= self.rect.min.y
            && point.y < self.rect.max.y
    }

    /// Euclidean distance from `point` to this rectangle; zero inside.
    fn distance_to(&self, point: IVec2) -> f64 {
        let nx = point.x.clamp(self.rect.min.x, self.rect.max.x);
        let ny = point.y.clamp(self.rect.min.y, self.rect.max.y);
        let dx = f64::from(point.x - nx);
        let dy = f64::from(point.y - ny);
        (dx * dx + dy * dy).sqrt()
    }

    /// Proximity score used for off-screen attribution: `1 / (1 + distance)`.
    pub fn proximity(&self, point: IVec2) -> f64 {
        1.0 / (1.0 + self.distance_to(point))
    }

    /// True when the half-open rectangles share any area.
    fn overlaps(&self, other: &DisplayBounds) -> bool {
        self.rect.min.x < other.rect.max.x
            && other.rect.min.x < self.rect.max.x
            && self.rect.min.y < other.rect.max.y
            && other.rect.min.y < self.rect.max.y
    }
}

/// Serialized form of one display, as it appears in the configuration file
/// and in topology-change events.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreenEntry {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// The set of shared displays, in a fixed iteration order.
///
/// The order is the deterministic tie-break for attribution, so the
/// topology is a vector rather than a map. The set is replaced atomically
/// (via `arc-swap` in the harness) rather than mutated.
#[derive(Clone, Debug, Default)]
pub struct DisplayTopology {
    screens: Vec<(ScreenId, DisplayBounds)>,
}

impl DisplayTopology {
    /// Builds and validates a topology.
    ///
    /// Rejects duplicate ids, non-positive sizes, overlapping rectangles
    /// and more than `max_screens` entries. Gaps between displays are
    /// fine.
    pub fn from_entries(entries: &[ScreenEntry], max_screens: usize) -> Result<Self> {
        if entries.len() > max_screens {
            return Err(Error::InvalidConfig(format!(
                "{}: {} displays configured, at most {max_screens} supported",
                function_name!(),
                entries.len(),
            )));
        }

        let mut screens: Vec<(ScreenId, DisplayBounds)> = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.width <= 0 || entry.height <= 0 {
                return Err(Error::InvalidConfig(format!(
                    "{}: display {} has a degenerate size {}x{}",
                    function_name!(),
                    entry.id,
                    entry.width,
                    entry.height,
                )));
            }
            let id = ScreenId(entry.id);
            let bounds = DisplayBounds::new(entry.x, entry.y, entry.width, entry.height, entry.scale);
            for (other_id, other) in &screens {
                if *other_id == id {
                    return Err(Error::InvalidConfig(format!(
                        "{}: duplicate display id {id}",
                        function_name!(),
                    )));
                }
                if bounds.overlaps(other) {
                    return Err(Error::InvalidConfig(format!(
                        "{}: displays {id} and {other_id} overlap",
                        function_name!(),
                    )));
                }
            }
            debug!(
                "display {id}: {}x{} at ({}, {}), scale {}",
                entry.width,
                entry.height,
                entry.x,
                entry.y,
                bounds.scale(),
            );
            screens.push((id, bounds));
        }
        Ok(DisplayTopology { screens })
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    /// First display in iteration order; the engine pins this one at
    /// construction.
    pub fn first(&self) -> Option<ScreenId> {
        self.screens.first().map(|(id, _)| *id)
    }

    pub fn contains(&self, id: ScreenId) -> bool {
        self.screens.iter().any(|(known, _)| *known == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScreenId, &DisplayBounds)> {
        self.screens.iter().map(|(id, bounds)| (*id, bounds))
    }

    /// The display whose half-open rectangle contains `point`, if any.
    /// Rectangles never overlap, so the first hit is the only hit.
    pub fn locate(&self, point: IVec2) -> Option<ScreenId> {
        self.screens
            .iter()
            .find_map(|(id, bounds)| bounds.contains(point).then_some(*id))
    }

    /// The display closest to `point` by proximity score. Ties resolve to
    /// the earlier entry, which keeps attribution deterministic.
    pub fn nearest(&self, point: IVec2) -> Option<ScreenId> {
        let mut best: Option<(ScreenId, f64)> = None;
        for (id, bounds) in &self.screens {
            let score = bounds.proximity(point);
            if best.is_none_or(|(_, current)| score > current) {
                best = Some((*id, score));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Resolves `point` to a display: containment first, proximity second.
    pub fn resolve_point(&self, point: IVec2) -> Option<ScreenId> {
        self.locate(point).or_else(|| self.nearest(point))
    }

    /// Maps a signal to at most one display.
    ///
    /// In order: a pre-attributed screen the topology knows wins; a
    /// window-focus signal follows the reported window display; everything
    /// else is resolved from the pointer position. An empty topology
    /// yields `None`, which suppresses the signal.
    pub fn attribute(&self, signal: &IntentSignal) -> Option<ScreenId> {
        if let Some(screen) = signal.screen
            && self.contains(screen)
        {
            return Some(screen);
        }
        if signal.kind == SignalType::WindowFocus
            && let Some(screen) = signal.window_display
            && self.contains(screen)
        {
            return Some(screen);
        }
        self.resolve_point(signal.point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_wide() -> DisplayTopology {
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
                scale: 2.0,
            },
        ];
        DisplayTopology::from_entries(&entries, 3).unwrap()
    }

    #[test]
    fn test_half_open_boundaries() {
        let topology = three_wide();
        // The right edge column belongs to the neighbour, not to us.
        assert_eq!(topology.locate(IVec2::new(1919, 500)), Some(ScreenId(1)));
        assert_eq!(topology.locate(IVec2::new(1920, 500)), Some(ScreenId(2)));
        assert_eq!(topology.locate(IVec2::new(0, 0)), Some(ScreenId(1)));
        // Below the bottom edge is outside.
        assert_eq!(topology.locate(IVec2::new(100, 1080)), None);
    }

    #[test]
    fn test_gap_points_resolve_to_nearest() {
        let topology = three_wide();
        // The gap between displays 2 and 3 spans x in [3840, 4480).
        assert_eq!(topology.locate(IVec2::new(4000, 500)), None);
        assert_eq!(
            topology.resolve_point(IVec2::new(3900, 500)),
            Some(ScreenId(2))
        );
        assert_eq!(
            topology.resolve_point(IVec2::new(4400, 500)),
            Some(ScreenId(3))
        );
    }

    #[test]
    fn test_proximity_tie_breaks_by_order() {
        // Exact midpoint of the gap: equidistant, earlier entry wins.
        let entries = [
            ScreenEntry {
                id: 7,
                x: 0,
                y: 0,
                width: 100,
                height: 100,
                scale: 1.0,
            },
            ScreenEntry {
                id: 8,
                x: 200,
                y: 0,
                width: 100,
                height: 100,
                scale: 1.0,
            },
        ];
        let topology = DisplayTopology::from_entries(&entries, 3).unwrap();
        assert_eq!(
            topology.resolve_point(IVec2::new(150, 50)),
            Some(ScreenId(7))
        );
    }

    #[test]
    fn test_rejects_overlap_and_duplicates() {
        let overlapping = [
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
                x: 1900,
                y: 0,
                width: 1920,
                height: 1080,
                scale: 1.0,
            },
        ];
        assert!(DisplayTopology::from_entries(&overlapping, 3).is_err());

        let duplicate = [
            ScreenEntry {
                id: 1,
                x: 0,
                y: 0,
                width: 100,
                height: 100,
                scale: 1.0,
            },
            ScreenEntry {
                id: 1,
                x: 200,
                y: 0,
                width: 100,
                height: 100,
                scale: 1.0,
            },
        ];
        assert!(DisplayTopology::from_entries(&duplicate, 3).is_err());
    }

    #[test]
    fn test_rejects_too_many_screens() {
        let entries: Vec<ScreenEntry> = (0..4)
            .map(|i| ScreenEntry {
                id: i,
                x: i32::try_from(i).unwrap() * 1000,
                y: 0,
                width: 800,
                height: 600,
                scale: 1.0,
            })
            .collect();
        assert!(DisplayTopology::from_entries(&entries, 3).is_err());
        assert!(DisplayTopology::from_entries(&entries, 4).is_ok());
    }

    #[test]
    fn test_empty_topology_attributes_nothing() {
        let topology = DisplayTopology::default();
        assert_eq!(topology.resolve_point(IVec2::new(10, 10)), None);
        assert!(topology.first().is_none());
    }
}
