// THEORY:
// The `tracker` module gives the linkage engine its memory. A detector reports
// panels frame by frame with no notion that the box in frame N and the box in
// frame N+1 are the same physical panel. The `PanelTracker` closes that gap by
// keeping a registry of every panel it has seen in the current session and
// handing back the same `PanelId` whenever a new box overlaps a known one.
//
// Key architectural principles:
// 1.  **Explicit session scope**: The tracker is an owned value, not global
//     state. A session (one video, or one standalone image) creates or resets
//     its own tracker, so identities never leak between unrelated inputs.
// 2.  **First match wins**: Known panels are scanned in the order they were
//     first seen and the first one whose IoU with the new box is strictly above
//     the threshold is reused. This is not an assignment-optimal tracker; it
//     suits sparse, mostly static solar arrays and degrades when panels are
//     packed tightly or move fast.
// 3.  **Append-only registry**: Panels are never removed and a matched panel's
//     stored box stays frozen at its first sighting. Only unmatched boxes grow
//     the registry.

use crate::core_modules::geometry::{BoundingBox, iou};
use serde::Serialize;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// IoU a new panel box must exceed to inherit a tracked panel's identity.
pub const DEFAULT_IDENTITY_IOU_THRESHOLD: f64 = 0.5;

const PANEL_ID_PREFIX: &str = "Panel_";
const PANEL_ID_TOKEN_LEN: usize = 8;

/// A stable, opaque token naming one physical panel within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PanelId(String);

impl PanelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    fn mint() -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self(format!("{PANEL_ID_PREFIX}{}", &token[..PANEL_ID_TOKEN_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A panel's identity and the box it had when first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPanel {
    pub id: PanelId,
    pub bbox: BoundingBox,
}

/// The per-session registry of known panels, in first-sighting order.
#[derive(Debug, Default)]
pub struct PanelTracker {
    tracked_panels: Vec<TrackedPanel>,
}

impl PanelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every tracked panel. Call once at the start of each session.
    pub fn reset(&mut self) {
        self.tracked_panels.clear();
    }

    /// Returns the identity of the first tracked panel whose IoU with `bbox`
    /// exceeds `iou_threshold`, or mints and registers a new one.
    pub fn match_or_create(&mut self, bbox: &BoundingBox, iou_threshold: f64) -> PanelId {
        if let Some(tracked) = self
            .tracked_panels
            .iter()
            .find(|tracked| iou(bbox, &tracked.bbox) > iou_threshold)
        {
            return tracked.id.clone();
        }

        let mut id = PanelId::mint();
        while self.tracked_panels.iter().any(|tracked| tracked.id == id) {
            id = PanelId::mint();
        }
        debug!(panel = %id, ?bbox, "new panel identity");

        self.tracked_panels.push(TrackedPanel {
            id: id.clone(),
            bbox: *bbox,
        });
        id
    }

    pub fn tracked_panels(&self) -> &[TrackedPanel] {
        &self.tracked_panels
    }

    pub fn len(&self) -> usize {
        self.tracked_panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked_panels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2)
    }

    #[test]
    fn minted_ids_have_panel_prefix() {
        let mut tracker = PanelTracker::new();
        let id =
            tracker.match_or_create(&bbox(0.0, 0.0, 10.0, 10.0), DEFAULT_IDENTITY_IOU_THRESHOLD);
        assert!(id.as_str().starts_with("Panel_"));
        assert_eq!(id.as_str().len(), PANEL_ID_PREFIX.len() + PANEL_ID_TOKEN_LEN);
    }

    #[test]
    fn reset_then_match_always_mints() {
        let mut tracker = PanelTracker::new();
        let b = bbox(0.0, 0.0, 100.0, 100.0);
        let first = tracker.match_or_create(&b, DEFAULT_IDENTITY_IOU_THRESHOLD);

        tracker.reset();
        assert!(tracker.is_empty());
        let second = tracker.match_or_create(&b, DEFAULT_IDENTITY_IOU_THRESHOLD);
        assert_ne!(first, second);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn same_box_twice_reuses_identity() {
        let mut tracker = PanelTracker::new();
        let b = bbox(10.0, 20.0, 110.0, 80.0);
        let first = tracker.match_or_create(&b, DEFAULT_IDENTITY_IOU_THRESHOLD);
        let second = tracker.match_or_create(&b, DEFAULT_IDENTITY_IOU_THRESHOLD);
        assert_eq!(first, second);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn iou_equal_to_threshold_does_not_match() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        let b = bbox(50.0, 0.0, 150.0, 100.0);
        let threshold = iou(&a, &b);

        let mut tracker = PanelTracker::new();
        let first = tracker.match_or_create(&a, threshold);
        let second = tracker.match_or_create(&b, threshold);
        assert_ne!(first, second);

        let mut tracker = PanelTracker::new();
        let first = tracker.match_or_create(&a, threshold - 1e-3);
        let second = tracker.match_or_create(&b, threshold - 1e-3);
        assert_eq!(first, second);
    }

    #[test]
    fn low_overlap_boxes_get_distinct_identities() {
        let mut tracker = PanelTracker::new();
        let left = tracker.match_or_create(&bbox(0.0, 0.0, 100.0, 100.0), 0.5);
        let right = tracker.match_or_create(&bbox(60.0, 0.0, 160.0, 100.0), 0.5);
        assert_ne!(left, right);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn first_tracked_match_wins_over_better_match() {
        let mut tracker = PanelTracker::new();
        let older = tracker.match_or_create(&bbox(0.0, 0.0, 100.0, 100.0), 0.9);
        let newer = tracker.match_or_create(&bbox(20.0, 0.0, 120.0, 100.0), 0.9);
        assert_ne!(older, newer);

        // Overlaps `newer` almost perfectly and `older` less, but `older` comes first.
        let candidate = bbox(19.0, 0.0, 119.0, 100.0);
        let to_newer = iou(&candidate, &bbox(20.0, 0.0, 120.0, 100.0));
        let to_older = iou(&candidate, &bbox(0.0, 0.0, 100.0, 100.0));
        assert!(to_newer > to_older);
        assert_eq!(tracker.match_or_create(&candidate, 0.5), older);
    }

    #[test]
    fn matched_panels_keep_first_sighting_box() {
        let mut tracker = PanelTracker::new();
        let original = bbox(0.0, 0.0, 100.0, 100.0);
        let id = tracker.match_or_create(&original, 0.5);
        assert_eq!(tracker.match_or_create(&original.translated(5.0, 5.0), 0.5), id);

        assert_eq!(tracker.tracked_panels().len(), 1);
        assert_eq!(tracker.tracked_panels()[0].bbox, original);
    }
}
