// THEORY:
// The `linker` answers the question the whole engine exists for: which anomaly
// labels belong to which panel in this frame?
//
// For every panel detection, in input order, it:
// 1.  Resolves the panel's session identity through the `PanelTracker`.
// 2.  Attributes an anomaly's label to that panel when any one of three geometric
//     tests passes: IoU above a fixed 0.3, the anomaly's centroid inside the
//     panel, or the panel lying wholly inside the anomaly.
// 3.  Marks panels that collected nothing as "Not Classified".
//
// The 0.3 attribution threshold is deliberately independent of the identity
// threshold the tracker uses. An anomaly may be attributed to several panels
// (a crack across the seam between two panels) or to none.

use crate::core_modules::geometry::{BoundingBox, center_inside, fully_inside, iou};
use crate::core_modules::label_decoder::Detection;
use crate::core_modules::tracker::{PanelId, PanelTracker};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// IoU above which an anomaly is attributed to a panel. Not configurable.
pub const ANOMALY_ATTRIBUTION_IOU_THRESHOLD: f64 = 0.3;

/// Label given to a panel with no attributed anomalies.
pub const NOT_CLASSIFIED: &str = "Not Classified";

/// Panel identity to the set of anomaly labels attributed to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PanelAnomalyMap(BTreeMap<PanelId, BTreeSet<String>>);

impl PanelAnomalyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, panel: &PanelId) -> Option<&BTreeSet<String>> {
        self.0.get(panel)
    }

    pub fn contains_panel(&self, panel: &PanelId) -> bool {
        self.0.contains_key(panel)
    }

    pub fn panel_ids(&self) -> impl Iterator<Item = &PanelId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PanelId, &BTreeSet<String>)> {
        self.0.iter()
    }

    /// Ensures `panel` has an entry and returns its label set.
    pub fn entry(&mut self, panel: PanelId) -> &mut BTreeSet<String> {
        self.0.entry(panel).or_default()
    }

    /// Unions every label set of `other` into this map.
    pub fn merge(&mut self, other: &PanelAnomalyMap) {
        for (panel, labels) in other.iter() {
            self.entry(panel.clone()).extend(labels.iter().cloned());
        }
    }
}

/// True when an anomaly box should be attributed to a panel box.
pub fn is_attributed(panel: &BoundingBox, anomaly: &BoundingBox) -> bool {
    iou(panel, anomaly) > ANOMALY_ATTRIBUTION_IOU_THRESHOLD
        || center_inside(panel, anomaly)
        || fully_inside(panel, anomaly)
}

/// Links one frame's anomalies to its panels, resolving panel identities
/// through `tracker`.
pub fn link(
    tracker: &mut PanelTracker,
    panels: &[Detection],
    anomalies: &[Detection],
    iou_threshold: f64,
) -> PanelAnomalyMap {
    let mut map = PanelAnomalyMap::new();

    for panel in panels {
        let panel_id = tracker.match_or_create(&panel.bbox, iou_threshold);
        let labels = map.entry(panel_id.clone());

        for anomaly in anomalies {
            if is_attributed(&panel.bbox, &anomaly.bbox) {
                trace!(panel = %panel_id, label = %anomaly.class_name, "anomaly attributed");
                labels.insert(anomaly.class_name.clone());
            }
        }
    }

    for labels in map.0.values_mut() {
        if labels.is_empty() {
            labels.insert(NOT_CLASSIFIED.to_string());
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::tracker::DEFAULT_IDENTITY_IOU_THRESHOLD;

    fn panel(x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
        Detection::new(0, "panel", BoundingBox::new(x1, y1, x2, y2))
    }

    fn anomaly(name: &str, x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
        Detection::new(0, name, BoundingBox::new(x1, y1, x2, y2))
    }

    fn labels(map: &PanelAnomalyMap, panel: &PanelId) -> Vec<String> {
        map.get(panel).unwrap().iter().cloned().collect()
    }

    #[test]
    fn no_panels_yields_empty_map() {
        let mut tracker = PanelTracker::new();
        let anomalies = vec![anomaly("cracked", 0.0, 0.0, 10.0, 10.0)];
        let map = link(&mut tracker, &[], &anomalies, DEFAULT_IDENTITY_IOU_THRESHOLD);
        assert!(map.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn no_anomalies_marks_every_panel_not_classified() {
        let mut tracker = PanelTracker::new();
        let panels = vec![panel(0.0, 0.0, 100.0, 100.0), panel(300.0, 0.0, 400.0, 100.0)];
        let map = link(&mut tracker, &panels, &[], DEFAULT_IDENTITY_IOU_THRESHOLD);
        assert_eq!(map.len(), 2);
        for (_, set) in map.iter() {
            assert_eq!(set.iter().collect::<Vec<_>>(), vec![NOT_CLASSIFIED]);
        }
    }

    #[test]
    fn small_anomaly_inside_panel_is_attributed() {
        let mut tracker = PanelTracker::new();
        let panels = vec![panel(0.0, 0.0, 100.0, 100.0)];
        let anomalies = vec![anomaly("cracked", 10.0, 10.0, 20.0, 20.0)];
        let map = link(&mut tracker, &panels, &anomalies, DEFAULT_IDENTITY_IOU_THRESHOLD);

        assert_eq!(map.len(), 1);
        let id = map.panel_ids().next().unwrap().clone();
        assert_eq!(labels(&map, &id), vec!["cracked"]);
    }

    #[test]
    fn disjoint_anomaly_is_not_attributed() {
        let mut tracker = PanelTracker::new();
        let panels = vec![panel(0.0, 0.0, 100.0, 100.0)];
        let anomalies = vec![anomaly("dusty", 200.0, 200.0, 300.0, 300.0)];
        let map = link(&mut tracker, &panels, &anomalies, DEFAULT_IDENTITY_IOU_THRESHOLD);

        let id = map.panel_ids().next().unwrap().clone();
        assert_eq!(labels(&map, &id), vec![NOT_CLASSIFIED]);
    }

    #[test]
    fn overlap_above_attribution_threshold_is_attributed() {
        // Centroid (110, 50) is outside the panel; IoU is 80*100 / 120*100 = 0.67.
        let p = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let a = BoundingBox::new(20.0, 0.0, 200.0, 100.0);
        assert!(!center_inside(&p, &a));
        assert!(iou(&p, &a) > ANOMALY_ATTRIBUTION_IOU_THRESHOLD);
        assert!(is_attributed(&p, &a));

        // Centroid (125, 50) outside, IoU 50/200 = 0.25: not attributed.
        let weak = BoundingBox::new(50.0, 0.0, 200.0, 100.0);
        assert!(!is_attributed(&p, &weak));
    }

    #[test]
    fn panel_inside_large_anomaly_is_attributed() {
        // A huge dust region whose centroid misses the panel and whose IoU is tiny.
        let p = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let a = BoundingBox::new(-5.0, -5.0, 500.0, 500.0);
        assert!(!center_inside(&p, &a));
        assert!(iou(&p, &a) < ANOMALY_ATTRIBUTION_IOU_THRESHOLD);
        assert!(is_attributed(&p, &a));
    }

    #[test]
    fn anomaly_on_seam_is_attributed_to_both_panels() {
        let mut tracker = PanelTracker::new();
        let panels = vec![panel(0.0, 0.0, 100.0, 100.0), panel(100.0, 0.0, 200.0, 100.0)];
        let anomalies = vec![anomaly("cracked", 90.0, 40.0, 110.0, 60.0)];
        let map = link(&mut tracker, &panels, &anomalies, DEFAULT_IDENTITY_IOU_THRESHOLD);

        assert_eq!(map.len(), 2);
        for (_, set) in map.iter() {
            assert!(set.contains("cracked"));
        }
    }

    #[test]
    fn multiple_labels_collect_into_one_set() {
        let mut tracker = PanelTracker::new();
        let panels = vec![panel(0.0, 0.0, 100.0, 100.0)];
        let anomalies = vec![
            anomaly("cracked", 10.0, 10.0, 20.0, 20.0),
            anomaly("dusty", 50.0, 50.0, 70.0, 70.0),
            anomaly("cracked", 80.0, 80.0, 90.0, 90.0),
        ];
        let map = link(&mut tracker, &panels, &anomalies, DEFAULT_IDENTITY_IOU_THRESHOLD);
        let id = map.panel_ids().next().unwrap().clone();
        assert_eq!(labels(&map, &id), vec!["cracked", "dusty"]);
    }

    #[test]
    fn duplicate_identity_in_one_frame_merges_labels() {
        let mut tracker = PanelTracker::new();
        // Both detections resolve to the same tracked panel.
        let panels = vec![panel(0.0, 0.0, 100.0, 100.0), panel(2.0, 0.0, 102.0, 100.0)];
        let anomalies = vec![
            // Centroid (1, 50): inside the first panel only.
            anomaly("cracked", 0.0, 45.0, 2.0, 55.0),
            // Centroid (101, 50): inside the second panel only.
            anomaly("dusty", 100.0, 45.0, 102.0, 55.0),
        ];
        let map = link(&mut tracker, &panels, &anomalies, DEFAULT_IDENTITY_IOU_THRESHOLD);

        assert_eq!(map.len(), 1);
        assert_eq!(tracker.len(), 1);
        let id = map.panel_ids().next().unwrap().clone();
        assert_eq!(labels(&map, &id), vec!["cracked", "dusty"]);
    }

    #[test]
    fn identities_persist_across_calls() {
        let mut tracker = PanelTracker::new();
        let first = link(&mut tracker, &[panel(0.0, 0.0, 100.0, 100.0)], &[], 0.5);
        let second = link(&mut tracker, &[panel(3.0, 1.0, 103.0, 101.0)], &[], 0.5);
        assert_eq!(
            first.panel_ids().collect::<Vec<_>>(),
            second.panel_ids().collect::<Vec<_>>()
        );
    }

    #[test]
    fn merge_unions_label_sets() {
        let a = PanelId::new("Panel_a");
        let b = PanelId::new("Panel_b");
        let mut left = PanelAnomalyMap::new();
        left.entry(a.clone()).insert("cracked".to_string());
        let mut right = PanelAnomalyMap::new();
        right.entry(a.clone()).insert("dusty".to_string());
        right.entry(b.clone()).insert(NOT_CLASSIFIED.to_string());

        assert!(!left.contains_panel(&b));
        left.merge(&right);
        assert!(left.contains_panel(&a) && left.contains_panel(&b));
        assert!(!left.contains_panel(&PanelId::new("Panel_c")));
        assert_eq!(labels(&left, &a), vec!["cracked", "dusty"]);
        assert_eq!(labels(&left, &b), vec![NOT_CLASSIFIED]);
    }
}
