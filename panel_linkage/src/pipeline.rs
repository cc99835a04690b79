// THEORY:
// The `pipeline` module is the top-level API of the linkage engine. It wraps the
// leaf modules into a session: one video (or one standalone image) whose panel
// identities are tracked by a single `PanelTracker`.
//
// A session is fed frames in strictly ascending order. For each frame it links
// anomalies to panels and folds the result into a running summary: the union of
// labels per panel across the whole stream, how often each condition label was
// seen, and a change log that records a frame's mapping only when it differs
// from the previous frame's.

use crate::core_modules::label_decoder::{
    ClassMap, Detection, ReferenceDimensions, decode_label_file,
};
use crate::core_modules::label_files::{common_frames, index_label_directory, read_label_lines};
use crate::core_modules::linker::{PanelAnomalyMap, link};
use crate::core_modules::tracker::{DEFAULT_IDENTITY_IOU_THRESHOLD, PanelTracker};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::linker::NOT_CLASSIFIED;
pub use crate::core_modules::tracker::PanelId;

pub const CRACKED: &str = "cracked";
pub const DUSTY: &str = "dusty";
pub const NORMAL: &str = "normal";

/// Configuration for an inspection session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// IoU a panel box must exceed to keep a tracked panel's identity.
    pub identity_iou_threshold: f64,
    pub panel_classes: ClassMap,
    pub anomaly_classes: ClassMap,
    /// Image whose header gives the frame size that label coordinates are scaled to.
    /// When absent or missing, 640x640 is assumed.
    pub reference_image: Option<PathBuf>,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            identity_iou_threshold: DEFAULT_IDENTITY_IOU_THRESHOLD,
            panel_classes: ClassMap::panels(),
            anomaly_classes: ClassMap::anomalies(),
            reference_image: None,
        }
    }
}

impl InspectionConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// The identity threshold must be finite and in `[0, 1)`. Below zero every
    /// pair of boxes matches; at one or above no pair ever can.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.identity_iou_threshold;
        if !threshold.is_finite() || !(0.0..1.0).contains(&threshold) {
            return Err(Error::InvalidConfig {
                field: "identity_iou_threshold",
                reason: format!("{threshold} is outside [0, 1)"),
            });
        }
        Ok(())
    }

    pub fn reference_dimensions(&self) -> Result<ReferenceDimensions> {
        ReferenceDimensions::from_reference_image(self.reference_image.as_deref())
    }
}

/// How many per-frame panel entries carried each condition label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelCounts {
    pub cracked: usize,
    pub dusty: usize,
    pub normal: usize,
}

impl LabelCounts {
    fn record(&mut self, label: &str) {
        match label {
            CRACKED => self.cracked += 1,
            DUSTY => self.dusty += 1,
            NORMAL => self.normal += 1,
            _ => {}
        }
    }
}

/// Per-panel condition tally, one condition per panel: cracked outranks dusty,
/// which outranks normal. Panels with none of the three count only in `panels`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConditionBreakdown {
    pub panels: usize,
    pub normal: usize,
    pub dusty: usize,
    pub cracked: usize,
}

impl ConditionBreakdown {
    pub fn from_map(map: &PanelAnomalyMap) -> Self {
        let mut breakdown = Self {
            panels: map.len(),
            ..Self::default()
        };
        for (_, labels) in map.iter() {
            if labels.contains(CRACKED) {
                breakdown.cracked += 1;
            } else if labels.contains(DUSTY) {
                breakdown.dusty += 1;
            } else if labels.iter().any(|l| l.eq_ignore_ascii_case(NORMAL)) {
                breakdown.normal += 1;
            }
        }
        breakdown
    }
}

/// A frame's mapping, recorded when it differs from the frame before it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMapping {
    pub frame: u64,
    pub map: PanelAnomalyMap,
}

/// The cross-frame result of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub frames_processed: usize,
    /// Sum over frames of the number of panels in that frame's map.
    pub panel_observations: usize,
    pub label_counts: LabelCounts,
    /// Union of every frame's labels per panel identity.
    pub merged: PanelAnomalyMap,
    pub frame_changes: Vec<FrameMapping>,
}

impl SessionSummary {
    pub fn condition_breakdown(&self) -> ConditionBreakdown {
        ConditionBreakdown::from_map(&self.merged)
    }
}

/// One tracking session over an ordered stream of frames.
pub struct InspectionSession {
    config: InspectionConfig,
    dimensions: ReferenceDimensions,
    tracker: PanelTracker,
    last_frame: Option<u64>,
    last_frame_map: Option<PanelAnomalyMap>,
    merged: PanelAnomalyMap,
    label_counts: LabelCounts,
    panel_observations: usize,
    frames_processed: usize,
    frame_changes: Vec<FrameMapping>,
}

impl InspectionSession {
    /// Starts a session, probing the configured reference image.
    pub fn new(config: InspectionConfig) -> Result<Self> {
        config.validate()?;
        let dimensions = config.reference_dimensions()?;
        Self::with_dimensions(config, dimensions)
    }

    pub fn with_dimensions(
        config: InspectionConfig,
        dimensions: ReferenceDimensions,
    ) -> Result<Self> {
        config.validate()?;
        let mut tracker = PanelTracker::new();
        tracker.reset();
        Ok(Self {
            config,
            dimensions,
            tracker,
            last_frame: None,
            last_frame_map: None,
            merged: PanelAnomalyMap::new(),
            label_counts: LabelCounts::default(),
            panel_observations: 0,
            frames_processed: 0,
            frame_changes: Vec::new(),
        })
    }

    /// Links one frame. Frame numbers must strictly increase within a session;
    /// a rejected frame leaves the session untouched.
    pub fn process_frame(
        &mut self,
        frame: u64,
        panels: &[Detection],
        anomalies: &[Detection],
    ) -> Result<PanelAnomalyMap> {
        if let Some(previous) = self.last_frame {
            if frame <= previous {
                return Err(Error::OutOfOrderFrame { previous, frame });
            }
        }
        self.last_frame = Some(frame);

        let map = link(
            &mut self.tracker,
            panels,
            anomalies,
            self.config.identity_iou_threshold,
        );
        let first_seen = map
            .panel_ids()
            .filter(|id| !self.merged.contains_panel(id))
            .count();
        debug!(frame, panels = map.len(), first_seen, "frame linked");

        self.frames_processed += 1;
        self.panel_observations += map.len();
        for (_, labels) in map.iter() {
            for label in labels {
                self.label_counts.record(label);
            }
        }
        self.merged.merge(&map);

        if self.last_frame_map.as_ref() != Some(&map) {
            self.frame_changes.push(FrameMapping {
                frame,
                map: map.clone(),
            });
            self.last_frame_map = Some(map.clone());
        }

        Ok(map)
    }

    /// Decodes both detectors' label lines for `frame` and links them.
    pub fn process_label_frame<S: AsRef<str>>(
        &mut self,
        frame: u64,
        panel_lines: &[S],
        anomaly_lines: &[S],
    ) -> Result<PanelAnomalyMap> {
        let panels = decode_label_file(panel_lines, &self.config.panel_classes, self.dimensions)?;
        let anomalies =
            decode_label_file(anomaly_lines, &self.config.anomaly_classes, self.dimensions)?;
        self.process_frame(frame, &panels, &anomalies)
    }

    pub fn tracker(&self) -> &PanelTracker {
        &self.tracker
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    pub fn finish(self) -> SessionSummary {
        info!(
            frames = self.frames_processed,
            panels = self.merged.len(),
            "inspection session finished"
        );
        SessionSummary {
            frames_processed: self.frames_processed,
            panel_observations: self.panel_observations,
            label_counts: self.label_counts,
            merged: self.merged,
            frame_changes: self.frame_changes,
        }
    }
}

/// Links a standalone image as its own session.
pub fn inspect_image<S: AsRef<str>>(
    config: &InspectionConfig,
    panel_lines: &[S],
    anomaly_lines: &[S],
) -> Result<PanelAnomalyMap> {
    let mut session = InspectionSession::new(config.clone())?;
    session.process_label_frame(0, panel_lines, anomaly_lines)
}

/// Runs a whole video from the two detectors' per-frame label directories.
/// Only frames labelled by both detectors are linked; the first malformed label
/// file aborts the session.
pub fn run_video_session(
    config: &InspectionConfig,
    panel_dir: &Path,
    anomaly_dir: &Path,
) -> Result<SessionSummary> {
    let panel_index = index_label_directory(panel_dir)?;
    let anomaly_index = index_label_directory(anomaly_dir)?;
    let frames = common_frames(&panel_index, &anomaly_index);

    let unmatched = panel_index.len() + anomaly_index.len() - 2 * frames.len();
    if unmatched > 0 {
        warn!(unmatched, "frames labelled by only one detector are skipped");
    }
    info!(
        panel_frames = panel_index.len(),
        anomaly_frames = anomaly_index.len(),
        common_frames = frames.len(),
        "starting inspection session"
    );

    let mut session = InspectionSession::new(config.clone())?;
    for frame in frames {
        let panel_lines = read_label_lines(&panel_index[&frame])?;
        let anomaly_lines = read_label_lines(&anomaly_index[&frame])?;
        session.process_label_frame(frame, &panel_lines, &anomaly_lines)?;
    }
    Ok(session.finish())
}
