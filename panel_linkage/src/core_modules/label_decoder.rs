// THEORY:
// The `label_decoder` is the bridge between the external detectors and the
// linkage engine. Both detectors write one text line per detected box in the
// normalized convention:
//
//     <class> <x_center> <y_center> <width> <height> [confidence]
//
// where every coordinate is a fraction of the image dimensions. This module turns
// each line into a `Detection` in absolute pixel space.
//
// Key architectural principles:
// 1.  **Reference dimensions**: Pixel coordinates only exist relative to a frame
//     size. It is read from a reference image's header when one is available
//     and falls back to 640x640 otherwise. The fallback is a recovered condition, not an
//     error, but it is logged because it can distort localization.
// 2.  **Truncation**: Each pixel corner is truncated toward zero, so decoded boxes
//     always carry whole-pixel coordinates.
// 3.  **Forgiving class names, strict numbers**: An unknown class index becomes
//     `class_<index>`; a malformed line is a hard `Error::Parse` because it means
//     the upstream output is corrupt.

use crate::core_modules::geometry::BoundingBox;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_REFERENCE_WIDTH: u32 = 640;
pub const DEFAULT_REFERENCE_HEIGHT: u32 = 640;

/// Mapping from a detector's class index to its human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMap(BTreeMap<u32, String>);

impl ClassMap {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (u32, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(index, name)| (index, name.to_string()))
                .collect(),
        )
    }

    /// The panel locator's classes.
    pub fn panels() -> Self {
        Self::from_pairs([(0, "panel")])
    }

    /// The anomaly classifier's classes.
    pub fn anomalies() -> Self {
        Self::from_pairs([(0, "cracked"), (1, "dusty"), (2, "normal")])
    }

    /// Looks up a class name, synthesizing `class_<index>` for unknown indices.
    pub fn name_for(&self, class_index: u32) -> String {
        self.0
            .get(&class_index)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_index}"))
    }
}

/// The frame size that normalized coordinates are scaled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceDimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for ReferenceDimensions {
    fn default() -> Self {
        Self {
            width: DEFAULT_REFERENCE_WIDTH,
            height: DEFAULT_REFERENCE_HEIGHT,
        }
    }
}

impl ReferenceDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Reads the dimensions from the header of `reference_image`.
    ///
    /// A missing path (or a path that does not exist) recovers to the 640x640
    /// default. A file that exists but cannot be decoded is an error.
    pub fn from_reference_image(reference_image: Option<&Path>) -> Result<Self> {
        let (default_w, default_h) = (DEFAULT_REFERENCE_WIDTH, DEFAULT_REFERENCE_HEIGHT);
        let Some(path) = reference_image else {
            warn!("no reference image; assuming {default_w}x{default_h}");
            return Ok(Self::default());
        };
        if !path.exists() {
            warn!(
                path = %path.display(),
                "reference image missing; assuming {default_w}x{default_h}"
            );
            return Ok(Self::default());
        }

        let (width, height) = image::image_dimensions(path).map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { width, height })
    }
}

/// One normalized annotation line, before scaling to pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationRecord {
    pub class_index: u32,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
    /// Present when the detector was asked to save confidences.
    pub confidence: Option<f64>,
}

impl AnnotationRecord {
    /// Parses one whitespace-separated line. `line_number` is 1-based and only
    /// used for error reporting.
    pub fn parse(line: &str, line_number: usize) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 && fields.len() != 6 {
            return Err(Error::Parse {
                line: line_number,
                reason: format!("expected 5 or 6 fields, found {}", fields.len()),
            });
        }

        let number = |index: usize, name: &str| -> Result<f64> {
            let raw = fields[index];
            match raw.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                _ => Err(Error::Parse {
                    line: line_number,
                    reason: format!("{name} `{raw}` is not a finite number"),
                }),
            }
        };

        let class_value = number(0, "class")?;
        if class_value < 0.0 || class_value > u32::MAX as f64 {
            return Err(Error::Parse {
                line: line_number,
                reason: format!("class `{}` is not a valid index", fields[0]),
            });
        }

        Ok(Self {
            class_index: class_value.trunc() as u32,
            x_center: number(1, "x_center")?,
            y_center: number(2, "y_center")?,
            width: number(3, "width")?,
            height: number(4, "height")?,
            confidence: if fields.len() == 6 {
                Some(number(5, "confidence")?)
            } else {
                None
            },
        })
    }

    /// Scales the record to absolute pixel corners, truncating toward zero.
    pub fn to_bbox(&self, dimensions: ReferenceDimensions) -> BoundingBox {
        let width_px = dimensions.width as f64;
        let height_px = dimensions.height as f64;
        BoundingBox::new(
            ((self.x_center - self.width / 2.0) * width_px).trunc(),
            ((self.y_center - self.height / 2.0) * height_px).trunc(),
            ((self.x_center + self.width / 2.0) * width_px).trunc(),
            ((self.y_center + self.height / 2.0) * height_px).trunc(),
        )
    }
}

/// A decoded detection in pixel space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub bbox: BoundingBox,
    pub confidence: Option<f64>,
}

impl Detection {
    pub fn new(class_id: u32, class_name: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            bbox,
            confidence: None,
        }
    }
}

pub fn decode(
    record: &AnnotationRecord,
    class_map: &ClassMap,
    dimensions: ReferenceDimensions,
) -> Detection {
    Detection {
        class_id: record.class_index,
        class_name: class_map.name_for(record.class_index),
        bbox: record.to_bbox(dimensions),
        confidence: record.confidence,
    }
}

/// Decodes every non-blank line of a label file. The first malformed line aborts
/// the whole file.
pub fn decode_label_file<I, S>(
    lines: I,
    class_map: &ClassMap,
    dimensions: ReferenceDimensions,
) -> Result<Vec<Detection>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut detections = Vec::new();
    for (index, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }
        let record = AnnotationRecord::parse(line, index + 1)?;
        detections.push(decode(&record, class_map, dimensions));
    }
    Ok(detections)
}
