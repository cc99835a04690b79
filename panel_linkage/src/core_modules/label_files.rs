// THEORY:
// When a detector runs over a video it writes one label file per frame that had
// detections, named `<stem>_<frame>.txt`. The two detectors run independently,
// so each can skip frames the other kept. This module indexes a label directory
// by frame number and aligns two such indexes so that only frames present in
// both are linked, in ascending order.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extracts the frame number from a `<stem>_<digits>.txt` file name.
pub fn frame_number_from_path(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".txt")?;
    let (_, digits) = stem.rsplit_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Indexes every frame-numbered `.txt` file directly under `dir`. When two files
/// share a frame number (`clip_1.txt` and `clip_01.txt`) the path that sorts
/// first is kept and the other is dropped with a warning.
pub fn index_label_directory(dir: &Path) -> Result<BTreeMap<u64, PathBuf>> {
    let mut index = BTreeMap::new();
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;

    for entry in entries {
        let mut path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
            continue;
        }
        match frame_number_from_path(&path) {
            Some(frame) => match index.get_mut(&frame) {
                Some(kept) => {
                    if path < *kept {
                        std::mem::swap(kept, &mut path);
                    }
                    warn!(
                        frame,
                        kept = %kept.display(),
                        dropped = %path.display(),
                        "two label files share a frame number"
                    );
                }
                None => {
                    index.insert(frame, path);
                }
            },
            None => warn!(path = %path.display(), "label file has no frame number; skipping"),
        }
    }

    Ok(index)
}

/// Ascending frame numbers present in both indexes.
pub fn common_frames<A, B>(panels: &BTreeMap<u64, A>, anomalies: &BTreeMap<u64, B>) -> Vec<u64> {
    panels
        .keys()
        .filter(|frame| anomalies.contains_key(frame))
        .copied()
        .collect()
}

pub fn read_label_lines(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(contents.lines().map(str::to_owned).collect())
}
