// THEORY:
// This file is the entry point for the `panel_linkage` library crate. The engine
// sits between two independent object detectors (a panel locator and an anomaly
// classifier) and their consumers. It decodes the detectors' normalized label
// output, decides which anomaly labels belong to which panel, and keeps each
// panel's identity stable as it moves across the frames of a video.
//
// The public surface is the session layer in `pipeline` (and its concurrent
// counterpart in `parallel_pipeline`). The leaf components in `core_modules`
// stay public for callers that want to drive the tracker and linker directly.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use error::{Error, Result};
