// THEORY:
// Every failure the linkage engine can report is one variant of `Error`. The
// leaf modules never log-and-swallow: they return the error to the immediate
// caller, who decides whether to skip a file or abort the batch. Conditions
// that are recovered locally (a missing reference image) never appear here.

use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An annotation line had the wrong number of fields or a non-numeric field.
    #[error("malformed annotation on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The reference image exists but its header could not be decoded.
    #[error("failed to read dimensions of reference image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid inspection config: {0}")]
    Config(#[from] serde_json::Error),

    /// A config value parsed but is outside its valid range.
    #[error("invalid inspection config field `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// Frames within one session must be fed in strictly ascending order.
    #[error("frame {frame} arrived after frame {previous}")]
    OutOfOrderFrame { previous: u64, frame: u64 },

    #[error("session worker failed: {0}")]
    Task(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
