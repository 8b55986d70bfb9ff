use thiserror::Error;

/// Broad category of a [`ConvertError`], for callers that only need to branch
/// on what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfiguration,
    FontUnavailable,
    SourceDecodeError,
    SinkWriteFailed,
    Cancelled,
}

/// Errors surfaced by a conversion job.
///
/// Configuration and font errors are raised before the first frame is read.
/// Per-frame errors carry the index of the frame that failed.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Bad columns, fps, font size, ramp or aspect ratio.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No glyph renderer could be built and no fallback was allowed.
    #[error("no usable font: {0}")]
    FontUnavailable(String),

    /// The frame source could not produce the next frame.
    #[error("failed to decode source frame {frame}")]
    SourceDecode {
        /// Index of the source frame being read.
        frame: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The sink rejected an output frame.
    #[error("sink rejected output frame {frame}")]
    SinkWrite {
        /// Index of the output frame being written.
        frame: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Cancellation was observed between frames.
    #[error("conversion cancelled after {emitted} frames")]
    Cancelled {
        /// Number of output frames emitted before cancellation.
        emitted: usize,
    },
}

impl ConvertError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::FontUnavailable(_) => ErrorKind::FontUnavailable,
            Self::SourceDecode { .. } => ErrorKind::SourceDecodeError,
            Self::SinkWrite { .. } => ErrorKind::SinkWriteFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Frame index at failure time, if the error is tied to a frame.
    pub fn frame_index(&self) -> Option<usize> {
        match self {
            Self::SourceDecode { frame, .. } | Self::SinkWrite { frame, .. } => Some(*frame),
            Self::Cancelled { emitted } => Some(*emitted),
            Self::InvalidConfiguration(_) | Self::FontUnavailable(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
