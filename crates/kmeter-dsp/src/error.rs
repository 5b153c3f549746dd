//! Error types for kmeter-dsp.

use thiserror::Error;

/// Error type for measurement-buffer operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DspError {
    #[error("channel count mismatch: block has {actual} channels, buffer expects {expected}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("channel block lengths differ within one host block")]
    RaggedBlock,

    #[error("block of {samples} samples exceeds window of {window} in channel slice")]
    BlockOutOfRange { samples: usize, window: usize },
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, DspError>;
