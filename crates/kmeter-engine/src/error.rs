//! Error types for kmeter-engine.

use kmeter_dsp::DspError;
use thiserror::Error;

/// Error type for engine setup and block processing.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unsupported sample rate: {0} Hz (supported range is 44100 to 192000 Hz)")]
    UnsupportedSampleRate(f64),

    #[error("channel count must be at least 1")]
    NoChannels,

    #[error("chunk size must be a non-zero even number of samples, got {0}")]
    InvalidChunkSize(usize),

    #[error("channel count mismatch: block has {actual} channels, meter expects {expected}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Dsp(#[from] DspError),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, EngineError>;
