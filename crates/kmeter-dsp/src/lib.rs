//! # kmeter-dsp
//!
//! Measurement DSP for a K-System level meter.
//!
//! This crate holds the single-threaded measurement primitives the
//! ballistics engine consumes once per chunk:
//!
//! - **RingBuffer**: multi-channel circular store decoupling host block
//!   size from the internal chunk size, with pre-delay-aligned windowed
//!   read-back
//! - **AverageLevelFiltered**: selectable perceptual weighting (plain
//!   band-limited RMS or ITU-R BS.1770) reporting decibel-domain
//!   average levels
//! - **TruePeakMeter**: oversampled inter-sample peak estimation per
//!   ITU-R BS.1770 Annex 2
//! - **units**: decibel conversions clamped at the shared meter floor
//!
//! All per-chunk paths are allocation-free and lock-free; buffers are
//! sized at construction and components are rebuilt whenever the sample
//! rate or channel count changes.

pub mod average_level;
pub mod error;
pub mod ring_buffer;
pub mod true_peak;
pub mod units;

pub use average_level::{AverageAlgorithm, AverageLevelFiltered};
pub use error::{DspError, Result};
pub use ring_buffer::RingBuffer;
pub use true_peak::{oversampling_factor, TruePeakMeter};
pub use units::{decibel_to_level, level_to_decibel, MINIMUM_DECIBEL};
