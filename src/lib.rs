//! # kmeter
//!
//! K-System audio level metering after Bob Katz.
//!
//! Umbrella crate tying together:
//! - **kmeter-dsp**: measurement primitives (ring buffer, weighted
//!   average level, oversampled true peak, decibel conversions)
//! - **kmeter-engine**: the ballistics state machine and the per-block
//!   chunk orchestration with lock-free readouts
//!
//! # Quick start
//!
//! ```
//! use kmeter::{ChunkProcessor, ProcessorConfig};
//!
//! let mut processor = ChunkProcessor::new(ProcessorConfig::default())?;
//! let levels = processor.ballistics();
//! let controls = processor.controls();
//!
//! // Audio thread: run each host block through the meter.
//! let mut left = vec![0.0f32; 512];
//! let mut right = vec![0.0f32; 512];
//! let mut block: Vec<&mut [f32]> = vec![&mut left, &mut right];
//! processor.process_block(&mut block)?;
//!
//! // Display thread: poll readouts on its own refresh cadence.
//! let _peak = levels.peak_level(0);
//! let _hold = levels.peak_hold_level(0);
//! let _correlation = levels.phase_correlation();
//!
//! // Control thread: flip switches between any two chunks.
//! controls.set_mono(true);
//! # Ok::<(), kmeter::EngineError>(())
//! ```

/// Re-export of kmeter-dsp for direct access.
pub use kmeter_dsp as dsp;
/// Re-export of kmeter-engine for direct access.
pub use kmeter_engine as engine;

pub use kmeter_dsp::{
    decibel_to_level, level_to_decibel, oversampling_factor, AverageAlgorithm,
    AverageLevelFiltered, DspError, RingBuffer, TruePeakMeter, MINIMUM_DECIBEL,
};

pub use kmeter_engine::{
    AtomicCounter, AtomicFlag, AtomicFloat, ChunkProcessor, CrestFactor, EngineError,
    MeterBallistics, MeterControls, ProcessorConfig, DEFAULT_CHUNK_SIZE,
};
