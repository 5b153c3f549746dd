//! # kmeter-engine
//!
//! Ballistics engine of a K-System level meter.
//!
//! The engine turns raw per-chunk measurements into the slowly-evolving
//! readouts a meter display redraws every refresh:
//!
//! - **MeterBallistics**: per-channel level state machine (live levels,
//!   hold markers, session maximum, overflow tally, stereo balance,
//!   phase correlation, dynamic range) with lock-free readouts
//! - **ChunkProcessor**: the per-block driver feeding the ring buffer,
//!   slicing chunks and running the measurement components
//! - **MeterControls**: single-word-atomic configuration surface for
//!   the control/automation layer
//! - **CrestFactor**: K-System display scales (K-20/K-14/K-12/Normal)
//!
//! # Threading
//!
//! The audio thread owns the [`ChunkProcessor`] and is the only writer
//! of meter state; the display thread polls [`MeterBallistics`] getters
//! and the control thread flips [`MeterControls`] switches, all without
//! locks. Nothing on the block path blocks or allocates.
//!
//! # Example
//!
//! ```
//! use kmeter_engine::{ChunkProcessor, ProcessorConfig};
//!
//! let mut processor = ChunkProcessor::new(ProcessorConfig::default())?;
//! let levels = processor.ballistics();
//!
//! let mut left = vec![0.5f32; 1024];
//! let mut right = vec![0.5f32; 1024];
//! let mut block: Vec<&mut [f32]> = vec![&mut left, &mut right];
//! processor.process_block(&mut block)?;
//!
//! assert!(levels.peak_level(0) > -10.0);
//! # Ok::<(), kmeter_engine::EngineError>(())
//! ```

pub mod ballistics;
pub mod controls;
pub mod crest_factor;
pub mod error;
pub mod lockfree;
pub mod processor;

pub use ballistics::MeterBallistics;
pub use controls::MeterControls;
pub use crest_factor::CrestFactor;
pub use error::{EngineError, Result};
pub use lockfree::{AtomicCounter, AtomicFlag, AtomicFloat};
pub use processor::{ChunkProcessor, ProcessorConfig, DEFAULT_CHUNK_SIZE};
