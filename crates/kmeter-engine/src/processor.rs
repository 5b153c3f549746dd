//! Per-block driver of the metering chain.
//!
//! [`ChunkProcessor`] sits in the block-processing callback: it feeds
//! host blocks into the ring buffer, slices fixed-size chunks out of it,
//! runs the measurement components, counts overflows and hands one set
//! of results per chunk to the ballistics. Host block size and chunk
//! size are fully decoupled; chunk boundaries land exactly regardless of
//! how the host splits its blocks.
//!
//! Everything on the block path is allocation-free and lock-free.
//! Configuration arrives through [`MeterControls`] and is picked up at
//! block (mono, flip, attenuation) or chunk (weighting algorithm)
//! granularity.

use std::sync::Arc;

use tracing::{debug, warn};

use kmeter_dsp::{
    oversampling_factor, AverageAlgorithm, AverageLevelFiltered, DspError, RingBuffer,
    TruePeakMeter,
};

use crate::ballistics::MeterBallistics;
use crate::controls::MeterControls;
use crate::error::{EngineError, Result};

/// Internal chunk size used when the host does not dictate one.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Overflow threshold: 16-bit full scale is 32767/32768 of the
/// floating-point range, so a magnitude at or above 0.9999 counts as an
/// overflow (about -0.001 dBFS).
const OVERFLOW_LEVEL: f32 = 0.9999;

/// RMS levels below -80 dBFS are treated as silence by the stereo
/// analysis.
const SILENCE_GATE: f32 = 0.0001;

/// Setup parameters of the metering chain.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub sample_rate: f64,
    pub channels: usize,
    pub chunk_size: usize,
    pub average_algorithm: AverageAlgorithm,
    pub peak_meter_infinite_hold: bool,
    pub average_meter_infinite_hold: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            channels: 2,
            chunk_size: DEFAULT_CHUNK_SIZE,
            average_algorithm: AverageAlgorithm::default(),
            peak_meter_infinite_hold: false,
            average_meter_infinite_hold: false,
        }
    }
}

/// The per-block driver: ring buffer, measurement components and
/// ballistics, advanced one host block at a time.
///
/// Rebuild the processor whenever the sample rate or channel count
/// changes; between rebuilds the per-block path never allocates.
pub struct ChunkProcessor {
    channels: usize,
    chunk_size: usize,
    pre_delay: usize,
    seconds_per_chunk: f32,

    ring: RingBuffer,
    average: AverageLevelFiltered,
    true_peak: TruePeakMeter,
    ballistics: Arc<MeterBallistics>,
    controls: Arc<MeterControls>,

    /// Samples fed since the last completed chunk.
    pending: usize,
    /// Attenuation gain at the end of the previous block.
    gain: f32,

    peaks: Vec<f32>,
    rms: Vec<f32>,
    averages: Vec<f32>,
    true_peaks: Vec<f32>,
    overflows: Vec<u32>,
}

impl ChunkProcessor {
    /// Build the metering chain for the given configuration.
    ///
    /// Sample rates outside 44.1-192 kHz are refused: the caller must
    /// silence its output and skip metering rather than run the
    /// ballistics on an unsupported rate.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        if !(44_100.0..=192_000.0).contains(&config.sample_rate) {
            warn!(
                sample_rate = config.sample_rate,
                "refusing unsupported sample rate"
            );
            return Err(EngineError::UnsupportedSampleRate(config.sample_rate));
        }
        if config.channels == 0 {
            return Err(EngineError::NoChannels);
        }
        if config.chunk_size == 0 || config.chunk_size % 2 != 0 {
            return Err(EngineError::InvalidChunkSize(config.chunk_size));
        }

        let chunk_size = config.chunk_size;
        let pre_delay = chunk_size / 2;
        let factor = oversampling_factor(config.sample_rate);

        debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            chunk_size,
            oversampling = factor,
            "setting up metering chain"
        );

        Ok(Self {
            channels: config.channels,
            chunk_size,
            pre_delay,
            seconds_per_chunk: (chunk_size as f64 / config.sample_rate) as f32,
            ring: RingBuffer::new(config.channels, chunk_size + pre_delay, chunk_size),
            average: AverageLevelFiltered::new(
                config.channels,
                config.sample_rate as f32,
                chunk_size,
                config.average_algorithm,
            ),
            true_peak: TruePeakMeter::new(factor, config.channels, chunk_size),
            ballistics: Arc::new(MeterBallistics::new(
                config.channels,
                config.peak_meter_infinite_hold,
                config.average_meter_infinite_hold,
            )),
            controls: Arc::new(MeterControls::new(config.average_algorithm)),
            pending: 0,
            gain: 1.0,
            peaks: vec![0.0; config.channels],
            rms: vec![0.0; config.channels],
            averages: vec![0.0; config.channels],
            true_peaks: vec![0.0; config.channels],
            overflows: vec![0; config.channels],
        })
    }

    /// Shared readouts for the display layer.
    pub fn ballistics(&self) -> Arc<MeterBallistics> {
        Arc::clone(&self.ballistics)
    }

    /// Shared configuration surface for the control layer.
    pub fn controls(&self) -> Arc<MeterControls> {
        Arc::clone(&self.controls)
    }

    /// Number of metered channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Internal chunk size in samples.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Latency the host should report for the metering chain: one chunk.
    pub fn latency_samples(&self) -> usize {
        self.chunk_size
    }

    /// Drop all buffered audio and meter state.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.average.reset();
        self.true_peak.reset();
        self.ballistics.reset();
        self.pending = 0;
    }

    /// Run one host block through the metering chain.
    ///
    /// The block is planar, one slice per channel, all the same length.
    /// Mono downmix / channel flip are applied in place before metering,
    /// and the mute/dim attenuation ramp afterwards, so the block leaves
    /// this call ready for monitoring output.
    pub fn process_block(&mut self, block: &mut [&mut [f32]]) -> Result<()> {
        if block.len() != self.channels {
            return Err(EngineError::ChannelMismatch {
                expected: self.channels,
                actual: block.len(),
            });
        }

        let frames = block[0].len();
        if block.iter().any(|channel| channel.len() != frames) {
            return Err(EngineError::Dsp(DspError::RaggedBlock));
        }
        if frames == 0 {
            return Ok(());
        }

        if self.channels == 2 {
            if self.controls.mono() {
                let (left, right) = block.split_at_mut(1);
                for (l, r) in left[0].iter_mut().zip(right[0].iter_mut()) {
                    *l = 0.5 * (*l + *r);
                    *r = *l;
                }
            } else if self.controls.flip() {
                let (left, right) = block.split_at_mut(1);
                for (l, r) in left[0].iter_mut().zip(right[0].iter_mut()) {
                    std::mem::swap(l, r);
                }
            }
        }

        // Feed in slices so the write cursor lands exactly on chunk
        // boundaries.
        let mut offset = 0;
        while offset < frames {
            let take = (frames - offset).min(self.chunk_size - self.pending);
            self.ring.add_samples(&*block, offset, take)?;
            self.pending += take;
            offset += take;

            if self.pending == self.chunk_size {
                self.process_chunk();
                self.pending = 0;
            }
        }

        self.apply_attenuation(block, frames);

        Ok(())
    }

    /// Measure one completed chunk and update the ballistics.
    fn process_chunk(&mut self) {
        let selected = self.controls.average_algorithm();
        if selected != self.average.algorithm() && self.average.set_algorithm(selected) {
            self.controls.note_algorithm_changed();
        }

        let time_passed = self.seconds_per_chunk;
        let mono = self.channels == 2 && self.controls.mono();

        // The weighting filter delays its output by chunk/2 samples;
        // the raw scans use the same pre-delay to stay aligned.
        self.average.copy_from_buffer(&self.ring, 0);
        self.true_peak.copy_from_buffer(&self.ring, self.pre_delay);

        for channel in 0..self.channels {
            if mono && channel == 1 {
                self.peaks[1] = self.peaks[0];
                self.rms[1] = self.rms[0];
                self.averages[1] = self.averages[0];
                self.true_peaks[1] = self.true_peaks[0];
                self.overflows[1] = self.overflows[0];
            } else {
                self.peaks[channel] =
                    self.ring.magnitude(channel, self.chunk_size, self.pre_delay);
                self.rms[channel] = self.ring.rms_level(channel, self.chunk_size, self.pre_delay);
                self.averages[channel] = self.average.level(channel);
                self.true_peaks[channel] = self.true_peak.level(channel);
                self.overflows[channel] = self.count_overflows(channel);
            }

            self.ballistics.update_channel(
                channel,
                time_passed,
                self.peaks[channel],
                self.true_peaks[channel],
                self.rms[channel],
                self.averages[channel],
                self.overflows[channel],
            );
        }

        if self.channels == 2 {
            self.update_stereo(time_passed, mono);
        }
    }

    /// Raw stereo balance and phase correlation for the chunk; defined
    /// for exactly two channels.
    fn update_stereo(&self, time_passed: f32, mono: bool) {
        let left_rms = self.rms[0];
        let right_rms = self.rms[1];

        let correlation = if mono {
            // A downmixed signal is mono-compatible by construction.
            1.0
        } else if left_rms >= SILENCE_GATE || right_rms >= SILENCE_GATE {
            let mut product_sum = 0.0f32;
            let mut left_squares = 0.0f32;
            let mut right_squares = 0.0f32;

            for index in 0..self.chunk_size {
                let left = self.ring.sample(0, index, self.pre_delay);
                let right = self.ring.sample(1, index, self.pre_delay);
                product_sum += left * right;
                left_squares += left * left;
                right_squares += right * right;
            }

            let denominator = left_squares * right_squares;
            if denominator > 0.0 {
                product_sum / denominator.sqrt()
            } else {
                // Mathematically undefined, "musically" mono-compatible.
                1.0
            }
        } else {
            1.0
        };

        self.ballistics.set_phase_correlation(time_passed, correlation);

        let balance = if mono || (left_rms < SILENCE_GATE && right_rms < SILENCE_GATE) {
            0.0
        } else if right_rms >= left_rms {
            1.0 - left_rms / right_rms
        } else {
            right_rms / left_rms - 1.0
        };

        self.ballistics.set_stereo_balance(time_passed, balance);
    }

    /// Count near-full-scale samples in the chunk window.
    fn count_overflows(&self, channel: usize) -> u32 {
        let mut overflows = 0;

        for index in 0..self.chunk_size {
            if self.ring.sample(channel, index, self.pre_delay).abs() >= OVERFLOW_LEVEL {
                overflows += 1;
            }
        }

        overflows
    }

    /// Ramp the monitored output from the previous block's gain to the
    /// current mute/dim target.
    fn apply_attenuation(&mut self, block: &mut [&mut [f32]], frames: usize) {
        let target = self.controls.attenuation_target();
        if self.gain == 1.0 && target == 1.0 {
            return;
        }

        let step = (target - self.gain) / frames as f32;
        for channel in block.iter_mut() {
            let mut gain = self.gain;
            for sample in channel.iter_mut() {
                gain += step;
                *sample *= gain;
            }
        }

        self.gain = target;
    }
}
