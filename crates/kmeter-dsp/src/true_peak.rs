//! Inter-sample true peak measurement per ITU-R BS.1770 Annex 2.
//!
//! Upsamples each chunk with a polyphase windowed-sinc interpolator and
//! records the largest absolute interpolated value per channel. The
//! oversampling factor is chosen from the sample rate so the documented
//! 0.169 dB worst-case under-read of the four-times design holds at
//! every supported rate.

use std::f64::consts::PI;

use crate::ring_buffer::RingBuffer;

/// FIR taps per polyphase phase.
const TAPS_PER_PHASE: usize = 12;

/// Kaiser window shape parameter of the interpolation filter.
const KAISER_BETA: f64 = 8.0;

/// Oversampling factor for a given sample rate.
///
/// Eight-times below 88.2 kHz, four-times up to 176.4 kHz, two-times
/// above: the oversampled rate stays at or above 352.8 kHz everywhere,
/// keeping the inter-sample under-read within the ITU-R BS.1770-4
/// bound.
pub fn oversampling_factor(sample_rate: f64) -> usize {
    if sample_rate >= 176_400.0 {
        2
    } else if sample_rate >= 88_200.0 {
        4
    } else {
        8
    }
}

/// Per-chunk true peak estimate for every channel.
pub struct TruePeakMeter {
    factor: usize,
    channels: usize,
    chunk_size: usize,
    /// Polyphase coefficients, phase-major: `[phase * TAPS_PER_PHASE + tap]`.
    coefficients: Vec<f32>,
    /// Per-channel FIR history carried across chunks.
    history: Vec<Vec<f32>>,
    /// Per-channel write position into the history.
    positions: Vec<usize>,
    /// Windowed read scratch, one chunk long.
    chunk: Vec<f32>,
    /// Per-channel true peak of the last chunk (linear magnitude).
    levels: Vec<f32>,
}

impl TruePeakMeter {
    /// Create a meter with the given oversampling `factor` for
    /// `channels` channels, consuming `chunk_size` samples per update.
    ///
    /// All interpolation buffers are sized here; the per-chunk path does
    /// not allocate.
    ///
    /// # Panics
    ///
    /// Panics if `factor`, `channels` or `chunk_size` is zero.
    pub fn new(factor: usize, channels: usize, chunk_size: usize) -> Self {
        assert!(factor > 0, "oversampling factor must be non-zero");
        assert!(channels > 0, "need at least one channel");
        assert!(chunk_size > 0, "chunk size must be non-zero");

        Self {
            factor,
            channels,
            chunk_size,
            coefficients: design_polyphase_kernel(factor),
            history: vec![vec![0.0; TAPS_PER_PHASE]; channels],
            positions: vec![0; channels],
            chunk: vec![0.0; chunk_size],
            levels: vec![0.0; channels],
        }
    }

    /// Configured oversampling factor.
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Pull one chunk per channel from `ring` and record its true peak.
    ///
    /// The FIR history carries over between chunks so interpolation is
    /// seamless across chunk boundaries; the reported level covers this
    /// chunk only.
    pub fn copy_from_buffer(&mut self, ring: &RingBuffer, pre_delay: usize) {
        for channel in 0..self.channels {
            ring.copy_to_buffer(channel, pre_delay, &mut self.chunk);

            let history = &mut self.history[channel];
            let mut position = self.positions[channel];
            let mut peak = 0.0f32;

            for &sample in &self.chunk {
                history[position] = sample;
                position = (position + 1) % TAPS_PER_PHASE;

                for phase in 0..self.factor {
                    let coefficients =
                        &self.coefficients[phase * TAPS_PER_PHASE..(phase + 1) * TAPS_PER_PHASE];
                    let mut interpolated = 0.0f32;

                    for (tap, &coefficient) in coefficients.iter().enumerate() {
                        let index = (position + TAPS_PER_PHASE - 1 - tap) % TAPS_PER_PHASE;
                        interpolated += coefficient * history[index];
                    }

                    let magnitude = interpolated.abs();
                    if magnitude > peak {
                        peak = magnitude;
                    }
                }
            }

            self.positions[channel] = position;
            self.levels[channel] = peak;
        }
    }

    /// True peak of the last processed chunk as a linear magnitude.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range channel index (caller bug).
    pub fn level(&self, channel: usize) -> f32 {
        self.levels[channel]
    }

    /// Clear the FIR history and stored levels.
    pub fn reset(&mut self) {
        for history in &mut self.history {
            history.fill(0.0);
        }
        self.positions.fill(0);
        self.levels.fill(0.0);
    }
}

/// Design the polyphase interpolation kernel for the given factor.
///
/// A `factor * TAPS_PER_PHASE` tap windowed sinc (cutoff at the original
/// Nyquist) under a Kaiser window, decomposed into `factor` phases and
/// normalized per phase to unity gain.
fn design_polyphase_kernel(factor: usize) -> Vec<f32> {
    let total_taps = factor * TAPS_PER_PHASE;
    let center = (total_taps as f64 - 1.0) / 2.0;
    let mut coefficients = vec![0.0f32; total_taps];

    for index in 0..total_taps {
        let offset = index as f64 - center;
        let sinc = if offset.abs() < 1e-10 {
            1.0
        } else {
            let x = offset * PI / factor as f64;
            x.sin() / x
        };
        let window = kaiser_window(index, total_taps, KAISER_BETA);

        let phase = index % factor;
        let tap = index / factor;
        coefficients[phase * TAPS_PER_PHASE + tap] = (sinc * window) as f32;
    }

    for phase in coefficients.chunks_mut(TAPS_PER_PHASE) {
        let sum: f32 = phase.iter().sum();
        if sum.abs() > 1e-10 {
            for tap in phase.iter_mut() {
                *tap /= sum;
            }
        }
    }

    coefficients
}

/// Kaiser window value at position `index` of `length` taps.
fn kaiser_window(index: usize, length: usize, beta: f64) -> f64 {
    let order = length as f64 - 1.0;
    let x = 2.0 * index as f64 / order - 1.0;
    let argument = beta * (1.0 - x * x).max(0.0).sqrt();
    bessel_i0(argument) / bessel_i0(beta)
}

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0f64;
    let mut term = 1.0f64;
    let half = x / 2.0;

    for k in 1..=25 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < 1e-20 * sum {
            break;
        }
    }

    sum
}
