//! Weighted average level measurement.
//!
//! Pulls one chunk per update from the ring buffer, applies the selected
//! weighting filter and stores one decibel-domain average level per
//! channel. The filter is a fixed-length FIR realized as a
//! frequency-domain convolution (overlap-add), so both algorithms share
//! one processing path and the same group delay of `chunk_size / 2`
//! samples. Callers must apply an equal pre-delay to the peak, RMS and
//! overflow scans to keep all measurements time-aligned.
//!
//! All FFT plans and scratch buffers are allocated at construction; the
//! per-chunk path neither allocates nor locks.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::ring_buffer::RingBuffer;
use crate::units::{level_to_decibel, MINIMUM_DECIBEL};

/// Band limit of the measurement path, in Hz.
///
/// Content above 21 kHz carries no loudness information but would bias
/// the RMS reading at high sample rates.
const BAND_LIMIT_HZ: f64 = 21_000.0;

/// Selectable weighting applied before averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AverageAlgorithm {
    /// Band-limited RMS: windowed-sinc low-pass only.
    #[default]
    Rms,
    /// ITU-R BS.1770 weighting: the band-limit kernel shaped by the
    /// pre-filter and RLB weighting curves.
    ItuBs1770,
}

/// Per-channel weighted average level of the most recent chunk.
pub struct AverageLevelFiltered {
    channels: usize,
    sample_rate: f32,
    chunk_size: usize,
    fft_size: usize,
    algorithm: AverageAlgorithm,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    /// Spectrum of the current weighting kernel.
    kernel_spectrum: Vec<Complex<f32>>,
    /// In-place FFT work buffer.
    signal: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Windowed read scratch, one chunk long.
    chunk: Vec<f32>,
    /// Per-channel overlap-add tail carried into the next chunk.
    overlap: Vec<Vec<f32>>,
    /// Per-channel average level of the last chunk, in decibels.
    levels: Vec<f32>,
}

impl AverageLevelFiltered {
    /// Create a filter bank for `channels` channels at `sample_rate`,
    /// consuming `chunk_size` samples per update.
    ///
    /// # Panics
    ///
    /// Panics if `channels` or `chunk_size` is zero.
    pub fn new(
        channels: usize,
        sample_rate: f32,
        chunk_size: usize,
        algorithm: AverageAlgorithm,
    ) -> Self {
        assert!(channels > 0, "need at least one channel");
        assert!(chunk_size > 0, "chunk size must be non-zero");

        let fft_size = 2 * chunk_size;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_length = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let mut filter = Self {
            channels,
            sample_rate,
            chunk_size,
            fft_size,
            algorithm,
            forward,
            inverse,
            kernel_spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            signal: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_length],
            chunk: vec![0.0; chunk_size],
            overlap: vec![vec![0.0; chunk_size]; channels],
            levels: vec![MINIMUM_DECIBEL; channels],
        };

        filter.build_kernel();
        filter
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Currently selected weighting algorithm.
    pub fn algorithm(&self) -> AverageAlgorithm {
        self.algorithm
    }

    /// Group delay of the weighting filter, in samples.
    pub fn group_delay(&self) -> usize {
        self.chunk_size / 2
    }

    /// Switch the weighting algorithm.
    ///
    /// Rebuilds the kernel and resets the filter state so the new
    /// weighting applies cleanly instead of mixing overlap-add tails
    /// from two different filters. Returns `true` if a switch actually
    /// happened, letting the caller raise its algorithm-changed
    /// notification.
    pub fn set_algorithm(&mut self, algorithm: AverageAlgorithm) -> bool {
        if algorithm == self.algorithm {
            return false;
        }

        self.algorithm = algorithm;
        self.build_kernel();
        self.reset();
        true
    }

    /// Pull one chunk per channel from `ring`, filter it, and store the
    /// average level.
    pub fn copy_from_buffer(&mut self, ring: &RingBuffer, pre_delay: usize) {
        let scale = 1.0 / self.fft_size as f32;

        for channel in 0..self.channels {
            ring.copy_to_buffer(channel, pre_delay, &mut self.chunk);

            for (slot, &sample) in self.signal.iter_mut().zip(self.chunk.iter()) {
                *slot = Complex::new(sample, 0.0);
            }
            for slot in &mut self.signal[self.chunk_size..] {
                *slot = Complex::new(0.0, 0.0);
            }

            self.forward
                .process_with_scratch(&mut self.signal, &mut self.scratch);
            for (bin, &kernel) in self.signal.iter_mut().zip(self.kernel_spectrum.iter()) {
                *bin *= kernel;
            }
            self.inverse
                .process_with_scratch(&mut self.signal, &mut self.scratch);

            let overlap = &mut self.overlap[channel];
            let mut sum_of_squares = 0.0f64;

            for index in 0..self.chunk_size {
                let filtered = self.signal[index].re * scale + overlap[index];
                sum_of_squares += f64::from(filtered) * f64::from(filtered);
            }
            for index in 0..self.chunk_size {
                overlap[index] = self.signal[self.chunk_size + index].re * scale;
            }

            let rms = (sum_of_squares / self.chunk_size as f64).sqrt() as f32;
            self.levels[channel] = level_to_decibel(rms);
        }
    }

    /// Average level of the last processed chunk, in decibels, clamped
    /// at the meter floor.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range channel index (caller bug).
    pub fn level(&self, channel: usize) -> f32 {
        self.levels[channel]
    }

    /// Drop all carried filter state and stored levels.
    pub fn reset(&mut self) {
        for overlap in &mut self.overlap {
            overlap.fill(0.0);
        }
        self.levels.fill(MINIMUM_DECIBEL);
    }

    /// Recompute the weighting kernel and its spectrum.
    fn build_kernel(&mut self) {
        // Windowed-sinc low-pass at the band limit, one tap longer than
        // the chunk so the group delay is exactly chunk_size / 2.
        let taps = self.chunk_size + 1;
        let mut kernel = vec![0.0f64; taps];
        let relative_cutoff = (BAND_LIMIT_HZ / f64::from(self.sample_rate)).min(0.5);
        let order = (taps - 1) as f64;

        for (index, tap) in kernel.iter_mut().enumerate() {
            let offset = index as f64 - order / 2.0;
            let sinc = if offset == 0.0 {
                2.0 * PI * relative_cutoff
            } else {
                (2.0 * PI * relative_cutoff * offset).sin() / offset
            };
            let phase = index as f64 / order;
            let blackman =
                0.42 - 0.5 * (2.0 * PI * phase).cos() + 0.08 * (4.0 * PI * phase).cos();
            *tap = sinc * blackman;
        }

        let sum: f64 = kernel.iter().sum();
        for tap in &mut kernel {
            *tap /= sum;
        }

        if self.algorithm == AverageAlgorithm::ItuBs1770 {
            let (pre_filter, rlb) = itu_bs1770_coefficients(f64::from(self.sample_rate));
            filter_in_place(&mut kernel, &pre_filter);
            filter_in_place(&mut kernel, &rlb);
        }

        for slot in &mut self.kernel_spectrum {
            *slot = Complex::new(0.0, 0.0);
        }
        for (slot, &tap) in self.kernel_spectrum.iter_mut().zip(kernel.iter()) {
            *slot = Complex::new(tap as f32, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.kernel_spectrum, &mut self.scratch);
    }
}

/// Second-order IIR section in direct form.
struct BiquadCoefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Run `kernel` through one biquad section in place.
fn filter_in_place(kernel: &mut [f64], coefficients: &BiquadCoefficients) {
    let (mut x1, mut x2, mut y1, mut y2) = (0.0f64, 0.0, 0.0, 0.0);

    for value in kernel.iter_mut() {
        let x0 = *value;
        let y0 = coefficients.b0 * x0 + coefficients.b1 * x1 + coefficients.b2 * x2
            - coefficients.a1 * y1
            - coefficients.a2 * y2;
        x2 = x1;
        x1 = x0;
        y2 = y1;
        y1 = y0;
        *value = y0;
    }
}

/// Pre-filter and RLB weighting sections of ITU-R BS.1770, re-derived
/// for the given sample rate from the 48 kHz reference design.
fn itu_bs1770_coefficients(sample_rate: f64) -> (BiquadCoefficients, BiquadCoefficients) {
    // High-shelf pre-filter modelling the acoustic effect of the head.
    let f0 = 1681.974450955533;
    let gain_db = 3.999843853973347;
    let q = 0.7071752369554196;
    let k = (PI * f0 / sample_rate).tan();
    let vh = 10.0f64.powf(gain_db / 20.0);
    let vb = vh.powf(0.4996667741545416);
    let a0 = 1.0 + k / q + k * k;
    let pre_filter = BiquadCoefficients {
        b0: (vh + vb * k / q + k * k) / a0,
        b1: 2.0 * (k * k - vh) / a0,
        b2: (vh - vb * k / q + k * k) / a0,
        a1: 2.0 * (k * k - 1.0) / a0,
        a2: (1.0 - k / q + k * k) / a0,
    };

    // RLB weighting: a simple high-pass.
    let f0 = 38.13547087602444;
    let q = 0.5003270373238773;
    let k = (PI * f0 / sample_rate).tan();
    let a0 = 1.0 + k / q + k * k;
    let rlb = BiquadCoefficients {
        b0: 1.0,
        b1: -2.0,
        b2: 1.0,
        a1: 2.0 * (k * k - 1.0) / a0,
        a2: (1.0 - k / q + k * k) / a0,
    };

    (pre_filter, rlb)
}
