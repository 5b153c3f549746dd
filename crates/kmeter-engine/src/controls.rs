//! Cross-thread configuration surface of the meter.
//!
//! Host parameters, GUI buttons and automation all land here; the audio
//! thread reads each control as a single-word atomic once per block or
//! chunk. Controls may change between any two chunks without
//! synchronization beyond the atomics themselves.

use std::sync::atomic::{AtomicU8, Ordering};

use kmeter_dsp::AverageAlgorithm;

use crate::lockfree::AtomicFlag;

/// Output gain applied while dimmed.
const DIM_GAIN: f32 = 0.1;

/// Lock-free meter configuration shared between the control and audio
/// threads.
#[derive(Debug, Default)]
pub struct MeterControls {
    /// Downmix a stereo input to mono before metering.
    mono: AtomicFlag,
    /// Swap left and right before metering.
    flip: AtomicFlag,
    /// Silence the monitored output.
    mute: AtomicFlag,
    /// Attenuate the monitored output by 20 dB.
    dim: AtomicFlag,
    /// Selected average-level weighting, stored as a discriminant.
    algorithm: AtomicU8,
    /// Raised by the processor when an algorithm switch has been
    /// applied at a chunk boundary; cleared by the display layer.
    algorithm_changed: AtomicFlag,
}

impl MeterControls {
    pub fn new(algorithm: AverageAlgorithm) -> Self {
        let controls = Self::default();
        controls.set_average_algorithm(algorithm);
        controls
    }

    pub fn set_mono(&self, mono: bool) {
        self.mono.set(mono);
    }

    pub fn mono(&self) -> bool {
        self.mono.get()
    }

    pub fn set_flip(&self, flip: bool) {
        self.flip.set(flip);
    }

    pub fn flip(&self) -> bool {
        self.flip.get()
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.set(mute);
    }

    pub fn mute(&self) -> bool {
        self.mute.get()
    }

    pub fn set_dim(&self, dim: bool) {
        self.dim.set(dim);
    }

    pub fn dim(&self) -> bool {
        self.dim.get()
    }

    /// Request an average-level weighting; the processor applies it at
    /// the next chunk boundary.
    pub fn set_average_algorithm(&self, algorithm: AverageAlgorithm) {
        self.algorithm
            .store(algorithm_to_discriminant(algorithm), Ordering::Release);
    }

    pub fn average_algorithm(&self) -> AverageAlgorithm {
        discriminant_to_algorithm(self.algorithm.load(Ordering::Acquire))
    }

    /// Mark that a requested algorithm switch has taken effect.
    pub(crate) fn note_algorithm_changed(&self) {
        self.algorithm_changed.set(true);
    }

    /// Clear and return the algorithm-changed notification.
    ///
    /// The display layer polls this to re-light its algorithm buttons
    /// after a switch has been applied.
    pub fn take_algorithm_changed(&self) -> bool {
        self.algorithm_changed.swap(false)
    }

    /// Target gain of the monitored output under the current mute/dim
    /// state.
    pub fn attenuation_target(&self) -> f32 {
        if self.mute.get() {
            0.0
        } else if self.dim.get() {
            DIM_GAIN
        } else {
            1.0
        }
    }
}

fn algorithm_to_discriminant(algorithm: AverageAlgorithm) -> u8 {
    match algorithm {
        AverageAlgorithm::Rms => 0,
        AverageAlgorithm::ItuBs1770 => 1,
    }
}

fn discriminant_to_algorithm(discriminant: u8) -> AverageAlgorithm {
    match discriminant {
        1 => AverageAlgorithm::ItuBs1770,
        _ => AverageAlgorithm::Rms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let controls = MeterControls::default();
        assert!(!controls.mono());
        assert!(!controls.flip());
        assert!(!controls.mute());
        assert!(!controls.dim());
        assert_eq!(controls.average_algorithm(), AverageAlgorithm::Rms);
        assert!(!controls.take_algorithm_changed());
    }

    #[test]
    fn test_algorithm_round_trip() {
        let controls = MeterControls::new(AverageAlgorithm::ItuBs1770);
        assert_eq!(controls.average_algorithm(), AverageAlgorithm::ItuBs1770);

        controls.set_average_algorithm(AverageAlgorithm::Rms);
        assert_eq!(controls.average_algorithm(), AverageAlgorithm::Rms);
    }

    #[test]
    fn test_algorithm_changed_is_read_once() {
        let controls = MeterControls::default();
        controls.note_algorithm_changed();

        assert!(controls.take_algorithm_changed());
        assert!(!controls.take_algorithm_changed());
    }

    #[test]
    fn test_attenuation_priority() {
        let controls = MeterControls::default();
        assert_eq!(controls.attenuation_target(), 1.0);

        controls.set_dim(true);
        assert_eq!(controls.attenuation_target(), DIM_GAIN);

        // Mute wins over dim.
        controls.set_mute(true);
        assert_eq!(controls.attenuation_target(), 0.0);

        controls.set_mute(false);
        controls.set_dim(false);
        assert_eq!(controls.attenuation_target(), 1.0);
    }
}
