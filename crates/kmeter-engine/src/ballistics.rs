//! Meter ballistics: the per-channel level state machine.
//!
//! Converts each chunk's instantaneous measurements (sample peak, true
//! peak, RMS, weighted average) into the slowly-evolving readouts a
//! display redraws every refresh: live level, peak hold, session
//! maximum, overflow tally, stereo balance and phase correlation.
//!
//! Every published readout is a single-word atomic, so the struct is
//! shared by `Arc` between the audio thread (sole writer, via
//! [`MeterBallistics::update_channel`] and the stereo setters) and any
//! number of display readers. No method blocks, allocates or takes a
//! lock; a reader that catches a half-updated channel sees values at
//! most one chunk stale.

use kmeter_dsp::units::{level_to_decibel, MINIMUM_DECIBEL};

use crate::lockfree::{AtomicCounter, AtomicFlag, AtomicFloat};

/// Fall rate of the peak meter and the hold markers: 26 dB in 3 s,
/// straight-line in the decibel domain.
const FALL_RATE_DECIBEL_PER_SECOND: f32 = 26.0 / 3.0;

/// How long the hold markers stay put before they start falling.
const HOLD_SECONDS: f32 = 10.0;

/// The average meter reaches 99 % of a level step in this time.
const AVERAGE_INERTIA_SECONDS: f32 = 0.3;

/// Stereo balance and phase correlation are damped harder than the
/// average meter; they are trend displays, not level displays.
const STEREO_INERTIA_SECONDS: f32 = 1.2;

/// Added to the weighted average so a full-scale sine reads 0 dB on the
/// average meter (its RMS sits 1/sqrt(2) below its peak).
const PEAK_TO_AVERAGE_CORRECTION_DECIBEL: f32 = 3.010_3;

/// Per-channel ballistics state with lock-free readouts.
///
/// Created when processing starts (channel count known) and rebuilt on
/// reconfiguration. All levels are decibels clamped at the meter floor.
pub struct MeterBallistics {
    channels: usize,

    peak_levels: Vec<AtomicFloat>,
    peak_hold_levels: Vec<AtomicFloat>,
    peak_hold_elapsed: Vec<AtomicFloat>,

    average_levels: Vec<AtomicFloat>,
    average_hold_levels: Vec<AtomicFloat>,
    average_hold_elapsed: Vec<AtomicFloat>,

    rms_levels: Vec<AtomicFloat>,
    maximum_peak_levels: Vec<AtomicFloat>,
    overflow_counts: Vec<AtomicCounter>,

    stereo_balance: AtomicFloat,
    phase_correlation: AtomicFloat,

    peak_infinite_hold: AtomicFlag,
    average_infinite_hold: AtomicFlag,
}

impl MeterBallistics {
    /// Create ballistics state for `channels` channels.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is zero.
    pub fn new(channels: usize, peak_infinite_hold: bool, average_infinite_hold: bool) -> Self {
        assert!(channels > 0, "need at least one channel");

        let floats = || (0..channels).map(|_| AtomicFloat::default()).collect();

        let ballistics = Self {
            channels,
            peak_levels: floats(),
            peak_hold_levels: floats(),
            peak_hold_elapsed: floats(),
            average_levels: floats(),
            average_hold_levels: floats(),
            average_hold_elapsed: floats(),
            rms_levels: floats(),
            maximum_peak_levels: floats(),
            overflow_counts: (0..channels).map(|_| AtomicCounter::default()).collect(),
            stereo_balance: AtomicFloat::new(0.0),
            phase_correlation: AtomicFloat::new(1.0),
            peak_infinite_hold: AtomicFlag::new(peak_infinite_hold),
            average_infinite_hold: AtomicFlag::new(average_infinite_hold),
        };

        ballistics.reset();
        ballistics
    }

    /// Number of metered channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Floor all levels, zero the overflow tallies and restart the hold
    /// timers.
    ///
    /// The live levels re-populate on the next
    /// [`update_channel`](Self::update_channel) call; the hold flags are
    /// left as configured.
    pub fn reset(&self) {
        for channel in 0..self.channels {
            self.peak_levels[channel].set(MINIMUM_DECIBEL);
            self.peak_hold_levels[channel].set(MINIMUM_DECIBEL);
            self.peak_hold_elapsed[channel].set(0.0);
            self.average_levels[channel].set(MINIMUM_DECIBEL);
            self.average_hold_levels[channel].set(MINIMUM_DECIBEL);
            self.average_hold_elapsed[channel].set(0.0);
            self.rms_levels[channel].set(MINIMUM_DECIBEL);
            self.maximum_peak_levels[channel].set(MINIMUM_DECIBEL);
            self.overflow_counts[channel].reset();
        }

        self.stereo_balance.set(0.0);
        self.phase_correlation.set(1.0);
    }

    /// Freeze or release the peak hold markers.
    ///
    /// Already-held values are untouched; releasing restarts the hold
    /// timers from zero.
    pub fn set_peak_meter_infinite_hold(&self, infinite: bool) {
        self.peak_infinite_hold.set(infinite);
        for elapsed in &self.peak_hold_elapsed {
            elapsed.set(0.0);
        }
    }

    /// Freeze or release the average hold markers.
    pub fn set_average_meter_infinite_hold(&self, infinite: bool) {
        self.average_infinite_hold.set(infinite);
        for elapsed in &self.average_hold_elapsed {
            elapsed.set(0.0);
        }
    }

    /// Fold one chunk's measurements for `channel` into the readouts.
    ///
    /// `time_passed` is the chunk length in seconds; `peak`, `true_peak`
    /// and `rms` are linear magnitudes while `average_filtered_db` is
    /// already weighted and in decibels. A `time_passed` of zero leaves
    /// all readouts unchanged.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range channel index (caller bug).
    #[allow(clippy::too_many_arguments)]
    pub fn update_channel(
        &self,
        channel: usize,
        time_passed: f32,
        peak: f32,
        true_peak: f32,
        rms: f32,
        average_filtered_db: f32,
        overflows: u32,
    ) {
        let peak_db = level_to_decibel(peak.max(true_peak));
        let rms_db = level_to_decibel(rms);
        let average_db =
            (average_filtered_db + PEAK_TO_AVERAGE_CORRECTION_DECIBEL).max(MINIMUM_DECIBEL);

        let maximum = &self.maximum_peak_levels[channel];
        if peak_db > maximum.get() {
            maximum.set(peak_db);
        }

        let peak_cell = &self.peak_levels[channel];
        let peak_readout = peak_ballistics(time_passed, peak_db, peak_cell.get());
        peak_cell.set(peak_readout);

        let peak_hold = hold_ballistics(
            self.peak_infinite_hold.get(),
            time_passed,
            &self.peak_hold_elapsed[channel],
            peak_readout,
            self.peak_hold_levels[channel].get(),
        );
        self.peak_hold_levels[channel].set(peak_hold);

        let average_cell = &self.average_levels[channel];
        let average_readout = log_ballistics(
            AVERAGE_INERTIA_SECONDS,
            time_passed,
            average_db,
            average_cell.get(),
        );
        average_cell.set(average_readout);

        let average_hold = hold_ballistics(
            self.average_infinite_hold.get(),
            time_passed,
            &self.average_hold_elapsed[channel],
            average_readout,
            self.average_hold_levels[channel].get(),
        );
        self.average_hold_levels[channel].set(average_hold);

        let rms_cell = &self.rms_levels[channel];
        rms_cell.set(log_ballistics(
            AVERAGE_INERTIA_SECONDS,
            time_passed,
            rms_db,
            rms_cell.get(),
        ));

        self.overflow_counts[channel].add(overflows);
    }

    /// Smooth a raw stereo balance value (`-1.0` = left dominant, `0.0`
    /// = balanced, `1.0` = right dominant) into the readout.
    pub fn set_stereo_balance(&self, time_passed: f32, balance: f32) {
        self.stereo_balance.set(log_ballistics(
            STEREO_INERTIA_SECONDS,
            time_passed,
            balance,
            self.stereo_balance.get(),
        ));
    }

    /// Smooth a raw phase correlation value (`-1.0` = out of phase,
    /// `1.0` = mono-compatible) into the readout.
    pub fn set_phase_correlation(&self, time_passed: f32, correlation: f32) {
        self.phase_correlation.set(log_ballistics(
            STEREO_INERTIA_SECONDS,
            time_passed,
            correlation,
            self.phase_correlation.get(),
        ));
    }

    /// Live peak meter level in decibels.
    pub fn peak_level(&self, channel: usize) -> f32 {
        self.peak_levels[channel].get()
    }

    /// Held maximum of the peak meter in decibels.
    pub fn peak_hold_level(&self, channel: usize) -> f32 {
        self.peak_hold_levels[channel].get()
    }

    /// Live average meter level in decibels.
    pub fn average_level(&self, channel: usize) -> f32 {
        self.average_levels[channel].get()
    }

    /// Held maximum of the average meter in decibels.
    pub fn average_hold_level(&self, channel: usize) -> f32 {
        self.average_hold_levels[channel].get()
    }

    /// Smoothed unweighted RMS level in decibels.
    pub fn rms_level(&self, channel: usize) -> f32 {
        self.rms_levels[channel].get()
    }

    /// Session maximum peak in decibels; monotonic between resets.
    pub fn maximum_peak_level(&self, channel: usize) -> f32 {
        self.maximum_peak_levels[channel].get()
    }

    /// Overflow tally; monotonic between resets.
    pub fn overflow_count(&self, channel: usize) -> u32 {
        self.overflow_counts[channel].get()
    }

    /// Smoothed stereo balance in `[-1.0, 1.0]`.
    pub fn stereo_balance(&self) -> f32 {
        self.stereo_balance.get()
    }

    /// Smoothed phase correlation in `[-1.0, 1.0]`.
    pub fn phase_correlation(&self) -> f32 {
        self.phase_correlation.get()
    }

    /// Spread between the held peak and held average levels, averaged
    /// over all channels and floored at zero.
    ///
    /// A wider gap between the hold markers means more dynamic range.
    pub fn dynamic_range_value(&self) -> f32 {
        let mut spread = 0.0f32;

        for channel in 0..self.channels {
            spread +=
                self.peak_hold_levels[channel].get() - self.average_hold_levels[channel].get();
        }

        (spread / self.channels as f32).max(0.0)
    }
}

/// Peak meter law: instantaneous attack, straight-line release in dB,
/// never falling below the instantaneous level.
fn peak_ballistics(time_passed: f32, current: f32, old: f32) -> f32 {
    if current >= old {
        current
    } else {
        (old - FALL_RATE_DECIBEL_PER_SECOND * time_passed).max(current)
    }
}

/// Hold marker law: snap up with the live meter, hold for
/// [`HOLD_SECONDS`], then release at the peak fall rate unless frozen
/// by infinite hold.
fn hold_ballistics(
    infinite: bool,
    time_passed: f32,
    elapsed: &AtomicFloat,
    current: f32,
    old: f32,
) -> f32 {
    if current >= old {
        elapsed.set(0.0);
        return current;
    }

    if infinite {
        return old;
    }

    let held = elapsed.get() + time_passed;
    elapsed.set(held);

    if held <= HOLD_SECONDS {
        old
    } else {
        (old - FALL_RATE_DECIBEL_PER_SECOND * time_passed).max(current)
    }
}

/// Logarithmic rise and fall: 99 % of a level step in `inertia`
/// seconds (coefficient after Bram de Jong, musicdsp.org entry 136).
///
/// Zero elapsed time returns the readout unchanged.
fn log_ballistics(inertia: f32, time_passed: f32, level: f32, readout: f32) -> f32 {
    if time_passed <= 0.0 || level == readout {
        return readout;
    }

    let coefficient = 0.01f32.powf(time_passed / inertia);
    level + coefficient * (readout - level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// 1024 samples at 44.1 kHz.
    const CHUNK_SECONDS: f32 = 1024.0 / 44_100.0;

    fn sustained(ballistics: &MeterBallistics, peak: f32, chunks: usize) {
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, peak, peak, peak, -20.0, 0);
        }
    }

    #[test]
    fn test_attack_is_instantaneous() {
        let ballistics = MeterBallistics::new(1, false, false);
        ballistics.update_channel(0, CHUNK_SECONDS, 0.5, 0.5, 0.35, -12.0, 0);

        assert_relative_eq!(ballistics.peak_level(0), -6.0206, epsilon = 1e-3);
        assert_relative_eq!(ballistics.peak_hold_level(0), -6.0206, epsilon = 1e-3);
    }

    #[test]
    fn test_peak_uses_the_larger_of_sample_and_true_peak() {
        let ballistics = MeterBallistics::new(1, false, false);
        ballistics.update_channel(0, CHUNK_SECONDS, 0.5, 0.9, 0.35, -12.0, 0);

        assert_relative_eq!(
            ballistics.peak_level(0),
            20.0 * 0.9f32.log10(),
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_release_is_a_straight_line_in_decibels() {
        let ballistics = MeterBallistics::new(1, false, false);
        sustained(&ballistics, 1.0, 1);

        // One second of silence: the live meter falls 26/3 dB.
        let chunks = (1.0 / CHUNK_SECONDS).round() as usize;
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 0.0, 0.0, 0.0, MINIMUM_DECIBEL, 0);
        }

        let expected = -FALL_RATE_DECIBEL_PER_SECOND * (chunks as f32 * CHUNK_SECONDS);
        assert_relative_eq!(ballistics.peak_level(0), expected, epsilon = 0.05);
    }

    #[test]
    fn test_release_converges_without_overshoot() {
        let ballistics = MeterBallistics::new(1, false, false);
        sustained(&ballistics, 1.0, 1);

        // Drop to -6 dB and keep it there long enough for the release to
        // land; the readout must settle exactly at -6 dB, not below.
        let mut previous = ballistics.peak_level(0);
        for _ in 0..200 {
            ballistics.update_channel(0, CHUNK_SECONDS, 0.5, 0.5, 0.35, -12.0, 0);
            let level = ballistics.peak_level(0);
            assert!(level <= previous + 1e-6, "release must be monotonic");
            assert!(level >= -6.021, "release must not fall through the input level");
            previous = level;
        }

        assert_relative_eq!(ballistics.peak_level(0), -6.0206, epsilon = 1e-3);
    }

    #[test]
    fn test_hold_marker_waits_before_falling() {
        let ballistics = MeterBallistics::new(1, false, false);
        sustained(&ballistics, 1.0, 1);

        // Nine seconds of silence: inside the hold time, the marker must
        // not move while the live meter falls away under it.
        let chunks = (9.0 / CHUNK_SECONDS) as usize;
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 0.0, 0.0, 0.0, MINIMUM_DECIBEL, 0);
        }
        assert_relative_eq!(ballistics.peak_hold_level(0), 0.0, epsilon = 1e-3);
        assert!(ballistics.peak_level(0) < -60.0);

        // Two more seconds: past the hold time the marker falls too.
        let chunks = (2.0 / CHUNK_SECONDS) as usize;
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 0.0, 0.0, 0.0, MINIMUM_DECIBEL, 0);
        }
        assert!(ballistics.peak_hold_level(0) < -1.0);
    }

    #[test]
    fn test_infinite_hold_never_falls() {
        let ballistics = MeterBallistics::new(1, true, false);
        sustained(&ballistics, 1.0, 1);

        let chunks = (30.0 / CHUNK_SECONDS) as usize;
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 0.0, 0.0, 0.0, MINIMUM_DECIBEL, 0);
        }

        assert_relative_eq!(ballistics.peak_hold_level(0), 0.0, epsilon = 1e-3);

        // Only reset releases the marker.
        ballistics.reset();
        assert_eq!(ballistics.peak_hold_level(0), MINIMUM_DECIBEL);
    }

    #[test]
    fn test_average_meter_is_sluggish() {
        let ballistics = MeterBallistics::new(1, false, false);

        // A single chunk moves the average meter only part of the way.
        ballistics.update_channel(0, CHUNK_SECONDS, 0.5, 0.5, 0.35, -12.0, 0);
        let target = -12.0 + PEAK_TO_AVERAGE_CORRECTION_DECIBEL;
        let first = ballistics.average_level(0);
        assert!(first > MINIMUM_DECIBEL && first < target);

        // Half a second in, it has essentially converged (99 % of the
        // step happens in 0.3 s).
        let chunks = (0.5 / CHUNK_SECONDS) as usize;
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 0.5, 0.5, 0.35, -12.0, 0);
        }
        assert_relative_eq!(ballistics.average_level(0), target, epsilon = 0.1);
    }

    #[test]
    fn test_full_scale_sine_averages_to_zero_decibel() {
        // RMS of a full-scale sine is -3.01 dB; the correction makes the
        // average meter read 0 dB.
        let ballistics = MeterBallistics::new(1, false, false);
        let sine_rms_db = 20.0 * (1.0f32 / std::f32::consts::SQRT_2).log10();

        let chunks = (1.0 / CHUNK_SECONDS) as usize;
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 1.0, 1.0, 0.707, sine_rms_db, 0);
        }

        assert_relative_eq!(ballistics.average_level(0), 0.0, epsilon = 0.05);
    }

    #[test]
    fn test_maximum_peak_is_monotonic() {
        let ballistics = MeterBallistics::new(1, false, false);

        ballistics.update_channel(0, CHUNK_SECONDS, 0.8, 0.8, 0.5, -12.0, 0);
        let loud = ballistics.maximum_peak_level(0);

        sustained(&ballistics, 0.1, 50);
        assert_eq!(ballistics.maximum_peak_level(0), loud);

        ballistics.update_channel(0, CHUNK_SECONDS, 0.9, 0.9, 0.6, -12.0, 0);
        assert!(ballistics.maximum_peak_level(0) > loud);
    }

    #[test]
    fn test_overflows_accumulate_until_reset() {
        let ballistics = MeterBallistics::new(2, false, false);

        ballistics.update_channel(0, CHUNK_SECONDS, 1.0, 1.0, 0.7, -3.0, 3);
        ballistics.update_channel(0, CHUNK_SECONDS, 1.0, 1.0, 0.7, -3.0, 2);
        ballistics.update_channel(1, CHUNK_SECONDS, 1.0, 1.0, 0.7, -3.0, 1);

        assert_eq!(ballistics.overflow_count(0), 5);
        assert_eq!(ballistics.overflow_count(1), 1);

        ballistics.reset();
        assert_eq!(ballistics.overflow_count(0), 0);
        assert_eq!(ballistics.overflow_count(1), 0);
    }

    #[test]
    fn test_zero_elapsed_time_changes_nothing() {
        let ballistics = MeterBallistics::new(1, false, false);
        sustained(&ballistics, 0.5, 10);

        let peak = ballistics.peak_level(0);
        let average = ballistics.average_level(0);

        ballistics.update_channel(0, 0.0, 0.25, 0.25, 0.2, -24.0, 0);

        assert!(ballistics.peak_level(0).is_finite());
        assert_eq!(ballistics.average_level(0), average);
        // The peak meter may snap up but never decays without time.
        assert!(ballistics.peak_level(0) <= peak);
    }

    #[test]
    fn test_reset_round_trip_matches_fresh_instance() {
        let seasoned = MeterBallistics::new(1, false, false);
        sustained(&seasoned, 0.9, 25);
        seasoned.reset();
        seasoned.update_channel(0, CHUNK_SECONDS, 0.5, 0.5, 0.35, -12.0, 1);

        let fresh = MeterBallistics::new(1, false, false);
        fresh.update_channel(0, CHUNK_SECONDS, 0.5, 0.5, 0.35, -12.0, 1);

        assert_eq!(seasoned.peak_level(0), fresh.peak_level(0));
        assert_eq!(seasoned.peak_hold_level(0), fresh.peak_hold_level(0));
        assert_eq!(seasoned.average_level(0), fresh.average_level(0));
        assert_eq!(seasoned.maximum_peak_level(0), fresh.maximum_peak_level(0));
        assert_eq!(seasoned.overflow_count(0), fresh.overflow_count(0));
    }

    #[test]
    fn test_stereo_balance_settles_on_constant_input() {
        let ballistics = MeterBallistics::new(2, false, false);

        let chunks = (6.0 / CHUNK_SECONDS) as usize;
        for _ in 0..chunks {
            ballistics.set_stereo_balance(CHUNK_SECONDS, 0.5);
        }

        assert_relative_eq!(ballistics.stereo_balance(), 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_phase_correlation_starts_mono_compatible() {
        let ballistics = MeterBallistics::new(2, false, false);
        assert_eq!(ballistics.phase_correlation(), 1.0);

        // Feeding 1.0 raw keeps the readout pinned without drift.
        for _ in 0..100 {
            ballistics.set_phase_correlation(CHUNK_SECONDS, 1.0);
        }
        assert_eq!(ballistics.phase_correlation(), 1.0);
    }

    #[test]
    fn test_dynamic_range_tracks_the_hold_spread() {
        let ballistics = MeterBallistics::new(1, false, false);

        // Compressed material: peak and average close together.
        let chunks = (1.0 / CHUNK_SECONDS) as usize;
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 1.0, 1.0, 0.9, -4.0, 0);
        }
        let compressed = ballistics.dynamic_range_value();

        ballistics.reset();

        // Dynamic material: same peaks, much lower average.
        for _ in 0..chunks {
            ballistics.update_channel(0, CHUNK_SECONDS, 1.0, 1.0, 0.2, -18.0, 0);
        }
        let dynamic = ballistics.dynamic_range_value();

        assert!(
            dynamic > compressed,
            "wider peak/average spread must read as more dynamic range ({dynamic} vs {compressed})"
        );
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_channel_panics() {
        let ballistics = MeterBallistics::new(1, false, false);
        let _ = ballistics.peak_level(1);
    }

    proptest! {
        /// The hold marker never reads below the live meter, whatever
        /// the input sequence.
        #[test]
        fn prop_hold_covers_live_level(levels in prop::collection::vec(0.0f32..1.2, 1..60)) {
            let ballistics = MeterBallistics::new(1, false, false);

            for &level in &levels {
                ballistics.update_channel(0, CHUNK_SECONDS, level, level, level * 0.7, -20.0, 0);
                prop_assert!(
                    ballistics.peak_hold_level(0) >= ballistics.peak_level(0) - 1e-4
                );
                prop_assert!(
                    ballistics.average_hold_level(0) >= ballistics.average_level(0) - 1e-4
                );
            }
        }

        /// The session maximum never decreases between resets.
        #[test]
        fn prop_maximum_peak_is_monotonic(levels in prop::collection::vec(0.0f32..1.2, 1..60)) {
            let ballistics = MeterBallistics::new(1, false, false);
            let mut previous = MINIMUM_DECIBEL;

            for &level in &levels {
                ballistics.update_channel(0, CHUNK_SECONDS, level, level, level * 0.7, -20.0, 0);
                let maximum = ballistics.maximum_peak_level(0);
                prop_assert!(maximum >= previous);
                previous = maximum;
            }
        }

        /// Smoothed stereo readouts stay inside the raw input's range.
        #[test]
        fn prop_stereo_readouts_stay_bounded(values in prop::collection::vec(-1.0f32..=1.0, 1..60)) {
            let ballistics = MeterBallistics::new(2, false, false);

            for &value in &values {
                ballistics.set_stereo_balance(CHUNK_SECONDS, value);
                ballistics.set_phase_correlation(CHUNK_SECONDS, value);
                prop_assert!(ballistics.stereo_balance().abs() <= 1.0 + 1e-6);
                prop_assert!(ballistics.phase_correlation().abs() <= 1.0 + 1e-6);
            }
        }
    }
}
