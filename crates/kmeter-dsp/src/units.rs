//! Decibel and linear level conversions.

/// Largest headroom of any K-System scale (K-20), in decibels.
pub const MAXIMUM_HEADROOM_DECIBEL: f32 = 20.0;

/// Lowest level any meter will report, in decibels.
///
/// Logarithmic levels have no natural minimum, so we define one: 70 dB
/// of meter range below the K-20 scale's headroom. Silence and
/// denormal-range input clamp here instead of producing `-inf`.
pub const MINIMUM_DECIBEL: f32 = -(70.01 + MAXIMUM_HEADROOM_DECIBEL);

/// Convert a linear level to decibels, clamped at [`MINIMUM_DECIBEL`].
///
/// Zero and negative input map to the meter floor; the result is always
/// finite.
#[inline]
pub fn level_to_decibel(level: f32) -> f32 {
    if level <= 0.0 {
        return MINIMUM_DECIBEL;
    }

    let decibel = 20.0 * level.log10();

    if decibel < MINIMUM_DECIBEL {
        MINIMUM_DECIBEL
    } else {
        decibel
    }
}

/// Convert decibels to a linear level.
#[inline]
pub fn decibel_to_level(decibel: f32) -> f32 {
    10.0f32.powf(decibel / 20.0)
}
