//! Luminance rescaling between reference-white conventions.
//!
//! Sources store SDR white (80 nits) at linear 1.0. The gain-map encoder
//! expects 1.0 to mean the BT.2408 reference white of 203 nits, so every
//! channel value is scaled by `80 / 203` before encoding.

use half::f16;

/// Scale factor mapping a source white of `source_white_nits` to an encoder
/// white of `reference_white_nits`.
pub fn rescale_ratio(source_white_nits: f32, reference_white_nits: f32) -> f32 {
    source_white_nits / reference_white_nits
}

/// Multiply every channel value by `ratio` and clamp negatives to zero.
///
/// Negative values are out-of-gamut for the encoder. Alpha is scaled along
/// with the color channels.
pub fn rescale_linear(pixels: &mut [f16], ratio: f32) {
    for value in pixels.iter_mut() {
        let scaled = value.to_f32() * ratio;
        *value = f16::from_f32(scaled.max(0.0));
    }
}
