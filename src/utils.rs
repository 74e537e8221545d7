//! Utility functions for the hr-peripheral crate.

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f32 = 9.806_65;

/// Magnitude of a 3-axis vector.
///
/// # Example
///
/// ```
/// use hr_peripheral::utils::vector_magnitude;
///
/// assert!((vector_magnitude(3.0, 4.0, 0.0) - 5.0).abs() < 0.0001);
/// ```
#[inline]
pub fn vector_magnitude(x: f32, y: f32, z: f32) -> f32 {
    (x * x + y * y + z * z).sqrt()
}

/// Absolute deviation of an accelerometer vector from standard gravity.
///
/// A device lying still reports roughly `STANDARD_GRAVITY` regardless of
/// orientation, so this is close to zero when there is no motion.
#[inline]
pub fn gravity_deviation(x: f32, y: f32, z: f32) -> f32 {
    (vector_magnitude(x, y, z) - STANDARD_GRAVITY).abs()
}

/// Clamp an integer heart rate into the 8-bit measurement range.
///
/// # Example
///
/// ```
/// use hr_peripheral::utils::clamp_bpm;
///
/// assert_eq!(clamp_bpm(-4), 0);
/// assert_eq!(clamp_bpm(72), 72);
/// assert_eq!(clamp_bpm(300), 255);
/// ```
#[inline]
pub fn clamp_bpm(bpm: i32) -> u8 {
    bpm.clamp(0, u8::MAX as i32) as u8
}

/// Round to the nearest integer, ties to the even neighbour.
///
/// `f32::round_ties_even` needs a newer toolchain than the crate's MSRV.
pub fn round_half_even(value: f32) -> f32 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

/// Round a raw sensor reading and accept it only inside `[min, max]`.
///
/// Ties round to even, so `230.5` is accepted as 230 and `0.5` is
/// rejected as 0. Non-finite readings are rejected.
pub fn validate_bpm(raw: f32, min: u8, max: u8) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }

    let rounded = round_half_even(raw);
    if rounded < f32::from(min) || rounded > f32::from(max) {
        return None;
    }

    Some(rounded as u8)
}
