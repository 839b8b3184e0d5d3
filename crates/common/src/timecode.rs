//! Timecode conversions.
//!
//! Timeline positions travel as `f64` seconds; the encoder wants integer
//! milliseconds for audio delays and fixed-precision decimal seconds for
//! seeks and durations.

/// Convert seconds to whole milliseconds, rounding to nearest and clamping
/// negative values to zero.
pub fn secs_to_delay_ms(secs: f64) -> u64 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * 1000.0).round() as u64
}

/// Convert milliseconds back to seconds.
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Format seconds the way the encoder accepts seek/duration arguments.
pub fn format_secs(secs: f64) -> String {
    format!("{:.6}", secs.max(0.0))
}

/// Whether two timeline positions agree to within one millisecond.
pub fn approx_same_ms(a: f64, b: f64) -> bool {
    (a - b).abs() <= 0.001 + f64::EPSILON
}
