
use std::f64::consts;

/// Number of samples spanned by one code period, rounded to the nearest integer
pub fn code_length_samples(fs:f64, code_rate_cps:f64, code_length_chips:usize) -> usize {
	(fs / (code_rate_cps / code_length_chips as f64)).round() as usize
}

/// Smallest power of two that fits two full code periods, so circular correlation can be done on
/// a zero-padded block without wraparound
pub fn fft_size_for_code(code_length:usize) -> usize { (2 * code_length).next_power_of_two() }

/// Half-width of the code phase window excluded around a peak, one chip expressed in samples
pub fn exclude_limit(fs:f64, code_rate_cps:f64) -> usize { (fs / code_rate_cps).ceil() as usize }

/// Wraps a phase in radians to [-pi, pi)
pub fn wrap_to_pi(x:f64) -> f64 {
	let y = (x + consts::PI).rem_euclid(2.0 * consts::PI);
	y - consts::PI
}
