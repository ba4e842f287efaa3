
use std::f64::consts;

use rustfft::num_complex::Complex;

/// Costas two-quadrant arctangent, insensitive to data bit transitions.  Returns [cycles] in [-0.25, 0.25].
pub fn pll_two_quadrant_atan(prompt:Complex<f64>) -> f64 {
	if prompt.re == 0.0 { 0.0 } else { (prompt.im / prompt.re).atan() / (2.0 * consts::PI) }
}

/// Four-quadrant frequency discriminator over two consecutive prompts `t` seconds apart.  Returns [Hz].
pub fn fll_four_quadrant_atan(prompt_s1:Complex<f64>, prompt_s2:Complex<f64>, t:f64) -> f64 {
	let cross = prompt_s1.re * prompt_s2.im - prompt_s2.re * prompt_s1.im;
	let dot   = prompt_s1.re * prompt_s2.re + prompt_s1.im * prompt_s2.im;
	cross.atan2(dot) / (t * 2.0 * consts::PI)
}

/// Normalized early-minus-late envelope.  Returns [chips], positive when the local code is ahead of the signal.
pub fn dll_nc_e_minus_l_normalized(early:Complex<f64>, late:Complex<f64>, spacing_chips:f64) -> f64 {
	let e = early.norm();
	let l = late.norm();
	if e + l == 0.0 { 0.0 } else { (1.0 - spacing_chips) * (e - l) / (e + l) }
}
