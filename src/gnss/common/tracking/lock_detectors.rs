
use std::collections::VecDeque;

use rustfft::num_complex::Complex;

/// Reported when the prompt history has no measurable noise
pub const CN0_CEILING_DB_HZ:f64 = 100.0;

/// Signal-to-noise variance C/N0 estimator over a history of prompt correlations.  Returns [dB-Hz].
pub fn cn0_svn_estimator(prompt_buffer:&VecDeque<Complex<f64>>, coh_integration_time_s:f64) -> f64 {
	let n:f64 = prompt_buffer.len() as f64;
	if n == 0.0 { return 0.0; }
	let p_sig:f64 = {
		let sum:f64 = prompt_buffer.iter().map(|c| c.re.abs()).sum();
		(sum / n).powi(2)
	};
	let p_tot:f64 = {
		let sum:f64 = prompt_buffer.iter().map(|c| c.norm_sqr()).sum();
		sum / n
	};
	if p_tot - p_sig <= 0.0 { return CN0_CEILING_DB_HZ; }
	let snr = p_sig / (p_tot - p_sig);
	if snr <= 0.0 { return 0.0; }
	(10.0 * snr.log10() - 10.0 * coh_integration_time_s.log10()).min(CN0_CEILING_DB_HZ)
}

/// Narrowband carrier lock metric, cos(2 * phase error) averaged over the history: 1 in lock, 0 or below when not
pub fn carrier_lock_detector(prompt_buffer:&VecDeque<Complex<f64>>) -> f64 {
	let tmp_sum_i:f64 = prompt_buffer.iter().map(|c| c.re).sum();
	let tmp_sum_q:f64 = prompt_buffer.iter().map(|c| c.im).sum();
	let nbp:f64 = tmp_sum_i * tmp_sum_i + tmp_sum_q * tmp_sum_q;
	let nbd:f64 = tmp_sum_i * tmp_sum_i - tmp_sum_q * tmp_sum_q;
	if nbp == 0.0 { 0.0 } else { nbd / nbp }
}
