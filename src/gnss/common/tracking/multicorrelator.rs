
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

use crate::types::IqSample;

/// Bank of correlators sampling one local code at several fractional chip offsets.  All buffers are
/// allocated by `init`; resampling and correlation reuse them.
pub struct Multicorrelator<S: IqSample> {
	local_code: Option<Arc<[Complex<f64>]>>,
	code_length_chips: usize,
	shifts_chips: Vec<f64>,
	local_codes_resampled: Vec<Vec<Complex<f64>>>,
	accumulators: Vec<Complex<f64>>,
	corr_out: Vec<S>,
	max_signal_length_samples: usize,
}

impl<S: IqSample> Default for Multicorrelator<S> {
	fn default() -> Self { Self::new() }
}

impl<S: IqSample> Multicorrelator<S> {

	pub fn new() -> Self {
		Self{ local_code: None, code_length_chips: 0, shifts_chips: vec![], local_codes_resampled: vec![],
			accumulators: vec![], corr_out: vec![], max_signal_length_samples: 0 }
	}

	/// Allocates `n_correlators` taps able to correlate up to `max_signal_length_samples` samples per call,
	/// replacing any previous allocation
	pub fn init(&mut self, max_signal_length_samples:usize, n_correlators:usize) -> Result<(), &'static str> {
		if max_signal_length_samples == 0 || n_correlators == 0 {
			return Err("Correlator bank needs at least one tap and a nonzero signal length");
		}
		self.free();
		self.shifts_chips = vec![0.0; n_correlators];
		self.local_codes_resampled = (0..n_correlators).map(|_| vec![Complex::zero(); max_signal_length_samples]).collect();
		self.accumulators = vec![Complex::zero(); n_correlators];
		self.corr_out = vec![S::default(); n_correlators];
		self.max_signal_length_samples = max_signal_length_samples;
		Ok(())
	}

	/// Binds the code (one sample per chip) and the offset of every tap in [chips], negative taps being early
	pub fn set_local_code_and_taps(&mut self, code_length_chips:usize, local_code:Arc<[Complex<f64>]>, shifts_chips:&[f64]) -> Result<(), &'static str> {
		if shifts_chips.len() != self.shifts_chips.len() {
			return Err("Number of tap shifts doesn't match the number of correlators");
		}
		if code_length_chips == 0 || local_code.len() < code_length_chips {
			return Err("Local code is shorter than its stated length");
		}
		self.shifts_chips.copy_from_slice(shifts_chips);
		self.code_length_chips = code_length_chips;
		self.local_code = Some(local_code);
		Ok(())
	}

	/// Resamples the local code into every tap for the next `correlator_length_samples` samples.  The code phase
	/// of the first sample is `rem_code_phase_chips` and it advances `code_phase_step_chips` per sample.
	pub fn update_local_code(&mut self, correlator_length_samples:usize, rem_code_phase_chips:f64, code_phase_step_chips:f64) {
		assert!(correlator_length_samples <= self.max_signal_length_samples, "Correlation length exceeds the allocated length");
		let code:&[Complex<f64>] = match &self.local_code {
			Some(c) => c,
			None => panic!("Local code has not been set"),
		};
		let code_len = self.code_length_chips as i64;

		for (shift, resampled) in self.shifts_chips.iter().zip(self.local_codes_resampled.iter_mut()) {
			let start = rem_code_phase_chips + shift;
			for (n, r) in resampled[..correlator_length_samples].iter_mut().enumerate() {
				let idx = (start + (n as f64) * code_phase_step_chips).floor() as i64;
				*r = code[idx.rem_euclid(code_len) as usize];
			}
		}
	}

	/// Resamples the code, removes the carrier with a local oscillator starting at `rem_carrier_phase_rad` and
	/// advancing `phase_step_rad` per sample, and correlates `signal_length_samples` samples against every tap
	pub fn carrier_wipeoff_multicorrelator_resampler(&mut self, input:&[S], rem_carrier_phase_rad:f64, phase_step_rad:f64,
		rem_code_phase_chips:f64, code_phase_step_chips:f64, signal_length_samples:usize) -> &[S] {

		assert!(input.len() >= signal_length_samples, "Input is shorter than the correlation length");
		self.update_local_code(signal_length_samples, rem_code_phase_chips, code_phase_step_chips);

		for a in self.accumulators.iter_mut() { *a = Complex::zero(); }

		let phase_inc = Complex::from_polar(1.0, -phase_step_rad);
		let mut phase = Complex::from_polar(1.0, -rem_carrier_phase_rad);

		for (n, x) in input[..signal_length_samples].iter().enumerate() {
			let wiped = x.to_c64() * phase;
			phase = phase * phase_inc;
			for (acc, code) in self.accumulators.iter_mut().zip(self.local_codes_resampled.iter()) {
				*acc += wiped * code[n];
			}
		}

		for (out, acc) in self.corr_out.iter_mut().zip(self.accumulators.iter()) {
			*out = S::from_c64(*acc);
		}
		&self.corr_out
	}

	/// Output of the last correlation, one value per tap
	pub fn outputs(&self) -> &[S] { &self.corr_out }

	pub fn n_correlators(&self) -> usize { self.corr_out.len() }
	pub fn max_signal_length_samples(&self) -> usize { self.max_signal_length_samples }
	pub fn has_local_code(&self) -> bool { self.local_code.is_some() }

	/// Releases every tap buffer and the local code
	pub fn free(&mut self) {
		self.local_code = None;
		self.code_length_chips = 0;
		self.shifts_chips = vec![];
		self.local_codes_resampled = vec![];
		self.accumulators = vec![];
		self.corr_out = vec![];
		self.max_signal_length_samples = 0;
	}

}
