
use std::f64::consts;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner};
use rustfft::num_complex::Complex;
use num_traits::Zero;

use crate::config::TestStatistic;

pub mod fine_doppler_pcps;
pub mod fpga;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
	Standby,
	Loading,
	Searching,
	Refining,
	Positive,
	Negative,
}

/// Control messages accepted by an acquisition block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcqCommand {
	Reset,
	SetActive(bool),
	SetState(i32),
	SetThreshold(f64),
	SetDopplerCenter(i32),
	SetDopplerMax(u32),
	SetDopplerStep(u32),
	Stop,
}

/// Correlation power over (Doppler bin, code phase), accumulated noncoherently across dwells
#[derive(Debug, Clone)]
pub struct DopplerGrid {
	num_bins: usize,
	code_length: usize,
	data: Vec<f64>,
}

/// Location and value of the largest cell in a grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPeak {
	pub doppler_idx:usize,
	pub code_phase:usize,
	pub power:f64,
}

impl DopplerGrid {

	pub fn new(num_bins:usize, code_length:usize) -> Self {
		Self{ num_bins, code_length, data: vec![0.0; num_bins * code_length] }
	}

	pub fn num_bins(&self) -> usize { self.num_bins }
	pub fn code_length(&self) -> usize { self.code_length }

	pub fn clear(&mut self) { for p in self.data.iter_mut() { *p = 0.0; } }

	pub fn row(&self, doppler_idx:usize) -> &[f64] {
		&self.data[doppler_idx*self.code_length..(doppler_idx+1)*self.code_length]
	}

	pub fn row_mut(&mut self, doppler_idx:usize) -> &mut [f64] {
		&mut self.data[doppler_idx*self.code_length..(doppler_idx+1)*self.code_length]
	}

	pub fn as_slice(&self) -> &[f64] { &self.data }

	/// First occurrence of the largest power, scanning Doppler bins in order
	pub fn peak(&self) -> GridPeak {
		let mut best = GridPeak{ doppler_idx: 0, code_phase: 0, power: 0.0 };
		for (idx, p) in self.data.iter().enumerate() {
			if *p > best.power {
				best = GridPeak{ doppler_idx: idx / self.code_length, code_phase: idx % self.code_length, power: *p };
			}
		}
		best
	}

}

/// Whether code phase `idx` lies within `excludelimit` samples of `peak_idx`, wrapping around the code period
pub fn in_exclusion_zone(idx:usize, peak_idx:usize, excludelimit:usize, code_length:usize) -> bool {
	let d = if idx > peak_idx { idx - peak_idx } else { peak_idx - idx };
	d.min(code_length - d) <= excludelimit
}

/// Detection statistic for the peak at `peak_idx` of one Doppler row.  Cells within `excludelimit` samples of
/// the peak are left out of the reference so the peak's own correlation sidelobes don't bias it.  A reference
/// of zero gives a statistic of zero.
pub fn caf_test_statistic(row:&[f64], peak_idx:usize, excludelimit:usize, kind:TestStatistic) -> f64 {
	let code_length = row.len();
	if code_length == 0 { return 0.0; }
	let peak = row[peak_idx];

	let outside = row.iter().enumerate()
		.filter(|(idx, _)| !in_exclusion_zone(*idx, peak_idx, excludelimit, code_length))
		.map(|(_, p)| *p);

	let reference:f64 = match kind {
		TestStatistic::PeakToMean => {
			let (sum, n) = outside.fold((0.0, 0usize), |(s, n), p| (s + p, n + 1));
			if n == 0 { 0.0 } else { sum / (n as f64) }
		},
		TestStatistic::PeakToSecondPeak => outside.fold(0.0, f64::max),
	};

	if reference > 0.0 { peak / reference } else { 0.0 }
}

/// Parallel code phase search over one block of samples: carrier wipeoff at a trial Doppler, forward FFT,
/// multiplication by the conjugated code spectrum, inverse FFT.  Buffers are allocated once and reused.
pub struct PcpsCorrelator {
	pub fs:f64,
	pub code_length:usize,
	pub fft_size:usize,
	fft:  Arc<dyn Fft<f64>>,
	ifft: Arc<dyn Fft<f64>>,
	buffer:  Vec<Complex<f64>>,
	scratch: Vec<Complex<f64>>,
}

impl PcpsCorrelator {

	pub fn new(fs:f64, code_length:usize, fft_size:usize) -> Self {
		let mut planner = FftPlanner::<f64>::new();
		let fft  = planner.plan_fft_forward(fft_size);
		let ifft = planner.plan_fft_inverse(fft_size);
		let scratch_len = fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len());

		Self{ fs, code_length, fft_size, fft, ifft,
			buffer:  vec![Complex::zero(); fft_size],
			scratch: vec![Complex::zero(); scratch_len] }
	}

	/// Adds the correlation power of the first `code_length` lags into `row`.  `signal` holds at most
	/// `fft_size` samples and is zero padded; `fft_code` is the conjugated spectrum of the zero padded replica.
	pub fn accumulate(&mut self, signal:&[Complex<f64>], doppler_hz:f64, fft_code:&[Complex<f64>], row:&mut [f64]) {
		let n = signal.len().min(self.fft_size);

		// Wipe the carrier off the input signal
		let phase_step_rad:f64 = (-2.0 * consts::PI * doppler_hz) / self.fs;
		for (idx, x) in signal[..n].iter().enumerate() {
			let phase = phase_step_rad * (idx as f64);
			self.buffer[idx] = *x * Complex{ re: phase.cos(), im: phase.sin() };
		}
		for c in self.buffer[n..].iter_mut() { *c = Complex::zero(); }

		self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

		// Multiplication in the frequency domain is circular correlation in the time domain
		for (a, b) in self.buffer.iter_mut().zip(fft_code.iter()) { *a = *a * *b; }

		self.ifft.process_with_scratch(&mut self.buffer, &mut self.scratch);

		let scale:f64 = 1.0 / (self.fft_size as f64);
		for (p, c) in row.iter_mut().zip(self.buffer[..self.code_length].iter()) {
			*p += (*c * scale).norm_sqr();
		}
	}

}
