
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use num_traits::Zero;

use crate::error::{AcqError, AcqResult};
use crate::utils;

/// A family of spreading codes, one per satellite id in 1..=num_satellites
pub trait ReferenceCode: Send + Sync {
	fn name(&self) -> &'static str;
	fn code_rate_cps(&self) -> f64;
	fn code_length_chips(&self) -> usize;
	fn num_satellites(&self) -> u32;

	/// One code period at one sample per chip
	fn chips(&self, prn:u32) -> Vec<Complex<f64>>;

	/// The code sampled at `fs`, starting at chip zero
	fn sampled(&self, prn:u32, fs:f64, num_samples:usize) -> Vec<Complex<f64>>;
}

/// Read-only table of local replicas for every satellite id, built once for a given sample rate and shared
/// by all channels.  The frequency-domain replicas are one code period zero-padded to the FFT size, transformed
/// and conjugated, so circular correlation against a block of two code periods has no wraparound for the first
/// `code_length` lags.
pub struct ReferenceCodeTable {
	pub name: &'static str,
	pub fs: f64,
	pub code_rate_cps: f64,
	pub code_length_chips: usize,
	pub code_length: usize,
	pub fft_size: usize,
	fft_codes: Vec<Vec<Complex<f64>>>,
	sampled_codes: Vec<Vec<Complex<f64>>>,
	chip_codes: Vec<Arc<[Complex<f64>]>>,
}

type TableKey = (&'static str, u64);

static SHARED_TABLES:Lazy<Mutex<HashMap<TableKey, Arc<ReferenceCodeTable>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

impl ReferenceCodeTable {

	pub fn new<R: ReferenceCode + ?Sized>(code:&R, fs:f64) -> AcqResult<Self> {
		let code_length = if fs > 0.0 { utils::code_length_samples(fs, code.code_rate_cps(), code.code_length_chips()) } else { 0 };
		if code_length == 0 {
			return Err(AcqError::Config(format!("{} sampled at {} [Hz] has no samples per code period", code.name(), fs)));
		}
		let fft_size = utils::fft_size_for_code(code_length);

		let mut planner = FftPlanner::<f64>::new();
		let fft = planner.plan_fft_forward(fft_size);

		let n = code.num_satellites() as usize;
		let mut fft_codes = Vec::with_capacity(n);
		let mut sampled_codes = Vec::with_capacity(n);
		let mut chip_codes = Vec::with_capacity(n);

		for prn in 1..=code.num_satellites() {
			let sampled = code.sampled(prn, fs, code_length);

			let mut buffer:Vec<Complex<f64>> = vec![Complex::zero(); fft_size];
			buffer[..code_length].copy_from_slice(&sampled);
			fft.process(&mut buffer);
			for c in buffer.iter_mut() { *c = c.conj(); }

			fft_codes.push(buffer);
			sampled_codes.push(sampled);
			chip_codes.push(Arc::from(code.chips(prn)));
		}

		log::debug!("Built {} code table: fs={} [Hz], code_length={}, fft_size={}, {} satellites",
			code.name(), fs, code_length, fft_size, n);

		Ok(Self{ name: code.name(), fs, code_rate_cps: code.code_rate_cps(), code_length_chips: code.code_length_chips(),
			code_length, fft_size, fft_codes, sampled_codes, chip_codes })
	}

	/// Returns the process-wide table for this code family and sample rate, building it the first time it's
	/// requested.  A different sample rate gets its own table.
	pub fn shared<R: ReferenceCode + ?Sized>(code:&R, fs:f64) -> AcqResult<Arc<Self>> {
		let key:TableKey = (code.name(), fs.to_bits());
		let mut tables = SHARED_TABLES.lock().map_err(|_| AcqError::Config("Code table cache poisoned".to_string()))?;
		if let Some(table) = tables.get(&key) {
			return Ok(table.clone());
		}
		let table = Arc::new(Self::new(code, fs)?);
		tables.insert(key, table.clone());
		Ok(table)
	}

	pub fn num_satellites(&self) -> u32 { self.fft_codes.len() as u32 }

	fn index(&self, prn:u32) -> AcqResult<usize> {
		if prn >= 1 && prn <= self.num_satellites() { Ok((prn - 1) as usize) }
		else { Err(AcqError::UnknownSatellite(prn)) }
	}

	/// Conjugated spectrum of the zero-padded replica, `fft_size` long
	pub fn fft_code(&self, prn:u32) -> AcqResult<&[Complex<f64>]> { Ok(&self.fft_codes[self.index(prn)?]) }

	/// One code period sampled at `fs`, `code_length` long
	pub fn sampled_code(&self, prn:u32) -> AcqResult<&[Complex<f64>]> { Ok(&self.sampled_codes[self.index(prn)?]) }

	/// One code period at one sample per chip, as used by the correlator bank
	pub fn chips(&self, prn:u32) -> AcqResult<Arc<[Complex<f64>]>> { Ok(self.chip_codes[self.index(prn)?].clone()) }

}
