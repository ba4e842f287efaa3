
//! Reference code spectra in the packed fixed-point layout expected by the acquisition accelerator, and
//! discovery of the accelerator's UIO device.

use std::fs;
use std::path::{Path, PathBuf};

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

use crate::config::{AcqConf, SearchGeometry};
use crate::error::{AcqError, AcqResult};
use crate::gnss::common::code_table::ReferenceCode;

pub const QUANT_BITS_LOCAL_CODE:u32 = 16;

const SELECT_LSBITS:u32 = 0x0000FFFF;
const SELECT_MSBITS:u32 = 0xFFFF0000;
const SHL_CODE_BITS:i32 = 65536;

const UIO_SYS_ROOT:&str = "/sys/class/uio";
const UIO_DEV_ROOT:&str = "/dev";

/// Quantizes a spectrum to `QUANT_BITS_LOCAL_CODE` bits per component, scaled by its largest component, and
/// packs each bin into one word with the real part in the low half and the imaginary part in the high half
pub fn pack_code_spectrum(spectrum:&[Complex<f64>]) -> Vec<u32> {
	let max:f64 = spectrum.iter().fold(0.0, |m, c| m.max(c.re.abs()).max(c.im.abs()));
	if max == 0.0 { return vec![0; spectrum.len()]; }

	let full_scale:f64 = (2.0f64).powi(QUANT_BITS_LOCAL_CODE as i32 - 1) - 1.0;
	spectrum.iter().map(|c| {
		let re = (c.re * full_scale / max).floor() as i32;
		let im = (c.im * full_scale / max).floor() as i32;
		((re as u32) & SELECT_LSBITS) | ((im.wrapping_mul(SHL_CODE_BITS) as u32) & SELECT_MSBITS)
	}).collect()
}

/// Inverse of the packing, for inspection
pub fn unpack_code_word(word:u32) -> (i16, i16) { ((word & SELECT_LSBITS) as u16 as i16, (word >> 16) as u16 as i16) }

/// Packed spectra for every satellite id, `fft_size` words each.  Each code is repeated twice and zero padded
/// before the transform, matching the accelerator's two-period input block.
pub struct FpgaCodeTable {
	pub code_length:usize,
	pub fft_size:usize,
	words:Vec<u32>,
}

impl FpgaCodeTable {

	pub fn new<R: ReferenceCode + ?Sized>(code:&R, fs:f64, geometry:&SearchGeometry) -> Self {
		let code_length = geometry.code_length;
		let fft_size = geometry.fft_size;
		let fft = FftPlanner::<f64>::new().plan_fft_forward(fft_size);

		let mut words:Vec<u32> = Vec::with_capacity(fft_size * code.num_satellites() as usize);
		let mut buffer:Vec<Complex<f64>> = vec![Complex::zero(); fft_size];

		for prn in 1..=code.num_satellites() {
			let sampled = code.sampled(prn, fs, code_length);
			for c in buffer.iter_mut() { *c = Complex::zero(); }
			buffer[..code_length].copy_from_slice(&sampled);
			buffer[code_length..2*code_length].copy_from_slice(&sampled);

			fft.process(&mut buffer);
			for c in buffer.iter_mut() { *c = c.conj(); }

			words.extend(pack_code_spectrum(&buffer));
		}

		Self{ code_length, fft_size, words }
	}

	pub fn num_satellites(&self) -> u32 { (self.words.len() / self.fft_size) as u32 }

	pub fn packed_code(&self, prn:u32) -> AcqResult<&[u32]> {
		if prn == 0 || prn > self.num_satellites() { return Err(AcqError::UnknownSatellite(prn)); }
		let start = (prn as usize - 1) * self.fft_size;
		Ok(&self.words[start..start+self.fft_size])
	}

}

/// Device path of the `index`-th UIO device named `name`
pub fn find_uio_device(name:&str, index:usize) -> AcqResult<PathBuf> {
	find_uio_device_in(Path::new(UIO_SYS_ROOT), Path::new(UIO_DEV_ROOT), name, index)
}

pub fn find_uio_device_in(sys_root:&Path, dev_root:&Path, name:&str, index:usize) -> AcqResult<PathBuf> {
	let not_found = || AcqError::DeviceNotFound(format!("No UIO device number {} named {} under {}", index, name, sys_root.display()));

	let entries = fs::read_dir(sys_root).map_err(|_| not_found())?;

	let mut uio_numbers:Vec<u32> = entries.filter_map(|e| e.ok())
		.filter_map(|e| e.file_name().to_str().and_then(|s| s.strip_prefix("uio")).and_then(|n| n.parse::<u32>().ok()))
		.collect();
	uio_numbers.sort();

	uio_numbers.into_iter()
		.filter(|n| match fs::read_to_string(sys_root.join(format!("uio{}", n)).join("name")) {
			Ok(s) => s.trim() == name,
			Err(_) => false,
		})
		.nth(index)
		.map(|n| dev_root.join(format!("uio{}", n)))
		.ok_or_else(not_found)
}

/// Everything the accelerator needs for one acquisition channel.  Construction fails if the device can't be found.
pub struct FpgaAcquisition {
	pub device:PathBuf,
	pub geometry:SearchGeometry,
	/// The accelerator excludes one extra sample on each side of the peak
	pub excludelimit:usize,
	pub table:FpgaCodeTable,
}

impl FpgaAcquisition {

	pub fn new<R: ReferenceCode + ?Sized>(conf:&AcqConf, code:&R, device_name:&str) -> AcqResult<Self> {
		let device = find_uio_device(device_name, 0)?;
		Self::with_device(conf, code, device)
	}

	pub fn with_device<R: ReferenceCode + ?Sized>(conf:&AcqConf, code:&R, device:PathBuf) -> AcqResult<Self> {
		let geometry = conf.geometry()?;
		let excludelimit = 1 + geometry.excludelimit;
		let table = FpgaCodeTable::new(code, conf.fs_in, &geometry);
		log::info!("Acquisition accelerator at {}: {} codes of {} words", device.display(), table.num_satellites(), table.fft_size);
		Ok(Self{ device, geometry, excludelimit, table })
	}

}
