
use rustfft::num_complex::Complex;

use crate::gnss::common::code_table::ReferenceCode;
use super::{CODE_LENGTH_CHIPS, CODE_RATE_CPS, NUM_PRNS};

const G1_TAP:[usize; 2] = [2, 9];
const G2_TAP:[usize; 6] = [1, 2, 5, 7, 8, 9];

// G2 phase selector taps (1-based) for PRN 1 through 32
const PRN_TO_G2_TAP:[(usize, usize); 32] = [
	(2, 6), (3, 7), (4, 8), (5, 9), (1, 9), (2, 10), (1, 8), (2, 9),
	(3, 10), (2, 3), (3, 4), (5, 6), (6, 7), (7, 8), (8, 9), (9, 10),
	(1, 4), (2, 5), (3, 6), (4, 7), (5, 8), (6, 9), (1, 3), (4, 6),
	(5, 7), (6, 8), (7, 9), (8, 10), (1, 6), (2, 7), (3, 8), (4, 9),
];

/// Gold code for the given PRN as bits, 1023 chips long
pub fn prn_bits(prn:usize) -> Vec<u8> {
	let (t0, t1) = PRN_TO_G2_TAP[prn - 1];
	let mut g1 = [1u8; 10];
	let mut g2 = [1u8; 10];

	(0..CODE_LENGTH_CHIPS).map(|_| {
		let chip = (g1[9] + g2[t0 - 1] + g2[t1 - 1]) % 2;

		let fb1 = G1_TAP.iter().map(|&i| g1[i]).sum::<u8>() % 2;
		g1[9] = fb1;
		g1.rotate_right(1);

		let fb2 = G2_TAP.iter().map(|&i| g2[i]).sum::<u8>() % 2;
		g2[9] = fb2;
		g2.rotate_right(1);

		chip
	}).collect()
}

pub fn prn_int(prn:usize) -> Vec<i8> {
	prn_bits(prn).into_iter().map(|b| if b == 0 { -1 } else { 1 }).collect()
}

pub fn prn_complex(prn:usize) -> Vec<Complex<f64>> {
	prn_int(prn).iter().map(|x| Complex{ re: *x as f64, im: 0.0 }).collect()
}

/// Samples the code at `fs` for `num_samples` samples, wrapping over as many periods as needed
pub fn prn_complex_sampled(prn:usize, fs:f64, num_samples:usize) -> Vec<Complex<f64>> {
	let code = prn_complex(prn);
	let chips_per_sample:f64 = CODE_RATE_CPS / fs;

	(0..num_samples).map(|i| {
		let aux:f64 = ((i+1) as f64) * chips_per_sample;
		let code_value_idx:usize = (aux.ceil() as usize).saturating_sub(1);
		code[code_value_idx % CODE_LENGTH_CHIPS]
	}).collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GpsL1Ca;

impl ReferenceCode for GpsL1Ca {
	fn name(&self) -> &'static str { "GPS L1 C/A" }
	fn code_rate_cps(&self) -> f64 { CODE_RATE_CPS }
	fn code_length_chips(&self) -> usize { CODE_LENGTH_CHIPS }
	fn num_satellites(&self) -> u32 { NUM_PRNS }
	fn chips(&self, prn:u32) -> Vec<Complex<f64>> { prn_complex(prn as usize) }
	fn sampled(&self, prn:u32, fs:f64, num_samples:usize) -> Vec<Complex<f64>> { prn_complex_sampled(prn as usize, fs, num_samples) }
}
