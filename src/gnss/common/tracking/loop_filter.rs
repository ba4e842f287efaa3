
use crate::config::LoopOrder;

/// FLL-assisted PLL carrier loop filter.  Takes the FLL discriminator in [Hz] and the PLL discriminator in
/// [cycles] and returns the carrier Doppler estimate in [Hz].
#[derive(Debug, Clone, PartialEq)]
pub enum CarrierLoopFilter {
	/// 2nd order PLL with 1st order FLL assist
	Second { a2:f64, w0p:f64, w0f:f64, w:f64 },
	/// 3rd order PLL with 2nd order FLL assist
	Third { a2:f64, a3:f64, b3:f64, w0p:f64, w0f:f64, w:f64, x:f64 },
}

impl CarrierLoopFilter {

	pub fn new(order:LoopOrder, fll_bw_hz:f64, pll_bw_hz:f64) -> Self {
		match order {
			LoopOrder::Second => CarrierLoopFilter::Second {
				a2: 1.414,
				w0p: pll_bw_hz / 0.53,
				w0f: fll_bw_hz / 0.25,
				w: 0.0,
			},
			LoopOrder::Third => CarrierLoopFilter::Third {
				a2: 1.414,
				a3: 1.1,
				b3: 2.4,
				w0p: pll_bw_hz / 0.7845,
				w0f: fll_bw_hz / 0.53,
				w: 0.0,
				x: 0.0,
			},
		}
	}

	pub fn order(&self) -> LoopOrder {
		match self {
			CarrierLoopFilter::Second{ .. } => LoopOrder::Second,
			CarrierLoopFilter::Third{ .. }  => LoopOrder::Third,
		}
	}

	/// Seeds the integrators so the output starts at the acquisition Doppler
	pub fn initialize(&mut self, acq_doppler_hz:f64) {
		match self {
			CarrierLoopFilter::Second{ w, .. } => *w = acq_doppler_hz,
			CarrierLoopFilter::Third{ w, x, .. } => {
				*x = 2.0 * acq_doppler_hz;
				*w = 0.0;
			},
		}
	}

	pub fn get_carrier_error(&mut self, fll_discriminator_hz:f64, pll_discriminator_cycles:f64, correlation_time_s:f64) -> f64 {
		let e_fll = fll_discriminator_hz;
		let e_pll = pll_discriminator_cycles;
		let t = correlation_time_s;

		match self {
			CarrierLoopFilter::Second{ a2, w0p, w0f, w } => {
				let w_new = *w + e_pll * w0p.powi(2) * t + e_fll * *w0f * t;
				let out = 0.5 * (w_new + *w) + *a2 * *w0p * e_pll;
				*w = w_new;
				out
			},
			CarrierLoopFilter::Third{ a2, a3, b3, w0p, w0f, w, x } => {
				*w = *w + t * (w0p.powi(3) * e_pll + w0f.powi(2) * e_fll);
				*x = *x + t * (0.5 * *w + *a2 * *w0f * e_fll + *a3 * w0p.powi(2) * e_pll);
				0.5 * *x + *b3 * *w0p * e_pll
			},
		}
	}

}

/// Second order DLL loop filter; returns the code NCO correction in [chips/s]
#[derive(Debug, Clone, PartialEq)]
pub struct DllFilter {
	pub tau1:f64,
	pub tau2:f64,
	pub pdi:f64,
	old_nco:f64,
	old_error:f64,
}

impl DllFilter {

	pub fn new(dll_bw_hz:f64, pdi:f64) -> Self {
		let zeta = 0.7;
		let k = 1.0;
		let wn = (dll_bw_hz * 8.0 * zeta) / (4.0 * zeta * zeta + 1.0);
		let tau1 = k / (wn * wn);
		let tau2 = (2.0 * zeta) / wn;
		Self{ tau1, tau2, pdi, old_nco: 0.0, old_error: 0.0 }
	}

	pub fn initialize(&mut self) {
		self.old_nco = 0.0;
		self.old_error = 0.0;
	}

	pub fn apply(&mut self, code_error_chips:f64) -> f64 {
		let nco = self.old_nco + (self.tau2 / self.tau1) * (code_error_chips - self.old_error) + code_error_chips * (self.pdi / self.tau1);
		self.old_nco = nco;
		self.old_error = code_error_chips;
		nco
	}

}
