//! Engine configuration.  Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration.  Values that can't be used as given are corrected with a warning
//! when the search geometry is derived; only a zero code length is fatal.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::error::{AcqError, AcqResult};
use crate::gnss::gps_l1_ca;
use crate::utils;

pub const DEFAULT_FS_HZ:f64 = 2048000.0;
pub const DEFAULT_DOPPLER_MAX_HZ:u32 = 5000;
pub const DEFAULT_DOPPLER_STEP_HZ:u32 = 500;
/// Largest Doppler search half-width accepted; wider requests are clamped to this or to half the sample rate
pub const DOPPLER_MAX_CEILING_HZ:u32 = 100_000;
pub const DEFAULT_THRESHOLD:f64 = 20.0;
pub const DEFAULT_MAX_DWELLS:usize = 4;
pub const DEFAULT_SECOND_NBINS:usize = 4;
pub const DEFAULT_SECOND_DOPPLER_STEP_HZ:f64 = 125.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatistic {
	/// Peak power over the mean power of the peak's Doppler row outside the exclusion window
	PeakToMean,
	/// Peak power over the second highest peak of the same Doppler row outside the exclusion window
	PeakToSecondPeak,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcqConf {
	pub fs_in:f64,
	pub prn:u32,
	pub channel:usize,
	pub code_rate_cps:f64,
	pub code_length_chips:usize,
	pub doppler_max:u32,
	pub doppler_step:u32,
	pub doppler_center:i32,
	pub threshold:f64,
	pub max_dwells:usize,
	pub test_statistic:TestStatistic,
	pub make_two_steps:bool,
	pub num_doppler_bins_step2:usize,
	pub doppler_step2:f64,
	pub repeat_satellite:bool,
	pub blocking_on_standby:bool,
	pub in_streams:usize,
	pub out_streams:usize,
	pub dump:bool,
	pub dump_filename:String,
}

impl Default for AcqConf {
	fn default() -> Self {
		Self {
			fs_in: DEFAULT_FS_HZ,
			prn: 1,
			channel: 0,
			code_rate_cps: gps_l1_ca::CODE_RATE_CPS,
			code_length_chips: gps_l1_ca::CODE_LENGTH_CHIPS,
			doppler_max: DEFAULT_DOPPLER_MAX_HZ,
			doppler_step: DEFAULT_DOPPLER_STEP_HZ,
			doppler_center: 0,
			threshold: DEFAULT_THRESHOLD,
			max_dwells: DEFAULT_MAX_DWELLS,
			test_statistic: TestStatistic::PeakToMean,
			make_two_steps: true,
			num_doppler_bins_step2: DEFAULT_SECOND_NBINS,
			doppler_step2: DEFAULT_SECOND_DOPPLER_STEP_HZ,
			repeat_satellite: false,
			blocking_on_standby: true,
			in_streams: 1,
			out_streams: 0,
			dump: false,
			dump_filename: "./acquisition".to_string(),
		}
	}
}

/// Everything about the search that is fixed for the lifetime of one acquisition configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SearchGeometry {
	pub code_length:usize,
	pub fft_size:usize,
	pub excludelimit:usize,
	pub doppler_max:u32,
	pub doppler_step:u32,
	pub num_doppler_bins:usize,
	pub max_dwells:usize,
	pub num_doppler_bins_step2:usize,
	pub doppler_step2:f64,
}

impl SearchGeometry {

	/// Doppler of coarse bin `idx`; bins are symmetric about the configured center
	pub fn coarse_doppler_hz(&self, idx:usize, doppler_center:i32) -> f64 {
		(doppler_center as f64) - (self.doppler_max as f64) + (idx as f64) * (self.doppler_step as f64)
	}

	/// Doppler of fine bin `idx`; bins are placed symmetrically about the coarse estimate
	pub fn fine_doppler_hz(&self, idx:usize, coarse_doppler_hz:f64) -> f64 {
		let half:f64 = (self.num_doppler_bins_step2 as f64 - 1.0) / 2.0;
		coarse_doppler_hz + ((idx as f64) - half) * self.doppler_step2
	}

}

impl AcqConf {

	pub fn geometry(&self) -> AcqResult<SearchGeometry> {
		if !(self.fs_in > 0.0) || !(self.code_rate_cps > 0.0) || self.code_length_chips == 0 {
			return Err(AcqError::Config(format!("fs_in={} code_rate_cps={} code_length_chips={} give no code length",
				self.fs_in, self.code_rate_cps, self.code_length_chips)));
		}

		let code_length = utils::code_length_samples(self.fs_in, self.code_rate_cps, self.code_length_chips);
		if code_length == 0 {
			return Err(AcqError::Config(format!("code length computed from fs_in={} is zero", self.fs_in)));
		}

		let fft_size = utils::fft_size_for_code(code_length);
		let excludelimit = utils::exclude_limit(self.fs_in, self.code_rate_cps);

		let doppler_step = if self.doppler_step == 0 {
			log::warn!("doppler_step of zero replaced with {} [Hz]", DEFAULT_DOPPLER_STEP_HZ);
			DEFAULT_DOPPLER_STEP_HZ
		} else { self.doppler_step };

		let ceiling = DOPPLER_MAX_CEILING_HZ.min((self.fs_in / 2.0).floor() as u32);
		let doppler_max = if self.doppler_max > ceiling {
			log::warn!("doppler_max of {} [Hz] clamped to {} [Hz]", self.doppler_max, ceiling);
			ceiling
		} else { self.doppler_max };

		let num_doppler_bins = ((2 * doppler_max as u64) / (doppler_step as u64)) as usize + 1;

		let max_dwells = if self.max_dwells == 0 {
			log::warn!("max_dwells of zero replaced with 1");
			1
		} else { self.max_dwells };

		let num_doppler_bins_step2 = if self.num_doppler_bins_step2 == 0 {
			log::warn!("second_nbins of zero replaced with {}", DEFAULT_SECOND_NBINS);
			DEFAULT_SECOND_NBINS
		} else { self.num_doppler_bins_step2 };

		let doppler_step2 = if !(self.doppler_step2 > 0.0) {
			log::warn!("second_doppler_step of {} replaced with {} [Hz]", self.doppler_step2, DEFAULT_SECOND_DOPPLER_STEP_HZ);
			DEFAULT_SECOND_DOPPLER_STEP_HZ
		} else { self.doppler_step2 };

		Ok(SearchGeometry{ code_length, fft_size, excludelimit, doppler_max, doppler_step, num_doppler_bins, max_dwells,
			num_doppler_bins_step2, doppler_step2 })
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopOrder {
	/// 2nd order PLL assisted by a 1st order FLL
	Second,
	/// 3rd order PLL assisted by a 2nd order FLL
	Third,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConf {
	pub fs_in:f64,
	pub carrier_freq_hz:f64,
	pub code_rate_cps:f64,
	pub code_length_chips:usize,
	pub pll_bw_hz:f64,
	pub fll_bw_hz:f64,
	pub dll_bw_hz:f64,
	pub order:LoopOrder,
	pub early_late_space_chips:f64,
	pub cn0_samples:usize,
	pub cn0_min_db_hz:f64,
	pub carrier_lock_threshold:f64,
	pub max_lock_fail:usize,
}

impl Default for TrackingConf {
	fn default() -> Self {
		Self {
			fs_in: DEFAULT_FS_HZ,
			carrier_freq_hz: gps_l1_ca::CARRIER_FREQ_HZ,
			code_rate_cps: gps_l1_ca::CODE_RATE_CPS,
			code_length_chips: gps_l1_ca::CODE_LENGTH_CHIPS,
			pll_bw_hz: 20.0,
			fll_bw_hz: 10.0,
			dll_bw_hz: 2.0,
			order: LoopOrder::Second,
			early_late_space_chips: 0.5,
			cn0_samples: 20,
			cn0_min_db_hz: 25.0,
			carrier_lock_threshold: 0.85,
			max_lock_fail: 200,
		}
	}
}

impl TrackingConf {

	/// Returns a copy with unusable values replaced by defaults
	pub fn corrected(&self) -> AcqResult<Self> {
		let default = Self::default();
		let mut ans = self.clone();
		if !(ans.fs_in > 0.0) || ans.code_length_chips == 0 || !(ans.code_rate_cps > 0.0) {
			return Err(AcqError::Config(format!("fs_in={} code_rate_cps={} code_length_chips={} give no code period",
				ans.fs_in, ans.code_rate_cps, ans.code_length_chips)));
		}
		if !(ans.pll_bw_hz > 0.0) {
			log::warn!("pll_bw_hz of {} replaced with {}", ans.pll_bw_hz, default.pll_bw_hz);
			ans.pll_bw_hz = default.pll_bw_hz;
		}
		if ans.fll_bw_hz < 0.0 {
			log::warn!("fll_bw_hz of {} replaced with {}", ans.fll_bw_hz, default.fll_bw_hz);
			ans.fll_bw_hz = default.fll_bw_hz;
		}
		if !(ans.dll_bw_hz > 0.0) {
			log::warn!("dll_bw_hz of {} replaced with {}", ans.dll_bw_hz, default.dll_bw_hz);
			ans.dll_bw_hz = default.dll_bw_hz;
		}
		if !(ans.early_late_space_chips > 0.0 && ans.early_late_space_chips < 1.0) {
			log::warn!("early_late_space_chips of {} replaced with {}", ans.early_late_space_chips, default.early_late_space_chips);
			ans.early_late_space_chips = default.early_late_space_chips;
		}
		if ans.cn0_samples < 2 {
			log::warn!("cn0_samples of {} replaced with {}", ans.cn0_samples, default.cn0_samples);
			ans.cn0_samples = default.cn0_samples;
		}
		Ok(ans)
	}

	pub fn code_period_sec(&self) -> f64 { (self.code_length_chips as f64) / self.code_rate_cps }

}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	pub acquisition:AcqConf,
	pub tracking:TrackingConf,
}

impl EngineConfig {

	pub fn from_json_file<P: AsRef<Path>>(path:P) -> AcqResult<Self> {
		let f = File::open(path)?;
		let cfg:Self = serde_json::from_reader(BufReader::new(f))?;
		Ok(cfg)
	}

	pub fn from_json_str(s:&str) -> AcqResult<Self> { Ok(serde_json::from_str(s)?) }

	/// Keeps the sample rate and code definition consistent between the two stages
	pub fn with_sample_rate(mut self, fs:f64) -> Self {
		self.acquisition.fs_in = fs;
		self.tracking.fs_in = fs;
		self
	}

}
