
use std::collections::VecDeque;
use std::f64::consts;
use std::sync::Arc;

use rustfft::num_complex::Complex;

use crate::{DigSigProcErr as DSPErr};
use crate::block::{BlockFunctionality, BlockResult, Work};
use crate::config::TrackingConf;
use crate::error::{AcqError, AcqResult};
use crate::gnss::common::code_table::ReferenceCodeTable;
use crate::gnss::common::synchro::GnssSynchro;
use crate::gnss::gps_l1_ca::signal_modulation::GpsL1Ca;
use crate::types::IqSample;
use crate::utils::wrap_to_pi;

pub mod discriminators;
pub mod lock_detectors;
pub mod loop_filter;
pub mod multicorrelator;


use self::discriminators::{dll_nc_e_minus_l_normalized, fll_four_quadrant_atan, pll_two_quadrant_atan};
use self::lock_detectors::{carrier_lock_detector, cn0_svn_estimator};
use self::loop_filter::{CarrierLoopFilter, DllFilter};
use self::multicorrelator::Multicorrelator;

const EARLY:usize  = 0;
const PROMPT:usize = 1;
const LATE:usize   = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
	/// No satellite assigned; input is consumed and counted
	Idle,
	/// Skipping ahead to the first code period boundary predicted by the acquisition
	PullIn,
	Tracking,
	/// Lock was declared lost; behaves like Idle until restarted
	LostLock,
}

#[derive(Debug, Clone)]
pub enum TrackCommand {
	/// Start from an acquisition record, using the block's own sample counter as the current sample
	Start(GnssSynchro),
	Stop,
}

/// Code and carrier tracking of one satellite: an early/prompt/late correlator bank closed by an FLL-assisted PLL
/// and a noncoherent DLL.  One output record is produced per code period.
pub struct Tracking<S: IqSample> {
	conf: TrackingConf,
	table: Arc<ReferenceCodeTable>,
	correlator: Multicorrelator<S>,
	carrier_filter: CarrierLoopFilter,
	code_filter: DllFilter,
	code_period_s: f64,
	code_period_samples: f64,

	state: TrackingState,
	synchro: GnssSynchro,
	sample_counter: u64,
	samples_to_skip: u64,

	carrier_doppler_hz: f64,
	code_freq_chips: f64,
	rem_code_phase_chips: f64,
	rem_carr_phase_rad: f64,
	last_prompt: Option<Complex<f64>>,
	prompt_buffer: VecDeque<Complex<f64>>,
	cn0_db_hz: f64,
	carrier_lock_test: f64,
	lock_fail_counter: usize,
}

impl<S: IqSample> Tracking<S> {

	/// Tracks GPS L1 C/A using the process-wide code table for the configured sample rate
	pub fn new(conf:TrackingConf) -> AcqResult<Self> {
		let table = ReferenceCodeTable::shared(&GpsL1Ca, conf.fs_in)?;
		Self::with_code_table(conf, table)
	}

	pub fn with_code_table(conf:TrackingConf, table:Arc<ReferenceCodeTable>) -> AcqResult<Self> {
		let conf = conf.corrected()?;
		if table.code_length_chips != conf.code_length_chips || (table.fs - conf.fs_in).abs() > 1.0e-6 {
			return Err(AcqError::Config(format!("{} table has {} chips at fs={}, tracking needs {} chips at fs={}",
				table.name, table.code_length_chips, table.fs, conf.code_length_chips, conf.fs_in)));
		}

		let code_period_s = conf.code_period_sec();
		let code_period_samples = conf.fs_in * code_period_s;

		// Epochs stretch or shrink with code Doppler, twice the nominal period is plenty
		let mut correlator = Multicorrelator::new();
		correlator.init(2 * (code_period_samples.ceil() as usize) + 2, 3).map_err(|e| AcqError::Config(e.to_string()))?;

		let carrier_filter = CarrierLoopFilter::new(conf.order, conf.fll_bw_hz, conf.pll_bw_hz);
		let code_filter = DllFilter::new(conf.dll_bw_hz, code_period_s);
		let prompt_buffer = VecDeque::with_capacity(conf.cn0_samples);
		let code_freq_chips = conf.code_rate_cps;

		Ok(Self{ conf, table, correlator, carrier_filter, code_filter, code_period_s, code_period_samples,
			state: TrackingState::Idle, synchro: GnssSynchro::default(), sample_counter: 0, samples_to_skip: 0,
			carrier_doppler_hz: 0.0, code_freq_chips, rem_code_phase_chips: 0.0, rem_carr_phase_rad: 0.0,
			last_prompt: None, prompt_buffer, cn0_db_hz: 0.0, carrier_lock_test: 0.0, lock_fail_counter: 0 })
	}

	/// Seeds the loops from an acquisition record.  `current_sample_counter` is the index of the next sample this
	/// block will see, which may be later than the acquisition's sample stamp.
	pub fn start_tracking(&mut self, acq:&GnssSynchro, current_sample_counter:u64) -> AcqResult<()> {
		if !acq.flag_valid_acquisition {
			return Err(AcqError::InvalidHandoff(acq.prn));
		}
		let chips = self.table.chips(acq.prn)?;
		let shift = self.conf.early_late_space_chips;
		self.correlator.set_local_code_and_taps(self.conf.code_length_chips, chips, &[-shift, 0.0, shift])
			.map_err(|e| AcqError::Config(e.to_string()))?;

		// Samples elapsed since the stamp, folded back into one code period
		let elapsed = current_sample_counter.saturating_sub(acq.acq_samplestamp_samples) as f64;
		let skip = (acq.acq_delay_samples - elapsed).rem_euclid(self.code_period_samples).round() as u64;

		self.sample_counter = current_sample_counter;
		self.samples_to_skip = skip;

		self.carrier_doppler_hz = acq.acq_doppler_hz;
		self.code_freq_chips = self.doppler_aided_code_rate(acq.acq_doppler_hz);
		self.rem_code_phase_chips = 0.0;
		self.rem_carr_phase_rad = 0.0;
		self.carrier_filter.initialize(acq.acq_doppler_hz);
		self.code_filter.initialize();

		self.last_prompt = None;
		self.prompt_buffer.clear();
		self.cn0_db_hz = 0.0;
		self.carrier_lock_test = 0.0;
		self.lock_fail_counter = 0;

		self.synchro = *acq;
		self.synchro.flag_valid_tracking = false;
		self.state = if skip == 0 { TrackingState::Tracking } else { TrackingState::PullIn };

		log::info!("Channel {} tracking PRN {} from {:.1} [Hz], skipping {} samples to the next code period",
			acq.channel_id, acq.prn, acq.acq_doppler_hz, skip);
		Ok(())
	}

	pub fn stop_tracking(&mut self) {
		if self.state == TrackingState::Tracking || self.state == TrackingState::PullIn {
			log::debug!("Channel {} stopped tracking PRN {}", self.synchro.channel_id, self.synchro.prn);
		}
		self.state = TrackingState::Idle;
		self.synchro.flag_valid_tracking = false;
	}

	pub fn set_sample_counter(&mut self, sample_counter:u64) { self.sample_counter = sample_counter; }

	pub fn state(&self) -> TrackingState { self.state }
	pub fn sample_counter(&self) -> u64 { self.sample_counter }
	pub fn carrier_doppler_hz(&self) -> f64 { self.carrier_doppler_hz }
	pub fn code_freq_chips(&self) -> f64 { self.code_freq_chips }
	pub fn code_phase_chips(&self) -> f64 { self.rem_code_phase_chips }
	pub fn lock_fail_counter(&self) -> usize { self.lock_fail_counter }
	pub fn cn0_db_hz(&self) -> f64 { self.cn0_db_hz }
	pub fn carrier_lock_test(&self) -> f64 { self.carrier_lock_test }
	pub fn synchro(&self) -> &GnssSynchro { &self.synchro }
	pub fn conf(&self) -> &TrackingConf { &self.conf }

	/// Number of samples the next code period will take at the current code frequency
	pub fn next_epoch_samples(&self) -> usize {
		let step = self.code_freq_chips / self.conf.fs_in;
		let n = ((self.conf.code_length_chips as f64 - self.rem_code_phase_chips) / step).round();
		(n.max(1.0) as usize).min(self.correlator.max_signal_length_samples())
	}

	fn doppler_aided_code_rate(&self, carrier_doppler_hz:f64) -> f64 {
		(1.0 + carrier_doppler_hz / self.conf.carrier_freq_hz) * self.conf.code_rate_cps
	}

	fn skip(&mut self, input:&[S]) -> Work<GnssSynchro> {
		let n = (self.samples_to_skip.min(input.len() as u64)) as usize;
		self.samples_to_skip -= n as u64;
		self.sample_counter += n as u64;
		if self.samples_to_skip == 0 {
			self.state = TrackingState::Tracking;
		}
		Work::consumed(n)
	}

	fn idle(&mut self, input:&[S]) -> Work<GnssSynchro> {
		self.sample_counter += input.len() as u64;
		Work::consumed(input.len())
	}

	fn epoch(&mut self, input:&[S]) -> Work<GnssSynchro> {
		let n = self.next_epoch_samples();
		if input.len() < n {
			return Work::idle();
		}

		let fs = self.conf.fs_in;
		let t = self.code_period_s;
		let phase_step_rad = 2.0 * consts::PI * self.carrier_doppler_hz / fs;
		let code_step_chips = self.code_freq_chips / fs;

		let taps = self.correlator.carrier_wipeoff_multicorrelator_resampler(&input[..n], self.rem_carr_phase_rad, phase_step_rad,
			self.rem_code_phase_chips, code_step_chips, n);
		let early  = taps[EARLY].to_c64();
		let prompt = taps[PROMPT].to_c64();
		let late   = taps[LATE].to_c64();

		// Carrier loop
		let e_pll = pll_two_quadrant_atan(prompt);
		let e_fll = match self.last_prompt {
			Some(p) => fll_four_quadrant_atan(p, prompt, t),
			None => 0.0,
		};
		self.last_prompt = Some(prompt);
		self.carrier_doppler_hz = self.carrier_filter.get_carrier_error(e_fll, e_pll, t);
		self.rem_carr_phase_rad = wrap_to_pi(self.rem_carr_phase_rad + (n as f64) * phase_step_rad);

		// Code loop
		let e_dll = dll_nc_e_minus_l_normalized(early, late, self.conf.early_late_space_chips);
		let code_nco_chips = self.code_filter.apply(e_dll);
		self.rem_code_phase_chips += (n as f64) * code_step_chips - self.conf.code_length_chips as f64;
		self.code_freq_chips = self.doppler_aided_code_rate(self.carrier_doppler_hz) - code_nco_chips;

		let epoch_start = self.sample_counter;
		self.sample_counter += n as u64;

		// Lock detectors
		self.prompt_buffer.push_back(prompt);
		while self.prompt_buffer.len() > self.conf.cn0_samples { self.prompt_buffer.pop_front(); }
		if self.prompt_buffer.len() == self.conf.cn0_samples {
			self.cn0_db_hz = cn0_svn_estimator(&self.prompt_buffer, t);
			self.carrier_lock_test = carrier_lock_detector(&self.prompt_buffer);
			if self.cn0_db_hz < self.conf.cn0_min_db_hz || self.carrier_lock_test < self.conf.carrier_lock_threshold {
				self.lock_fail_counter += 1;
			} else {
				self.lock_fail_counter = self.lock_fail_counter.saturating_sub(1);
			}
		}

		if self.lock_fail_counter > self.conf.max_lock_fail {
			log::warn!("Channel {} lost lock on PRN {} at sample {}: C/N0={:.1} [dB-Hz], carrier lock={:.2}",
				self.synchro.channel_id, self.synchro.prn, epoch_start, self.cn0_db_hz, self.carrier_lock_test);
			self.state = TrackingState::LostLock;
			self.synchro.flag_valid_tracking = false;
			return Work{ consumed: n, result: BlockResult::Err(DSPErr::LossOfLock) };
		}

		self.synchro.code_phase_samples = self.rem_code_phase_chips * fs / self.code_freq_chips;
		self.synchro.carrier_phase_rad = self.rem_carr_phase_rad;
		self.synchro.carrier_doppler_hz = self.carrier_doppler_hz;
		self.synchro.cn0_db_hz = self.cn0_db_hz;
		self.synchro.prompt_i = prompt.re;
		self.synchro.prompt_q = prompt.im;
		self.synchro.tracking_sample_counter = self.sample_counter;
		self.synchro.flag_valid_tracking = true;

		log::trace!("PRN {} sample {}: {:.2} [Hz], {:.4} [chips/s], E/P/L={:.1}/{:.1}/{:.1}", self.synchro.prn, epoch_start,
			self.carrier_doppler_hz, self.code_freq_chips, early.norm(), prompt.norm(), late.norm());

		Work{ consumed: n, result: BlockResult::Ready(self.synchro) }
	}

}

impl<S: IqSample> BlockFunctionality<TrackCommand, (), S, GnssSynchro> for Tracking<S> {

	fn control(&mut self, command:&TrackCommand) -> Result<(), &'static str> {
		match command {
			TrackCommand::Start(acq) => {
				let current = self.sample_counter;
				self.start_tracking(acq, current).map_err(|e| {
					log::error!("Unable to start tracking: {}", e);
					"Unable to start tracking"
				})
			},
			TrackCommand::Stop => {
				self.stop_tracking();
				Ok(())
			},
		}
	}

	fn forecast(&self, _noutput_items:usize) -> usize {
		match self.state {
			TrackingState::Tracking => self.next_epoch_samples(),
			_ => 1,
		}
	}

	fn general_work(&mut self, input:&[S], _noutput_items:usize) -> Work<GnssSynchro> {
		match self.state {
			TrackingState::Idle | TrackingState::LostLock => self.idle(input),
			TrackingState::PullIn => self.skip(input),
			TrackingState::Tracking => self.epoch(input),
		}
	}

}
