
use std::fs::File;
use std::io::BufWriter;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use rustfft::num_complex::Complex;

use crate::{DigSigProcErr as DSPErr};
use crate::block::{BlockFunctionality, BlockResult, Work};
use crate::config::{AcqConf, SearchGeometry};
use crate::error::{AcqError, AcqResult};
use crate::gnss::common::code_table::ReferenceCodeTable;
use crate::gnss::common::synchro::{AcqEvent, AcqOutcome, AcquisitionListener, GnssSynchro};
use crate::gnss::gps_l1_ca::signal_modulation::GpsL1Ca;
use crate::io::{write_acq_dump, AcqDump};
use crate::types::IqSample;

use super::{AcqCommand, AcqState, DopplerGrid, GridPeak, PcpsCorrelator, caf_test_statistic};

/// PCPS acquisition with multi-dwell noncoherent accumulation and a second, finer Doppler search around the
/// coarse peak.  Each dwell consumes two code periods; the first code period's worth of lags is searched.
pub struct FineDopplerPcps<S: IqSample> {
	conf: AcqConf,
	geometry: SearchGeometry,
	table: Arc<ReferenceCodeTable>,
	correlator: PcpsCorrelator,
	grid: DopplerGrid,
	fine_grid: DopplerGrid,
	dwell_samples: Vec<Vec<Complex<f64>>>,
	listener: Option<Weak<dyn AcquisitionListener>>,
	geometry_stale: bool,

	state: AcqState,
	active: bool,
	threshold: f64,
	dwell_count: usize,
	sample_counter: u64,
	dwell_samplestamp: u64,
	input_power: f64,
	test_statistic: f64,
	mag: f64,
	coarse_peak: GridPeak,
	synchro: GnssSynchro,
	dump_count: usize,
	_sample: PhantomData<S>,
}

impl<S: IqSample> FineDopplerPcps<S> {

	/// Searches for GPS L1 C/A using the process-wide code table for the configured sample rate
	pub fn new(conf:AcqConf) -> AcqResult<Self> {
		let table = ReferenceCodeTable::shared(&GpsL1Ca, conf.fs_in)?;
		Self::with_code_table(conf, table)
	}

	pub fn with_code_table(conf:AcqConf, table:Arc<ReferenceCodeTable>) -> AcqResult<Self> {
		let geometry = conf.geometry()?;
		if table.code_length != geometry.code_length || table.fft_size != geometry.fft_size {
			return Err(AcqError::Config(format!("{} table has code_length={} fft_size={}, configuration needs code_length={} fft_size={}",
				table.name, table.code_length, table.fft_size, geometry.code_length, geometry.fft_size)));
		}
		table.fft_code(conf.prn)?;

		if conf.in_streams > 1 {
			log::error!("Acquisition channel {} only supports one input stream, {} configured", conf.channel, conf.in_streams);
		}
		if conf.out_streams > 0 {
			log::error!("Acquisition channel {} does not produce an output stream, {} configured", conf.channel, conf.out_streams);
		}

		let correlator = PcpsCorrelator::new(conf.fs_in, geometry.code_length, geometry.fft_size);
		let grid       = DopplerGrid::new(geometry.num_doppler_bins, geometry.code_length);
		let fine_grid  = DopplerGrid::new(geometry.num_doppler_bins_step2, geometry.code_length);
		let dwell_samples = (0..geometry.max_dwells).map(|_| Vec::with_capacity(2 * geometry.code_length)).collect();
		let synchro = GnssSynchro::new(conf.prn, conf.channel);
		let threshold = conf.threshold;

		log::debug!("Acquisition channel {}: PRN {}, {} Doppler bins of {} [Hz], code_length={}, fft_size={}",
			conf.channel, conf.prn, geometry.num_doppler_bins, geometry.doppler_step, geometry.code_length, geometry.fft_size);

		Ok(Self{ conf, geometry, table, correlator, grid, fine_grid, dwell_samples, listener: None, geometry_stale: false,
			state: AcqState::Standby, active: false, threshold, dwell_count: 0, sample_counter: 0, dwell_samplestamp: 0,
			input_power: 0.0, test_statistic: 0.0, mag: 0.0, coarse_peak: GridPeak{ doppler_idx: 0, code_phase: 0, power: 0.0 },
			synchro, dump_count: 0, _sample: PhantomData })
	}

	// Lifecycle controls

	/// Returns to standby and forgets any previous result and sample count
	pub fn init(&mut self) {
		self.stop_acquisition();
		self.sample_counter = 0;
		self.mag = 0.0;
		self.input_power = 0.0;
		self.test_statistic = 0.0;
		self.synchro = GnssSynchro::new(self.conf.prn, self.conf.channel);
	}

	/// Starts a new attempt at the next block boundary
	pub fn reset(&mut self) {
		if self.geometry_stale { self.rebuild_geometry(); }
		self.active = true;
		self.state = AcqState::Loading;
	}

	pub fn set_active(&mut self, active:bool) {
		if active { self.reset(); }
		else      { self.stop_acquisition(); }
	}

	/// 0 for standby, 1 to start an attempt
	pub fn set_state(&mut self, state:i32) {
		match state {
			0 => self.stop_acquisition(),
			1 => self.reset(),
			_ => log::warn!("Acquisition channel {}: ignoring unknown state {}", self.conf.channel, state),
		}
	}

	/// Abandons any dwell in progress; accumulated results are discarded at the next attempt
	pub fn stop_acquisition(&mut self) {
		self.active = false;
		self.state = AcqState::Standby;
		self.dwell_count = 0;
	}

	pub fn set_threshold(&mut self, threshold:f64) { self.threshold = threshold; }

	pub fn set_doppler_center(&mut self, doppler_center_hz:i32) { self.conf.doppler_center = doppler_center_hz; }

	/// Half-width of the coarse search, applied at the next `reset`
	pub fn set_doppler_max(&mut self, doppler_max_hz:u32) {
		self.conf.doppler_max = doppler_max_hz;
		self.geometry_stale = true;
	}

	/// Coarse bin width, applied at the next `reset`
	pub fn set_doppler_step(&mut self, doppler_step_hz:u32) {
		self.conf.doppler_step = doppler_step_hz;
		self.geometry_stale = true;
	}

	fn rebuild_geometry(&mut self) {
		self.geometry_stale = false;
		match self.conf.geometry() {
			Ok(geometry) => {
				self.grid = DopplerGrid::new(geometry.num_doppler_bins, geometry.code_length);
				log::debug!("Acquisition channel {}: now {} Doppler bins of {} [Hz]", self.conf.channel, geometry.num_doppler_bins, geometry.doppler_step);
				self.geometry = geometry;
			},
			Err(e) => log::warn!("Acquisition channel {}: keeping the previous search grid, {}", self.conf.channel, e),
		}
	}

	/// Selects the satellite for the next attempt
	pub fn set_satellite(&mut self, prn:u32) -> AcqResult<()> {
		self.table.fft_code(prn)?;
		self.conf.prn = prn;
		self.synchro = GnssSynchro::new(prn, self.conf.channel);
		Ok(())
	}

	pub fn set_listener(&mut self, listener:Weak<dyn AcquisitionListener>) { self.listener = Some(listener); }

	/// Aligns the engine's sample count with the owner's when the engine hasn't seen every sample
	pub fn set_sample_counter(&mut self, sample_counter:u64) { self.sample_counter = sample_counter; }

	// Reporting

	pub fn state(&self) -> AcqState { self.state }
	pub fn is_active(&self) -> bool { self.active }
	pub fn prn(&self) -> u32 { self.conf.prn }
	pub fn threshold(&self) -> f64 { self.threshold }
	pub fn dwell_count(&self) -> usize { self.dwell_count }
	pub fn sample_counter(&self) -> u64 { self.sample_counter }
	pub fn geometry(&self) -> &SearchGeometry { &self.geometry }
	pub fn grid(&self) -> &DopplerGrid { &self.grid }

	/// Largest accumulated correlation power of the current or last attempt
	pub fn mag(&self) -> f64 { self.mag }
	pub fn test_statistic(&self) -> f64 { self.test_statistic }
	/// Mean power per sample of the last dwell
	pub fn input_power(&self) -> f64 { self.input_power }

	/// Samples consumed by one dwell
	pub fn dwell_length(&self) -> usize { 2 * self.geometry.code_length }

	/// The record of the last positive acquisition, if the engine is still holding it
	pub fn synchro(&self) -> Option<GnssSynchro> {
		if self.state == AcqState::Positive { self.synchro.acquisition().copied() } else { None }
	}

	pub fn doppler_bins_hz(&self) -> Vec<f64> {
		(0..self.geometry.num_doppler_bins).map(|idx| self.coarse_doppler_hz(idx)).collect()
	}

	fn coarse_doppler_hz(&self, idx:usize) -> f64 {
		self.geometry.coarse_doppler_hz(idx, self.conf.doppler_center)
	}

	// Processing

	fn begin_attempt(&mut self) {
		self.grid.clear();
		self.fine_grid.clear();
		self.dwell_count = 0;
		self.mag = 0.0;
		self.test_statistic = 0.0;
		self.synchro = GnssSynchro::new(self.conf.prn, self.conf.channel);
		self.state = AcqState::Searching;
	}

	fn search_dwell(&mut self, input:&[S]) -> Work<AcqEvent> {
		let dwell_len = self.dwell_length();
		if input.len() < dwell_len { return Work::idle(); }

		let table = self.table.clone();
		let fft_code = match table.fft_code(self.conf.prn) {
			Ok(c) => c,
			Err(e) => {
				log::error!("Acquisition channel {}: {}", self.conf.channel, e);
				return Work{ consumed: 0, result: BlockResult::Err(DSPErr::Other("No reference code for satellite")) };
			}
		};

		let slot = self.dwell_count;
		self.dwell_samples[slot].clear();
		self.dwell_samples[slot].extend(input[..dwell_len].iter().map(|s| s.to_c64()));
		self.dwell_samplestamp = self.sample_counter;
		self.input_power = self.dwell_samples[slot].iter().map(|c| c.norm_sqr()).sum::<f64>() / (dwell_len as f64);

		for doppler_idx in 0..self.geometry.num_doppler_bins {
			let doppler_hz = self.coarse_doppler_hz(doppler_idx);
			self.correlator.accumulate(&self.dwell_samples[slot], doppler_hz, fft_code, self.grid.row_mut(doppler_idx));
		}

		self.dwell_count += 1;
		self.sample_counter += dwell_len as u64;

		let peak = self.grid.peak();
		self.coarse_peak = peak;
		self.mag = peak.power;
		self.test_statistic = caf_test_statistic(self.grid.row(peak.doppler_idx), peak.code_phase,
			self.geometry.excludelimit, self.conf.test_statistic);

		log::debug!("Acquisition channel {} PRN {} dwell {}/{}: peak at {} [Hz], {} [samples], test statistic {:.3}, input power {:.3e}",
			self.conf.channel, self.conf.prn, self.dwell_count, self.geometry.max_dwells, self.coarse_doppler_hz(peak.doppler_idx),
			peak.code_phase, self.test_statistic, self.input_power);

		if self.test_statistic >= self.threshold {
			if self.conf.make_two_steps {
				self.state = AcqState::Refining;
				Work::consumed(dwell_len)
			} else {
				let doppler_hz = self.coarse_doppler_hz(peak.doppler_idx);
				Work{ consumed: dwell_len, result: BlockResult::Ready(self.finish_positive(doppler_hz, peak.code_phase)) }
			}
		} else if self.dwell_count >= self.geometry.max_dwells {
			Work{ consumed: dwell_len, result: BlockResult::Ready(self.finish_negative()) }
		} else {
			Work::consumed(dwell_len)
		}
	}

	/// Searches the fine Doppler bins around the coarse peak using every dwell of this attempt
	fn refine(&mut self) -> Work<AcqEvent> {
		let coarse_hz = self.coarse_doppler_hz(self.coarse_peak.doppler_idx);
		let table = self.table.clone();
		let fft_code = match table.fft_code(self.conf.prn) {
			Ok(c) => c,
			Err(_) => return Work{ consumed: 0, result: BlockResult::Err(DSPErr::Other("No reference code for satellite")) },
		};

		self.fine_grid.clear();
		for dwell in 0..self.dwell_count {
			for fine_idx in 0..self.geometry.num_doppler_bins_step2 {
				let doppler_hz = self.geometry.fine_doppler_hz(fine_idx, coarse_hz);
				self.correlator.accumulate(&self.dwell_samples[dwell], doppler_hz, fft_code, self.fine_grid.row_mut(fine_idx));
			}
		}

		let fine_peak = self.fine_grid.peak();
		let (doppler_hz, code_phase) = if fine_peak.power > 0.0 {
			(self.geometry.fine_doppler_hz(fine_peak.doppler_idx, coarse_hz), fine_peak.code_phase)
		} else {
			(coarse_hz, self.coarse_peak.code_phase)
		};

		log::debug!("Acquisition channel {} PRN {}: refined {} [Hz] to {} [Hz]", self.conf.channel, self.conf.prn, coarse_hz, doppler_hz);

		Work{ consumed: 0, result: BlockResult::Ready(self.finish_positive(doppler_hz, code_phase)) }
	}

	fn finish_positive(&mut self, doppler_hz:f64, code_phase:usize) -> AcqEvent {
		let mut synchro = GnssSynchro::new(self.conf.prn, self.conf.channel);
		synchro.acq_delay_samples       = code_phase as f64;
		synchro.acq_doppler_hz          = doppler_hz;
		synchro.acq_samplestamp_samples = self.dwell_samplestamp;
		synchro.acq_test_statistic      = self.test_statistic;
		synchro.flag_valid_acquisition  = true;

		log::info!("Acquisition channel {}: PRN {} positive, {} [Hz], {} [samples], test statistic {:.2} after {} dwell(s)",
			self.conf.channel, self.conf.prn, doppler_hz, code_phase, self.test_statistic, self.dwell_count);

		self.finish(AcqState::Positive, AcqOutcome::Positive, synchro)
	}

	fn finish_negative(&mut self) -> AcqEvent {
		let mut synchro = GnssSynchro::new(self.conf.prn, self.conf.channel);
		synchro.acq_test_statistic = self.test_statistic;
		synchro.acq_samplestamp_samples = self.dwell_samplestamp;

		let outcome = if self.conf.repeat_satellite { AcqOutcome::NegativeRepeat } else { AcqOutcome::NegativeNoRepeat };
		log::debug!("Acquisition channel {}: PRN {} negative, test statistic {:.2} after {} dwell(s)",
			self.conf.channel, self.conf.prn, self.test_statistic, self.dwell_count);

		self.finish(AcqState::Negative, outcome, synchro)
	}

	fn finish(&mut self, state:AcqState, outcome:AcqOutcome, synchro:GnssSynchro) -> AcqEvent {
		// The record is published in one piece, then the listener is told
		self.synchro = synchro;
		self.state = state;

		if self.conf.dump { self.dump(outcome.is_positive()); }

		match self.listener.as_ref().and_then(|w| w.upgrade()) {
			Some(listener) => listener.on_acquisition(outcome, &self.synchro),
			None => if self.listener.is_some() {
				log::debug!("Acquisition channel {}: listener is gone, result not delivered", self.conf.channel);
			},
		}

		AcqEvent{ outcome, synchro: self.synchro }
	}

	fn dump(&mut self, positive:bool) {
		let path = format!("{}_ch{}_{}.dat", self.conf.dump_filename, self.conf.channel, self.dump_count);
		self.dump_count += 1;

		let dump = AcqDump {
			prn: self.conf.prn,
			channel: self.conf.channel as u32,
			positive,
			num_dwells: self.dwell_count as u32,
			samplestamp: self.synchro.acq_samplestamp_samples,
			test_statistic: self.test_statistic,
			threshold: self.threshold,
			doppler_hz: self.synchro.acq_doppler_hz,
			code_phase_samples: self.synchro.acq_delay_samples,
			doppler_bins_hz: self.doppler_bins_hz(),
			code_length: self.geometry.code_length,
			grid: self.grid.as_slice().iter().map(|p| *p as f32).collect(),
		};

		let result = File::create(&path).and_then(|f| write_acq_dump(&mut BufWriter::new(f), &dump));
		match result {
			Ok(()) => log::debug!("Wrote acquisition grid to {}", path),
			Err(e) => log::warn!("Unable to write acquisition grid to {}: {}", path, e),
		}
	}

}

impl<S: IqSample> BlockFunctionality<AcqCommand, (), S, AcqEvent> for FineDopplerPcps<S> {

	fn control(&mut self, command:&AcqCommand) -> Result<(), &'static str> {
		match *command {
			AcqCommand::Reset                  => self.reset(),
			AcqCommand::SetActive(active)      => self.set_active(active),
			AcqCommand::SetState(state)        => self.set_state(state),
			AcqCommand::SetThreshold(t)        => self.set_threshold(t),
			AcqCommand::SetDopplerCenter(hz)   => self.set_doppler_center(hz),
			AcqCommand::SetDopplerMax(hz)      => self.set_doppler_max(hz),
			AcqCommand::SetDopplerStep(hz)     => self.set_doppler_step(hz),
			AcqCommand::Stop                   => self.stop_acquisition(),
		}
		Ok(())
	}

	fn forecast(&self, _noutput_items:usize) -> usize {
		match self.state {
			AcqState::Refining => 0,
			_ => self.dwell_length(),
		}
	}

	fn general_work(&mut self, input:&[S], _noutput_items:usize) -> Work<AcqEvent> {
		if !self.active {
			return self.standby(input);
		}

		match self.state {
			AcqState::Standby | AcqState::Positive | AcqState::Negative => self.standby(input),
			AcqState::Loading => {
				self.begin_attempt();
				self.search_dwell(input)
			},
			AcqState::Searching => self.search_dwell(input),
			AcqState::Refining  => self.refine(),
		}
	}

}

impl<S: IqSample> FineDopplerPcps<S> {

	fn standby(&mut self, input:&[S]) -> Work<AcqEvent> {
		if self.conf.blocking_on_standby {
			Work::idle()
		} else {
			self.sample_counter += input.len() as u64;
			Work::consumed(input.len())
		}
	}

}
