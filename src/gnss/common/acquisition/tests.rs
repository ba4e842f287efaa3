
use std::f64::consts;
use std::sync::{Arc, Mutex, Weak};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rustfft::num_complex::Complex;

use crate::block::{BlockFunctionality, BlockResult};
use crate::config::{AcqConf, TestStatistic};
use crate::gnss::common::code_table::ReferenceCodeTable;
use crate::gnss::common::synchro::{AcqOutcome, AcquisitionListener, GnssSynchro};
use crate::gnss::gps_l1_ca::signal_modulation::GpsL1Ca;
use crate::io::read_acq_dump;

use super::*;
use super::fine_doppler_pcps::FineDopplerPcps;

const FS:f64 = 2048000.0;
const L:usize = 2048;

// One PRN delayed by `delay` samples with a carrier at `doppler_hz`, plus white noise of `sigma` per component
fn synthetic(prn:u32, num_samples:usize, delay:usize, doppler_hz:f64, sigma:f64, seed:u64) -> Vec<Complex<f64>> {
	let table = ReferenceCodeTable::shared(&GpsL1Ca, FS).unwrap();
	let code = table.sampled_code(prn).unwrap();
	let mut rng = StdRng::seed_from_u64(seed);
	let noise = Normal::new(0.0, sigma).unwrap();

	(0..num_samples).map(|i| {
		let chip = code[(i + L - (delay % L)) % L];
		let phase = 2.0 * consts::PI * doppler_hz * (i as f64) / FS;
		let n = if sigma > 0.0 { Complex{ re: noise.sample(&mut rng), im: noise.sample(&mut rng) } } else { Complex{ re: 0.0, im: 0.0 } };
		chip * Complex{ re: phase.cos(), im: phase.sin() } + n
	}).collect()
}

fn noise_only(num_samples:usize, sigma:f64, seed:u64) -> Vec<Complex<f64>> {
	let mut rng = StdRng::seed_from_u64(seed);
	let noise = Normal::new(0.0, sigma).unwrap();
	(0..num_samples).map(|_| Complex{ re: noise.sample(&mut rng), im: noise.sample(&mut rng) }).collect()
}

#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<(AcqOutcome, GnssSynchro)>>,
}

impl AcquisitionListener for Recorder {
	fn on_acquisition(&self, outcome:AcqOutcome, synchro:&GnssSynchro) {
		self.events.lock().unwrap().push((outcome, *synchro));
	}
}

fn engine(conf:AcqConf) -> FineDopplerPcps<Complex<f64>> { FineDopplerPcps::new(conf).unwrap() }

// Feeds the whole input the way a scheduler would, returning the first completion event
fn run(acq:&mut FineDopplerPcps<Complex<f64>>, input:&[Complex<f64>]) -> (usize, Option<crate::gnss::common::synchro::AcqEvent>) {
	let mut idx = 0;
	loop {
		let need = acq.forecast(1);
		if input.len() - idx < need { return (idx, None); }
		let work = acq.general_work(&input[idx..], 1);
		idx += work.consumed;
		match work.result {
			BlockResult::Ready(ev) => return (idx, Some(ev)),
			BlockResult::Err(e) => panic!("Acquisition failed: {:?}", e),
			BlockResult::NotReady => if work.consumed == 0 { return (idx, None); },
		}
	}
}

#[test]
fn exclusion_zone_wraps_around_the_code() {
	assert!(in_exclusion_zone(2046, 1, 3, 2048));
	assert!(in_exclusion_zone(4, 1, 3, 2048));
	assert!(!in_exclusion_zone(5, 1, 3, 2048));
	assert!(!in_exclusion_zone(2044, 1, 3, 2048));
}

#[test]
fn caf_statistic_excludes_the_peak_neighborhood() {
	let mut row = vec![1.0; 100];
	row[0]  = 50.0;
	row[99] = 40.0;		// Within the exclusion window across the wrap
	row[2]  = 30.0;
	row[60] = 5.0;

	// 7 cells are excluded, leaving 92 ones and the 5.0
	let mean_outside = 97.0 / 93.0;
	let s = caf_test_statistic(&row, 0, 3, TestStatistic::PeakToMean);
	assert!((s - 50.0 / mean_outside).abs() < 1e-9);

	let s = caf_test_statistic(&row, 0, 3, TestStatistic::PeakToSecondPeak);
	assert!((s - 10.0).abs() < 1e-12);
}

#[test]
fn zero_power_gives_zero_statistic() {
	let row = vec![0.0; 64];
	assert_eq!(caf_test_statistic(&row, 10, 2, TestStatistic::PeakToMean), 0.0);
	assert_eq!(caf_test_statistic(&row, 10, 2, TestStatistic::PeakToSecondPeak), 0.0);
	// Everything excluded
	assert_eq!(caf_test_statistic(&[3.0, 1.0, 1.0], 0, 2, TestStatistic::PeakToMean), 0.0);
}

#[test]
fn grid_peak_and_rows() {
	let mut grid = DopplerGrid::new(3, 4);
	grid.row_mut(1)[2] = 7.0;
	grid.row_mut(2)[3] = 7.0;
	grid.row_mut(0)[0] = 1.0;
	assert_eq!(grid.peak(), GridPeak{ doppler_idx: 1, code_phase: 2, power: 7.0 });
	assert_eq!(grid.row(2), &[0.0, 0.0, 0.0, 7.0]);
	grid.clear();
	assert_eq!(grid.peak().power, 0.0);
}

#[test]
fn correlator_peaks_at_the_code_delay() {
	let table = ReferenceCodeTable::shared(&GpsL1Ca, FS).unwrap();
	let mut corr = PcpsCorrelator::new(FS, table.code_length, table.fft_size);
	let signal = synthetic(4, 2*L, 777, 0.0, 0.0, 1);

	let mut row = vec![0.0; L];
	corr.accumulate(&signal, 0.0, table.fft_code(4).unwrap(), &mut row);
	let (best, _) = row.iter().enumerate().fold((0, 0.0), |(bi, bp), (i, p)| if *p > bp { (i, *p) } else { (bi, bp) });
	assert_eq!(best, 777);

	// Accumulating twice doubles the power
	let first = row[777];
	corr.accumulate(&signal, 0.0, table.fft_code(4).unwrap(), &mut row);
	assert!((row[777] - 2.0 * first).abs() < 1e-6 * first);
}

#[test]
fn standby_blocks_or_counts() {
	let input = noise_only(3*L, 1.0, 2);

	let mut acq = engine(AcqConf::default());
	assert_eq!(acq.state(), AcqState::Standby);
	let w = acq.general_work(&input, 1);
	assert_eq!(w.consumed, 0);
	assert_eq!(acq.sample_counter(), 0);

	let mut acq = engine(AcqConf{ blocking_on_standby: false, ..Default::default() });
	let w = acq.general_work(&input, 1);
	assert_eq!(w.consumed, 3*L);
	assert_eq!(acq.sample_counter(), 3*L as u64);
}

#[test]
fn detects_and_refines() {
	let conf = AcqConf{ prn: 7, channel: 2, ..Default::default() };
	let mut acq = engine(conf);
	let rec = Arc::new(Recorder::default());
	acq.set_listener(Arc::downgrade(&rec) as Weak<dyn AcquisitionListener>);

	// Leading samples outside the attempt are counted by the owner
	acq.set_sample_counter(1000);
	acq.reset();
	assert_eq!(acq.state(), AcqState::Loading);

	let input = synthetic(7, 8*L, 1500, 1190.0, 0.1, 3);

	// One dwell is enough at this SNR, after which the fine search needs no new input
	let w = acq.general_work(&input, 1);
	assert_eq!(w.consumed, 2*L);
	assert!(!w.result.is_ready());
	assert_eq!(acq.state(), AcqState::Refining);
	assert_eq!(acq.forecast(1), 0);
	assert!(acq.test_statistic() >= 20.0);

	let w = acq.general_work(&input[2*L..2*L], 1);
	assert_eq!(w.consumed, 0);
	let ev = w.result.unwrap();
	assert_eq!(ev.outcome, AcqOutcome::Positive);
	assert_eq!(acq.state(), AcqState::Positive);

	let s = ev.synchro;
	assert_eq!(s.prn, 7);
	assert_eq!(s.channel_id, 2);
	assert!(s.flag_valid_acquisition);
	assert_eq!(s.acq_delay_samples, 1500.0);
	assert_eq!(s.acq_doppler_hz, 1187.5);
	assert_eq!(s.acq_samplestamp_samples, 1000);
	assert_eq!(acq.synchro(), Some(s));

	let events = rec.events.lock().unwrap();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0], (AcqOutcome::Positive, s));
}

#[test]
fn single_step_reports_the_coarse_bin() {
	let conf = AcqConf{ prn: 7, make_two_steps: false, ..Default::default() };
	let mut acq = engine(conf);
	acq.reset();

	let input = synthetic(7, 4*L, 100, 1190.0, 0.1, 4);
	let (consumed, ev) = run(&mut acq, &input);
	let ev = ev.unwrap();
	assert_eq!(consumed, 2*L);
	assert_eq!(ev.synchro.acq_doppler_hz, 1000.0);
	assert_eq!(ev.synchro.acq_delay_samples, 100.0);
}

#[test]
fn weak_signal_is_found() {
	// Per-sample SNR of -9 [dB]; the code phase and Doppler are found to within a sample and half a bin
	let conf = AcqConf{ prn: 21, make_two_steps: false, ..Default::default() };
	let mut acq = engine(conf);
	acq.reset();

	let input = synthetic(21, 8*L, 333, -2400.0, 2.0, 5);
	let (_, ev) = run(&mut acq, &input);
	let s = ev.unwrap().synchro;
	assert!(s.flag_valid_acquisition);
	assert!((s.acq_delay_samples - 333.0).abs() <= 1.0);
	assert!((s.acq_doppler_hz - (-2400.0)).abs() <= 250.0);
}

#[test]
fn noise_is_rejected_after_max_dwells() {
	for seed in 0..3 {
		let conf = AcqConf{ prn: 3, ..Default::default() };
		let mut acq = engine(conf);
		let rec = Arc::new(Recorder::default());
		acq.set_listener(Arc::downgrade(&rec) as Weak<dyn AcquisitionListener>);
		acq.reset();

		let input = noise_only(10*L, 1.0, 100 + seed);
		let (consumed, ev) = run(&mut acq, &input);
		let ev = ev.unwrap();
		assert_eq!(consumed, 4 * 2*L);
		assert_eq!(ev.outcome, AcqOutcome::NegativeNoRepeat);
		assert!(!ev.synchro.flag_valid_acquisition);
		assert!(acq.test_statistic() < 20.0);
		assert_eq!(acq.state(), AcqState::Negative);
		assert_eq!(acq.synchro(), None);
		assert_eq!(acq.dwell_count(), 4);
		assert_eq!(rec.events.lock().unwrap().len(), 1);

		// Negative results stay put until the next reset
		assert_eq!(acq.general_work(&input[8*L..], 1).consumed, 0);
	}

	let mut acq = engine(AcqConf{ repeat_satellite: true, ..Default::default() });
	acq.reset();
	let (_, ev) = run(&mut acq, &noise_only(8*L, 1.0, 9));
	assert_eq!(ev.unwrap().outcome, AcqOutcome::NegativeRepeat);
}

#[test]
fn dropped_listener_is_skipped() {
	let mut acq = engine(AcqConf{ prn: 7, ..Default::default() });
	{
		let rec = Arc::new(Recorder::default());
		acq.set_listener(Arc::downgrade(&rec) as Weak<dyn AcquisitionListener>);
	}
	acq.reset();
	let (_, ev) = run(&mut acq, &synthetic(7, 4*L, 10, 0.0, 0.1, 6));
	assert!(ev.unwrap().outcome.is_positive());
}

#[test]
fn stop_discards_the_attempt() {
	let mut acq = engine(AcqConf{ prn: 7, ..Default::default() });
	let noise = noise_only(4*L, 1.0, 7);
	acq.reset();
	assert_eq!(acq.general_work(&noise, 1).consumed, 2*L);
	assert_eq!(acq.dwell_count(), 1);

	acq.control(&AcqCommand::Stop).unwrap();
	assert_eq!(acq.state(), AcqState::Standby);
	assert!(!acq.is_active());
	assert_eq!(acq.general_work(&noise, 1).consumed, 0);

	// A new attempt starts from a clean grid
	acq.control(&AcqCommand::SetState(1)).unwrap();
	assert_eq!(acq.state(), AcqState::Loading);
	let signal = synthetic(7, 2*L, 42, 500.0, 0.1, 8);
	let w = acq.general_work(&signal, 1);
	assert_eq!(w.consumed, 2*L);
	assert_eq!(acq.dwell_count(), 1);
	assert_eq!(acq.state(), AcqState::Refining);

	acq.control(&AcqCommand::SetActive(false)).unwrap();
	assert_eq!(acq.state(), AcqState::Standby);
	acq.control(&AcqCommand::SetState(5)).unwrap();
	assert_eq!(acq.state(), AcqState::Standby);
}

#[test]
fn threshold_and_center_are_adjustable() {
	let mut acq = engine(AcqConf{ prn: 7, make_two_steps: false, ..Default::default() });
	acq.control(&AcqCommand::SetThreshold(1.0e9)).unwrap();
	acq.control(&AcqCommand::SetDopplerCenter(250)).unwrap();
	assert_eq!(acq.threshold(), 1.0e9);
	assert_eq!(acq.doppler_bins_hz()[0], -4750.0);
	assert_eq!(acq.doppler_bins_hz()[20], 5250.0);

	acq.control(&AcqCommand::Reset).unwrap();
	let (consumed, ev) = run(&mut acq, &synthetic(7, 8*L, 42, 750.0, 0.1, 10));
	assert_eq!(consumed, 8*L);
	assert_eq!(ev.unwrap().outcome, AcqOutcome::NegativeNoRepeat);
	assert!(acq.mag() > 0.0);
}

#[test]
fn integer_samples_are_accepted() {
	let mut acq:FineDopplerPcps<Complex<i16>> = FineDopplerPcps::new(AcqConf{ prn: 30, ..Default::default() }).unwrap();
	acq.reset();
	let input:Vec<Complex<i16>> = synthetic(30, 4*L, 2000, -4000.0, 0.5, 11).into_iter()
		.map(|c| Complex{ re: (c.re * 1000.0).round() as i16, im: (c.im * 1000.0).round() as i16 }).collect();

	let w = acq.general_work(&input, 1);
	assert_eq!(acq.state(), AcqState::Refining);
	assert!(acq.input_power() > 1.0e6);
	let ev = acq.general_work(&input[w.consumed..], 1).result.unwrap();
	assert_eq!(ev.synchro.acq_delay_samples, 2000.0);
	assert!((ev.synchro.acq_doppler_hz - (-4000.0)).abs() <= 62.5);
}

#[test]
fn grid_is_dumped() {
	let base = std::env::temp_dir().join(format!("gnss_channel_acq_dump_{}", std::process::id()));
	let base = base.to_str().unwrap().to_string();
	let mut acq = engine(AcqConf{ prn: 7, channel: 5, dump: true, dump_filename: base.clone(), ..Default::default() });
	acq.reset();
	let (_, ev) = run(&mut acq, &synthetic(7, 4*L, 64, 0.0, 0.1, 12));
	let ev = ev.unwrap();

	let path = format!("{}_ch5_0.dat", base);
	let dump = read_acq_dump(&mut std::fs::File::open(&path).unwrap()).unwrap();
	assert!(dump.positive);
	assert_eq!(dump.prn, 7);
	assert_eq!(dump.channel, 5);
	assert_eq!(dump.doppler_bins_hz.len(), 21);
	assert_eq!(dump.grid.len(), 21 * L);
	assert_eq!(dump.doppler_hz, ev.synchro.acq_doppler_hz);
	assert_eq!(dump.code_phase_samples, 64.0);
	let _ = std::fs::remove_file(&path);
}

#[test]
fn bad_configuration_is_fatal() {
	assert!(FineDopplerPcps::<Complex<f64>>::new(AcqConf{ prn: 40, ..Default::default() }).is_err());
	assert!(FineDopplerPcps::<Complex<f64>>::new(AcqConf{ fs_in: 10.0, ..Default::default() }).is_err());

	let table = ReferenceCodeTable::shared(&GpsL1Ca, 4096000.0).unwrap();
	assert!(FineDopplerPcps::<Complex<f64>>::with_code_table(AcqConf::default(), table).is_err());

	// Stream shape problems are only logged
	assert!(FineDopplerPcps::<Complex<f64>>::new(AcqConf{ in_streams: 2, out_streams: 1, ..Default::default() }).is_ok());

	let mut acq = engine(AcqConf::default());
	assert!(acq.set_satellite(0).is_err());
	acq.set_satellite(32).unwrap();
	assert_eq!(acq.prn(), 32);
}

#[test]
fn dwells_accumulate_noncoherently() {
	let input = synthetic(7, 4*L, 900, -1700.0, 1.0, 40);

	let mut acq = engine(AcqConf{ prn: 7, threshold: 1.0e9, ..Default::default() });
	acq.reset();
	assert_eq!(acq.general_work(&input[..2*L], 1).consumed, 2*L);
	let first:Vec<f64> = acq.grid().as_slice().to_vec();
	assert_eq!(acq.general_work(&input[2*L..], 1).consumed, 2*L);
	assert_eq!(acq.dwell_count(), 2);
	assert_eq!(acq.state(), AcqState::Searching);

	let mut alone = engine(AcqConf{ prn: 7, threshold: 1.0e9, ..Default::default() });
	alone.reset();
	alone.general_work(&input[2*L..], 1);
	let second = alone.grid().as_slice();

	for ((both, a), b) in acq.grid().as_slice().iter().zip(first.iter()).zip(second.iter()) {
		assert!((both - (a + b)).abs() <= 1e-9 * (1.0 + both.abs()));
	}
}

#[test]
fn signal_arriving_on_a_later_dwell_is_detected() {
	// First dwell is noise only, the second carries the satellite
	let mut input = noise_only(2*L, 1.0, 41);
	input.extend_from_slice(&synthetic(7, 4*L, 1500, 1190.0, 0.3, 42)[2*L..]);

	let mut acq = engine(AcqConf{ prn: 7, ..Default::default() });
	let rec = Arc::new(Recorder::default());
	acq.set_listener(Arc::downgrade(&rec) as Weak<dyn AcquisitionListener>);
	acq.reset();

	assert_eq!(acq.general_work(&input, 1).consumed, 2*L);
	assert_eq!(acq.state(), AcqState::Searching);
	assert!(acq.test_statistic() < 20.0);

	let (consumed, ev) = run(&mut acq, &input[2*L..]);
	assert_eq!(consumed, 2*L);
	assert_eq!(acq.dwell_count(), 2);

	let s = ev.unwrap().synchro;
	assert!(s.flag_valid_acquisition);
	assert_eq!(s.acq_delay_samples, 1500.0);
	assert_eq!(s.acq_doppler_hz, 1187.5);
	assert_eq!(s.acq_samplestamp_samples, 2*L as u64);
	assert_eq!(rec.events.lock().unwrap().len(), 1);
}

#[test]
fn doppler_range_changes_at_the_next_reset() {
	let mut acq = engine(AcqConf{ prn: 7, ..Default::default() });
	acq.control(&AcqCommand::SetDopplerMax(2000)).unwrap();
	assert_eq!(acq.doppler_bins_hz().len(), 21);

	acq.control(&AcqCommand::Reset).unwrap();
	assert_eq!(acq.geometry().num_doppler_bins, 9);
	assert_eq!(acq.doppler_bins_hz()[0], -2000.0);
	assert_eq!(acq.doppler_bins_hz()[8], 2000.0);

	acq.control(&AcqCommand::SetDopplerStep(250)).unwrap();
	acq.control(&AcqCommand::SetState(1)).unwrap();
	assert_eq!(acq.geometry().num_doppler_bins, 17);
	assert_eq!(acq.grid().num_bins(), 17);
	assert_eq!(acq.doppler_bins_hz()[1], -1750.0);

	let (_, ev) = run(&mut acq, &synthetic(7, 4*L, 321, 1190.0, 0.1, 43));
	let s = ev.unwrap().synchro;
	assert_eq!(s.acq_delay_samples, 321.0);
	assert_eq!(s.acq_doppler_hz, 1187.5);
}

#[test]
fn false_alarms_are_rare() {
	let mut positives = 0;
	for seed in 0..40 {
		let mut acq = engine(AcqConf{ prn: 12, ..Default::default() });
		acq.reset();
		let (_, ev) = run(&mut acq, &noise_only(8*L, 1.0, 500 + seed));
		if ev.unwrap().outcome.is_positive() { positives += 1; }
	}
	assert!(positives <= 1, "{} false alarms in 40 trials", positives);
}
