use std::f64::consts;
use std::fs::{self, File};
use std::io::BufReader;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rustfft::num_complex::Complex;

use gnss_channel::block::{Block, BlockFunctionality, BlockResult};
use gnss_channel::config::{AcqConf, TestStatistic};
use gnss_channel::gnss::common::acquisition::{AcqCommand, AcqState};
use gnss_channel::gnss::common::acquisition::fine_doppler_pcps::FineDopplerPcps;
use gnss_channel::gnss::common::code_table::ReferenceCodeTable;
use gnss_channel::gnss::common::synchro::{AcqEvent, AcqOutcome};
use gnss_channel::gnss::gps_l1_ca::signal_modulation::GpsL1Ca;
use gnss_channel::io::read_acq_dump;

const FS:f64 = 2048000.0;
const L:usize = 2048;

fn synthetic(prn:u32, num_samples:usize, delay:usize, doppler_hz:f64, sigma:f64, seed:u64) -> Vec<Complex<f64>> {
	let table = ReferenceCodeTable::shared(&GpsL1Ca, FS).unwrap();
	let code = table.sampled_code(prn).unwrap();
	let mut rng = StdRng::seed_from_u64(seed);
	let noise = Normal::new(0.0, sigma).unwrap();

	(0..num_samples).map(|i| {
		let phase = 2.0 * consts::PI * doppler_hz * (i as f64) / FS;
		code[(i + L - delay) % L] * Complex::from_polar(1.0, phase) + Complex{ re: noise.sample(&mut rng), im: noise.sample(&mut rng) }
	}).collect()
}

fn run_to_completion(acq:&mut FineDopplerPcps<Complex<f64>>, input:&[Complex<f64>]) -> Option<AcqEvent> {
	let mut idx = 0;
	while input.len() - idx >= acq.forecast(1) {
		let work = acq.general_work(&input[idx..], 1);
		idx += work.consumed;
		match work.result {
			BlockResult::Ready(ev) => return Some(ev),
			BlockResult::Err(e) => panic!("{:?}", e),
			BlockResult::NotReady => if work.consumed == 0 { return None; },
		}
	}
	None
}

#[test]
fn dumped_grid_matches_the_detection() {
	let dir = std::env::temp_dir().join(format!("gnss_channel_grid_{}", std::process::id()));
	fs::create_dir_all(&dir).unwrap();
	let prefix = dir.join("acq").to_string_lossy().to_string();

	let conf = AcqConf{ prn: 14, channel: 5, dump: true, dump_filename: prefix.clone(), ..AcqConf::default() };
	let mut acq:FineDopplerPcps<Complex<f64>> = FineDopplerPcps::new(conf).unwrap();
	acq.reset();

	let input = synthetic(14, 8*L, 600, -2950.0, 0.3, 31);
	let ev = run_to_completion(&mut acq, &input).unwrap();
	assert_eq!(ev.outcome, AcqOutcome::Positive);
	assert_eq!(ev.synchro.acq_delay_samples, 600.0);
	assert_eq!(ev.synchro.acq_doppler_hz, -2937.5);

	let path = format!("{}_ch5_0.dat", prefix);
	let dump = read_acq_dump(&mut BufReader::new(File::open(&path).unwrap())).unwrap();
	assert!(dump.positive);
	assert_eq!(dump.prn, 14);
	assert_eq!(dump.channel, 5);
	assert_eq!(dump.num_dwells, 1);
	assert_eq!(dump.code_length, L);
	assert_eq!(dump.doppler_hz, -2937.5);
	assert_eq!(dump.doppler_bins_hz.len(), 21);
	assert_eq!(dump.doppler_bins_hz[0], -5000.0);
	assert_eq!(dump.doppler_bins_hz[20], 5000.0);
	assert_eq!(dump.grid.len(), 21 * L);

	// The coarse grid peaks in the -3000 [Hz] row at the code delay
	let (best, _) = dump.grid.iter().enumerate().fold((0, 0.0f32), |(bi, bp), (i, p)| if *p > bp { (i, *p) } else { (bi, bp) });
	assert_eq!(dump.doppler_bins_hz[best / L], -3000.0);
	assert_eq!(best % L, 600);

	fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn peak_to_second_peak_statistic() {
	let conf = AcqConf{ prn: 30, threshold: 2.5, test_statistic: TestStatistic::PeakToSecondPeak, ..AcqConf::default() };

	let mut acq:FineDopplerPcps<Complex<f64>> = FineDopplerPcps::new(conf.clone()).unwrap();
	acq.reset();
	let ev = run_to_completion(&mut acq, &synthetic(30, 8*L, 1999, 4070.0, 0.3, 32)).unwrap();
	assert_eq!(ev.outcome, AcqOutcome::Positive);
	assert_eq!(ev.synchro.acq_delay_samples, 1999.0);
	assert_eq!(ev.synchro.acq_doppler_hz, 4062.5);

	let mut rng = StdRng::seed_from_u64(33);
	let noise = Normal::new(0.0, 1.0).unwrap();
	let input:Vec<Complex<f64>> = (0..8*L).map(|_| Complex{ re: noise.sample(&mut rng), im: noise.sample(&mut rng) }).collect();
	let mut acq:FineDopplerPcps<Complex<f64>> = FineDopplerPcps::new(conf).unwrap();
	acq.reset();
	let ev = run_to_completion(&mut acq, &input).unwrap();
	assert_eq!(ev.outcome, AcqOutcome::NegativeNoRepeat);
	assert_eq!(acq.dwell_count(), 4);
	assert!(acq.test_statistic() < 2.5);
}

#[tokio::test(flavor = "multi_thread")]
async fn runner_holds_input_until_activated() {
	let acq:FineDopplerPcps<Complex<f64>> = FineDopplerPcps::new(AcqConf{ prn: 2, ..AcqConf::default() }).unwrap();
	let mut blk:Block<AcqCommand, Complex<f64>, AcqEvent> = Block::from(acq);

	blk.tx_input.send(synthetic(2, 6*L, 77, 560.0, 0.3, 34)).await.unwrap();
	tokio::time::sleep(std::time::Duration::from_millis(20)).await;
	assert!(blk.rx_output.try_recv().is_err());

	// Nothing was consumed in standby, so the first dwell starts at sample zero
	blk.tx_control.send(AcqCommand::SetActive(true)).await.unwrap();
	let ev = blk.rx_output.recv().await.unwrap();
	assert_eq!(ev.outcome, AcqOutcome::Positive);
	assert_eq!(ev.synchro.acq_samplestamp_samples, 0);
	assert_eq!(ev.synchro.acq_delay_samples, 77.0);
	assert_eq!(ev.synchro.acq_doppler_hz, 562.5);

	blk.shutdown().await.unwrap();
}

#[test]
fn standby_state_is_restored_by_init() {
	let mut acq:FineDopplerPcps<Complex<f64>> = FineDopplerPcps::new(AcqConf::default()).unwrap();
	acq.set_sample_counter(1234);
	acq.reset();
	assert_eq!(acq.state(), AcqState::Loading);
	acq.init();
	assert_eq!(acq.state(), AcqState::Standby);
	assert_eq!(acq.sample_counter(), 0);
	assert!(!acq.is_active());
}
