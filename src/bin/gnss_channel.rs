
use std::error::Error;
use std::fs::File;

use clap::{Arg, App};
use colored::*;
use rustfft::num_complex::Complex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gnss_channel::block::Block;
use gnss_channel::config::EngineConfig;
use gnss_channel::gnss::channel::{Channel, ChannelCommand, ChannelOutput};
use gnss_channel::gnss::common::synchro::{AcqOutcome, GnssSynchro};
use gnss_channel::io::BufferedSource;

const CHUNK_SAMPLES:usize = 20_000;

struct RunningChannel {
	prn: u32,
	tx_control: mpsc::Sender<ChannelCommand>,
	tx_input: mpsc::Sender<Vec<Complex<i16>>>,
	handles: Vec<JoinHandle<Result<(), &'static str>>>,
	collector: JoinHandle<Vec<GnssSynchro>>,
}

// Prints acquisition and lock events as they happen and keeps every tracking record
async fn collect(fs:f64, mut rx_output:mpsc::Receiver<ChannelOutput>) -> Vec<GnssSynchro> {
	let mut records:Vec<GnssSynchro> = vec![];
	while let Some(output) = rx_output.recv().await {
		match output {
			ChannelOutput::Acquisition(ev) => {
				let s = ev.synchro;
				let t = (s.acq_samplestamp_samples as f64) / fs;
				match ev.outcome {
					AcqOutcome::Positive => eprintln!("{}", format!("{:7.3} [sec] PRN {:02}: acquired at {:8.1} [Hz], {:6.0} [samples], test statistic {:.2}",
						t, s.prn, s.acq_doppler_hz, s.acq_delay_samples, s.acq_test_statistic).green()),
					_ => eprintln!("{}", format!("{:7.3} [sec] PRN {:02}: not found, test statistic {:.2}", t, s.prn, s.acq_test_statistic).yellow()),
				}
			},
			ChannelOutput::Tracking(s) => {
				if records.len() % 1000 == 999 {
					eprintln!("{}", format!("{:7.3} [sec] PRN {:02}: {:8.1} [Hz], C/N0 {:4.1} [dB-Hz]",
						(s.tracking_sample_counter as f64) / fs, s.prn, s.carrier_doppler_hz, s.cn0_db_hz).cyan());
				}
				records.push(s);
			},
			ChannelOutput::LostLock{ prn, sample_counter } => {
				eprintln!("{}", format!("{:7.3} [sec] PRN {:02}: lost lock, searching again", (sample_counter as f64) / fs, prn).red());
			},
		}
	}
	records
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {

	env_logger::init();

	let matches = App::new("GNSS Channel")
		.version("0.1.0")
		.about("Takes IQ samples centered on 1575.42 MHz, acquires the requested GPS L1 C/A satellites and tracks the ones it finds")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename, interleaved little endian i16 IQ")
			.required(true).takes_value(true))
		.arg(Arg::with_name("sample_rate_sps")
			.short("s").long("sample_rate_sps")
			.takes_value(true).default_value("2048000"))
		.arg(Arg::with_name("config")
			.short("c").long("config")
			.help("JSON file with acquisition and tracking settings")
			.takes_value(true))
		.arg(Arg::with_name("prns")
			.short("p").long("prns")
			.help("Comma separated satellite ids, all 32 by default")
			.takes_value(true))
		.arg(Arg::with_name("max_seconds")
			.long("max_seconds")
			.help("Stop after this much input")
			.takes_value(true))
		.get_matches();

	let fname:&str = matches.value_of("filename").ok_or("No filename given")?;
	let fs:f64 = matches.value_of("sample_rate_sps").unwrap_or("2048000").parse()?;
	let max_samples:Option<u64> = match matches.value_of("max_seconds") {
		Some(s) => Some((s.parse::<f64>()? * fs) as u64),
		None => None,
	};
	let prns:Vec<u32> = match matches.value_of("prns") {
		Some(s) => s.split(',').map(|p| p.trim().parse::<u32>()).collect::<Result<Vec<u32>, _>>()?,
		None => (1..=32).collect(),
	};

	let conf = match matches.value_of("config") {
		Some(path) => EngineConfig::from_json_file(path)?,
		None => EngineConfig::default(),
	}.with_sample_rate(fs);

	eprintln!("Searching {} for {} satellite(s) at {} [samples/sec]", fname, prns.len(), fs);

	let mut channels:Vec<RunningChannel> = vec![];
	for (channel_id, prn) in prns.iter().enumerate() {
		let ch:Channel<Complex<i16>> = Channel::new(&conf, *prn, channel_id)?;
		let Block{ tx_control, tx_input, rx_output, handles } = Block::from(ch);
		tx_control.send(ChannelCommand::Start).await.map_err(|_| "Unable to start channel")?;
		let collector = tokio::spawn(collect(fs, rx_output));
		channels.push(RunningChannel{ prn: *prn, tx_control, tx_input, handles, collector });
	}

	let mut src = BufferedSource::new(File::open(fname)?);
	loop {
		let chunk = src.next_block(CHUNK_SAMPLES);
		if chunk.is_empty() { break; }
		for ch in &channels {
			if ch.tx_input.send(chunk.clone()).await.is_err() {
				log::warn!("Channel for PRN {} has stopped taking input", ch.prn);
			}
		}
		if max_samples.map(|m| src.sample_index() >= m).unwrap_or(false) { break; }
	}
	let read_error = src.take_error();

	let mut all_records:Vec<GnssSynchro> = vec![];
	for ch in channels {
		let RunningChannel{ prn, tx_control, tx_input, handles, collector } = ch;
		drop(tx_control);
		drop(tx_input);
		for handle in handles {
			if let Err(e) = handle.await? {
				eprintln!("{}", format!("PRN {:02}: channel ended with {}", prn, e).red());
			}
		}
		all_records.extend(collector.await?);
	}

	// Output data in JSON format
	println!("{}", serde_json::to_string_pretty(&all_records)?);

	if let Some(e) = read_error {
		eprintln!("{}", format!("Input ended early after {} samples: {}", src.sample_index(), e).red());
		return Err(Box::new(e) as Box<dyn Error>);
	}

	Ok(())

}
