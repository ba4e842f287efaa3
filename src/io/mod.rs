
use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use num_complex::Complex;

pub const BUFFER_SIZE:usize = 2048;

const BYTES_PER_SAMPLE:usize = 4;

/// Iterates over a stream of interleaved little-endian 16-bit I/Q samples, yielding each sample with its index
pub struct BufferedSource<S: Read> {
	src: S,
	idx: u64,
	raw: Vec<u8>,
	buffer: Vec<Complex<i16>>,
	buffer_idx: usize,
	error: Option<io::Error>,
}

impl<S: Read> BufferedSource<S> {

	pub fn new(src:S) -> Self {
		Self { src, idx: 0, raw: vec![0u8; BUFFER_SIZE * BYTES_PER_SAMPLE], buffer: Vec::with_capacity(BUFFER_SIZE), buffer_idx: 0, error: None }
	}

	/// Index of the next sample to be returned
	pub fn sample_index(&self) -> u64 { self.idx }

	/// The read error that ended the stream early, if there was one
	pub fn take_error(&mut self) -> Option<io::Error> { self.error.take() }

	fn buffer_samples(&mut self) {
		// A single read may return fewer bytes than asked for, so keep going until the buffer is full or the source is exhausted.
		// Samples read before an error are still handed out.
		let mut filled:usize = 0;
		while filled < self.raw.len() {
			match self.src.read(&mut self.raw[filled..]) {
				Ok(0) => break,
				Ok(n) => filled += n,
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => {
					log::error!("Unable to read samples: {}", e);
					self.error = Some(e);
					break;
				},
			}
		}

		self.buffer.clear();
		self.buffer.extend(self.raw[..filled - (filled % BYTES_PER_SAMPLE)].chunks(BYTES_PER_SAMPLE).map(|b| Complex{
			re: LittleEndian::read_i16(&b[0..2]),
			im: LittleEndian::read_i16(&b[2..4]),
		}));
		self.buffer_idx = 0;
	}

	/// Up to `n` samples; fewer only at the end of the stream or after a read error (see `take_error`)
	pub fn next_block(&mut self, n:usize) -> Vec<Complex<i16>> { self.by_ref().take(n).map(|(s, _)| s).collect() }

}

impl<S: Read> Iterator for BufferedSource<S> {
	type Item = (Complex<i16>, u64);

	fn next(&mut self) -> Option<(Complex<i16>, u64)> {
		if self.buffer_idx >= self.buffer.len() {
			if self.error.is_some() { return None; }
			self.buffer_samples();
			// The buffering operation might succeed, but still read zero new samples; if so, we're done
			if self.buffer.is_empty() { return None; }
		}

		let ans = (self.buffer[self.buffer_idx], self.idx);
		self.idx += 1;
		self.buffer_idx += 1;
		Some(ans)
	}
}

const DUMP_MAGIC:&[u8; 4] = b"ACQD";
const DUMP_VERSION:u32 = 1;

/// Everything written for one acquisition attempt when dumping is enabled
#[derive(Debug, Clone, PartialEq)]
pub struct AcqDump {
	pub prn:u32,
	pub channel:u32,
	pub positive:bool,
	pub num_dwells:u32,
	pub samplestamp:u64,
	pub test_statistic:f64,
	pub threshold:f64,
	pub doppler_hz:f64,
	pub code_phase_samples:f64,
	pub doppler_bins_hz:Vec<f64>,
	pub code_length:usize,
	/// Row-major, one row of `code_length` powers per Doppler bin
	pub grid:Vec<f32>,
}

pub fn write_acq_dump<W: Write>(w:&mut W, dump:&AcqDump) -> io::Result<()> {
	w.write_all(DUMP_MAGIC)?;
	w.write_u32::<LittleEndian>(DUMP_VERSION)?;
	w.write_u32::<LittleEndian>(dump.prn)?;
	w.write_u32::<LittleEndian>(dump.channel)?;
	w.write_u8(if dump.positive { 1 } else { 0 })?;
	w.write_u32::<LittleEndian>(dump.num_dwells)?;
	w.write_u64::<LittleEndian>(dump.samplestamp)?;
	w.write_f64::<LittleEndian>(dump.test_statistic)?;
	w.write_f64::<LittleEndian>(dump.threshold)?;
	w.write_f64::<LittleEndian>(dump.doppler_hz)?;
	w.write_f64::<LittleEndian>(dump.code_phase_samples)?;
	w.write_u32::<LittleEndian>(dump.doppler_bins_hz.len() as u32)?;
	w.write_u32::<LittleEndian>(dump.code_length as u32)?;
	for d in &dump.doppler_bins_hz { w.write_f64::<LittleEndian>(*d)?; }
	for p in &dump.grid { w.write_f32::<LittleEndian>(*p)?; }
	Ok(())
}

pub fn read_acq_dump<R: Read>(r:&mut R) -> io::Result<AcqDump> {
	let mut magic = [0u8; 4];
	r.read_exact(&mut magic)?;
	if &magic != DUMP_MAGIC {
		return Err(io::Error::new(io::ErrorKind::InvalidData, "Not an acquisition dump"));
	}
	let version = r.read_u32::<LittleEndian>()?;
	if version != DUMP_VERSION {
		return Err(io::Error::new(io::ErrorKind::InvalidData, format!("Unsupported dump version {}", version)));
	}

	let prn            = r.read_u32::<LittleEndian>()?;
	let channel        = r.read_u32::<LittleEndian>()?;
	let positive       = r.read_u8()? != 0;
	let num_dwells     = r.read_u32::<LittleEndian>()?;
	let samplestamp    = r.read_u64::<LittleEndian>()?;
	let test_statistic = r.read_f64::<LittleEndian>()?;
	let threshold      = r.read_f64::<LittleEndian>()?;
	let doppler_hz     = r.read_f64::<LittleEndian>()?;
	let code_phase_samples = r.read_f64::<LittleEndian>()?;
	let num_bins       = r.read_u32::<LittleEndian>()? as usize;
	let code_length    = r.read_u32::<LittleEndian>()? as usize;

	let mut doppler_bins_hz = vec![0.0; num_bins];
	r.read_f64_into::<LittleEndian>(&mut doppler_bins_hz)?;
	let mut grid = vec![0.0f32; num_bins * code_length];
	r.read_f32_into::<LittleEndian>(&mut grid)?;

	Ok(AcqDump{ prn, channel, positive, num_dwells, samplestamp, test_statistic, threshold, doppler_hz,
		code_phase_samples, doppler_bins_hz, code_length, grid })
}
