
use serde::{Serialize, Deserialize};

/// Synchronization record handed from acquisition to tracking and updated by tracking every integration
/// period.  The acquisition fields are only meaningful once `flag_valid_acquisition` is set, the tracking
/// fields once `flag_valid_tracking` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GnssSynchro {
	pub prn:u32,
	pub channel_id:usize,

	// Written by acquisition
	pub acq_delay_samples:f64,
	pub acq_doppler_hz:f64,
	pub acq_samplestamp_samples:u64,
	pub acq_test_statistic:f64,
	pub flag_valid_acquisition:bool,

	// Written by tracking
	pub code_phase_samples:f64,
	pub carrier_phase_rad:f64,
	pub carrier_doppler_hz:f64,
	pub cn0_db_hz:f64,
	pub prompt_i:f64,
	pub prompt_q:f64,
	pub tracking_sample_counter:u64,
	pub flag_valid_tracking:bool,
}

impl GnssSynchro {

	pub fn new(prn:u32, channel_id:usize) -> Self { Self{ prn, channel_id, ..Default::default() } }

	/// The record if it carries a valid acquisition, otherwise `None`
	pub fn acquisition(&self) -> Option<&Self> { if self.flag_valid_acquisition { Some(self) } else { None } }

	/// The record if it carries a valid tracking update, otherwise `None`
	pub fn tracking(&self) -> Option<&Self> { if self.flag_valid_tracking { Some(self) } else { None } }

}

/// Result of one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcqOutcome {
	Positive,
	/// Negative, and the channel should search the same satellite again
	NegativeRepeat,
	/// Negative, and the channel should move on
	NegativeNoRepeat,
}

impl AcqOutcome {
	pub fn is_positive(&self) -> bool { *self == AcqOutcome::Positive }
}

/// Receives the completion signal of an acquisition engine.  Engines only hold a weak reference to their
/// listener, so the listener may be dropped first.
pub trait AcquisitionListener: Send + Sync {
	fn on_acquisition(&self, outcome:AcqOutcome, synchro:&GnssSynchro);
}

/// Completion signal and the snapshot of the record it refers to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcqEvent {
	pub outcome:AcqOutcome,
	pub synchro:GnssSynchro,
}
