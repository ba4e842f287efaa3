
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Serialize, Deserialize};

use crate::{DigSigProcErr as DSPErr};
use crate::block::{BlockFunctionality, BlockResult, Work};
use crate::config::EngineConfig;
use crate::error::AcqResult;
use crate::gnss::common::acquisition::AcqCommand;
use crate::gnss::common::acquisition::fine_doppler_pcps::FineDopplerPcps;
use crate::gnss::common::synchro::{AcqEvent, AcqOutcome, AcquisitionListener, GnssSynchro};
use crate::gnss::common::tracking::Tracking;
use crate::types::IqSample;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
	Idle,
	Acquiring,
	Tracking,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelEvent {
	ValidAcquisition(GnssSynchro),
	FailedAcquisitionRepeat,
	FailedAcquisitionNoRepeat,
	LossOfLock,
	Stop,
}

/// What the owner of the engines has to do after a transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelAction {
	StartTracking(GnssSynchro),
	RestartAcquisition,
	StopChannel,
}

/// Idle -> Acquiring -> Tracking, and back to Acquiring on loss of lock or a repeated failure.  Registered with
/// the acquisition engine as its listener; completion signals are queued and applied by the channel that owns
/// the engines, between calls to `general_work`.
pub struct ChannelFsm {
	channel_id: usize,
	state: Mutex<ChannelState>,
	events: Mutex<VecDeque<ChannelEvent>>,
}

impl AcquisitionListener for ChannelFsm {
	fn on_acquisition(&self, outcome:AcqOutcome, synchro:&GnssSynchro) {
		let event = match outcome {
			AcqOutcome::Positive         => ChannelEvent::ValidAcquisition(*synchro),
			AcqOutcome::NegativeRepeat   => ChannelEvent::FailedAcquisitionRepeat,
			AcqOutcome::NegativeNoRepeat => ChannelEvent::FailedAcquisitionNoRepeat,
		};
		self.push_event(event);
	}
}

impl ChannelFsm {

	pub fn new(channel_id:usize) -> Arc<Self> {
		Arc::new(Self{ channel_id, state: Mutex::new(ChannelState::Idle), events: Mutex::new(VecDeque::new()) })
	}

	pub fn channel_id(&self) -> usize { self.channel_id }

	pub fn state(&self) -> ChannelState { *lock(&self.state) }

	pub fn push_event(&self, event:ChannelEvent) { lock(&self.events).push_back(event); }

	pub fn pop_event(&self) -> Option<ChannelEvent> { lock(&self.events).pop_front() }

	/// Idle -> Acquiring; returns false if the channel was already busy
	pub fn start_acquisition(&self) -> bool {
		let mut state = lock(&self.state);
		if *state == ChannelState::Idle {
			*state = ChannelState::Acquiring;
			true
		} else {
			false
		}
	}

	/// Applies one event and returns the action it calls for, if any
	pub fn event(&self, event:ChannelEvent) -> Option<ChannelAction> {
		let mut state = lock(&self.state);
		let (next, action) = match (*state, event) {
			(ChannelState::Acquiring, ChannelEvent::ValidAcquisition(s)) => (ChannelState::Tracking,  Some(ChannelAction::StartTracking(s))),
			(ChannelState::Acquiring, ChannelEvent::FailedAcquisitionRepeat) => (ChannelState::Acquiring, Some(ChannelAction::RestartAcquisition)),
			(ChannelState::Acquiring, ChannelEvent::FailedAcquisitionNoRepeat) => (ChannelState::Idle, Some(ChannelAction::StopChannel)),
			(ChannelState::Tracking,  ChannelEvent::LossOfLock) => (ChannelState::Acquiring, Some(ChannelAction::RestartAcquisition)),
			(_, ChannelEvent::Stop) => (ChannelState::Idle, Some(ChannelAction::StopChannel)),
			(current, ev) => {
				log::debug!("Channel {}: ignoring {:?} while {:?}", self.channel_id, ev, current);
				(current, None)
			},
		};
		if next != *state {
			log::debug!("Channel {}: {:?} -> {:?}", self.channel_id, *state, next);
		}
		*state = next;
		action
	}

}

// A poisoned lock only means another thread panicked mid-update; the queue and state are still usable
fn lock<T>(m:&Mutex<T>) -> MutexGuard<T> {
	match m.lock() {
		Ok(guard) => guard,
		Err(poisoned) => poisoned.into_inner(),
	}
}

#[derive(Debug, Clone)]
pub enum ChannelCommand {
	Start,
	Stop,
	Acquisition(AcqCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChannelOutput {
	Acquisition(AcqEvent),
	Tracking(GnssSynchro),
	LostLock{ prn:u32, sample_counter:u64 },
}

/// One satellite's acquisition engine and tracking loop, sequenced by a `ChannelFsm`
pub struct Channel<S: IqSample> {
	channel_id: usize,
	fsm: Arc<ChannelFsm>,
	acq: FineDopplerPcps<S>,
	trk: Tracking<S>,
	sample_counter: u64,
}

impl<S: IqSample> Channel<S> {

	pub fn new(conf:&EngineConfig, prn:u32, channel_id:usize) -> AcqResult<Self> {
		let mut acq_conf = conf.acquisition.clone();
		acq_conf.prn = prn;
		acq_conf.channel = channel_id;

		let fsm = ChannelFsm::new(channel_id);
		let mut acq = FineDopplerPcps::new(acq_conf)?;
		let listener:Weak<dyn AcquisitionListener> = Arc::downgrade(&fsm) as Weak<dyn AcquisitionListener>;
		acq.set_listener(listener);
		let trk = Tracking::new(conf.tracking.clone())?;

		Ok(Self{ channel_id, fsm, acq, trk, sample_counter: 0 })
	}

	pub fn channel_id(&self) -> usize { self.channel_id }
	pub fn prn(&self) -> u32 { self.acq.prn() }
	pub fn state(&self) -> ChannelState { self.fsm.state() }
	pub fn sample_counter(&self) -> u64 { self.sample_counter }
	pub fn fsm(&self) -> &Arc<ChannelFsm> { &self.fsm }
	pub fn acquisition(&self) -> &FineDopplerPcps<S> { &self.acq }
	pub fn tracking(&self) -> &Tracking<S> { &self.trk }

	pub fn start(&mut self) {
		if self.fsm.start_acquisition() {
			log::info!("Channel {}: searching for PRN {}", self.channel_id, self.prn());
			self.restart_acquisition();
		}
	}

	pub fn stop(&mut self) {
		if let Some(action) = self.fsm.event(ChannelEvent::Stop) {
			self.apply(action);
		}
	}

	fn restart_acquisition(&mut self) {
		self.trk.stop_tracking();
		self.acq.set_sample_counter(self.sample_counter);
		self.acq.reset();
	}

	fn apply(&mut self, action:ChannelAction) {
		match action {
			ChannelAction::StartTracking(synchro) => {
				self.acq.stop_acquisition();
				if let Err(e) = self.trk.start_tracking(&synchro, self.sample_counter) {
					log::error!("Channel {}: {}", self.channel_id, e);
					// Back to searching rather than sitting in a dead tracking state
					self.fsm.event(ChannelEvent::LossOfLock);
					self.restart_acquisition();
				}
			},
			ChannelAction::RestartAcquisition => self.restart_acquisition(),
			ChannelAction::StopChannel => {
				self.acq.stop_acquisition();
				self.trk.stop_tracking();
				log::info!("Channel {}: stopped", self.channel_id);
			},
		}
	}

	fn drain_events(&mut self) {
		while let Some(event) = self.fsm.pop_event() {
			if let Some(action) = self.fsm.event(event) {
				self.apply(action);
			}
		}
	}

}

impl<S: IqSample> BlockFunctionality<ChannelCommand, (), S, ChannelOutput> for Channel<S> {

	fn control(&mut self, command:&ChannelCommand) -> Result<(), &'static str> {
		match command {
			ChannelCommand::Start => self.start(),
			ChannelCommand::Stop  => self.stop(),
			ChannelCommand::Acquisition(c) => self.acq.control(c)?,
		}
		Ok(())
	}

	fn forecast(&self, noutput_items:usize) -> usize {
		match self.fsm.state() {
			ChannelState::Idle      => 1,
			ChannelState::Acquiring => self.acq.forecast(noutput_items),
			ChannelState::Tracking  => self.trk.forecast(noutput_items),
		}
	}

	fn general_work(&mut self, input:&[S], noutput_items:usize) -> Work<ChannelOutput> {
		match self.fsm.state() {
			ChannelState::Idle => {
				self.sample_counter += input.len() as u64;
				Work::consumed(input.len())
			},
			ChannelState::Acquiring => {
				let Work{ consumed, result } = self.acq.general_work(input, noutput_items);
				self.sample_counter += consumed as u64;
				self.drain_events();
				match result {
					BlockResult::Ready(ev) => Work{ consumed, result: BlockResult::Ready(ChannelOutput::Acquisition(ev)) },
					BlockResult::NotReady  => Work{ consumed, result: BlockResult::NotReady },
					BlockResult::Err(e)    => Work{ consumed, result: BlockResult::Err(e) },
				}
			},
			ChannelState::Tracking => {
				let Work{ consumed, result } = self.trk.general_work(input, noutput_items);
				self.sample_counter += consumed as u64;
				match result {
					BlockResult::Ready(s) => Work{ consumed, result: BlockResult::Ready(ChannelOutput::Tracking(s)) },
					BlockResult::NotReady => Work{ consumed, result: BlockResult::NotReady },
					BlockResult::Err(DSPErr::LossOfLock) => {
						self.fsm.push_event(ChannelEvent::LossOfLock);
						self.drain_events();
						Work{ consumed, result: BlockResult::Ready(ChannelOutput::LostLock{ prn: self.prn(), sample_counter: self.sample_counter }) }
					},
					BlockResult::Err(e) => Work{ consumed, result: BlockResult::Err(e) },
				}
			},
		}
	}

}
