
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{DigSigProcErr as DSPErr};


pub enum BlockResult<U> {
	NotReady,
	Ready(U),
	Err(DSPErr)
}

impl<U> BlockResult<U> {

	pub fn unwrap(self) -> U {
		match self {
			Self::Ready(u) => u,
			_ => panic!("Called unwrap on something other than BlockResult::Ready")
		}
	}

	pub fn ready(self) -> Option<U> { match self { Self::Ready(u) => Some(u), _ => None } }

	pub fn is_ready(&self) -> bool { match self { Self::Ready(_) => true, _ => false } }

}

/// Outcome of one call to `general_work`: how many input items were consumed and what, if anything, was produced
pub struct Work<U> {
	pub consumed:usize,
	pub result:BlockResult<U>,
}

impl<U> Work<U> {

	/// Nothing consumed and nothing produced, i.e. the block is waiting on something other than more input
	pub fn idle() -> Self { Self{ consumed: 0, result: BlockResult::NotReady } }

	pub fn consumed(consumed:usize) -> Self { Self{ consumed, result: BlockResult::NotReady } }

	pub fn produced(&self) -> usize { if self.result.is_ready() { 1 } else { 0 } }

}

// A type that implements BlockFunctionality is driven by whoever owns it: the owner asks how many input
// items are needed (forecast), offers at least that many to general_work, then drops the items reported
// as consumed from the front of its buffer.  Control messages are applied between calls to general_work.
pub trait BlockFunctionality<C, D, T, U> {

	fn control(&mut self, control:&C) -> Result<D, &'static str>;

	/// Minimum number of input items needed to produce `noutput_items` output items
	fn forecast(&self, noutput_items:usize) -> usize;

	fn general_work(&mut self, input:&[T], noutput_items:usize) -> Work<U>;

}

pub struct Block<C: 'static + Send, T: 'static + Send, U: 'static + Send> {
	pub tx_control: mpsc::Sender<C>,
	pub tx_input:   mpsc::Sender<Vec<T>>,
	pub rx_output:  mpsc::Receiver<U>,
	pub handles:    Vec<JoinHandle<Result<(), &'static str>>>,
}

impl<C: Send + Sync, T: Send + Sync, U: Send + Sync> Block<C, T, U> {

	pub fn from<B: 'static + BlockFunctionality<C, (), T, U> + Send>(b:B) -> Self {

		let (tx_control, mut rx_control) = mpsc::channel::<C>(10);
		let (tx_input,   mut rx_input)   = mpsc::channel::<Vec<T>>(10);
		let (tx_output,  rx_output)      = mpsc::channel::<U>(10);

		let handle:JoinHandle<Result<(), &'static str>> = tokio::spawn(async move {

			let mut owned_b = b;
			let mut pending:Vec<T> = vec![];
			let mut control_open:bool = true;

			'rx: loop {

				// Interleaving control handling with input handling prevents us from having to
				// use a mutex to protect the state
				while let Ok(c) = rx_control.try_recv() {
					owned_b.control(&c)?;
				}

				let mut stalled:bool = false;
				while pending.len() >= owned_b.forecast(1) {
					let Work{ consumed, result } = owned_b.general_work(&pending, 1);
					let consumed = consumed.min(pending.len());
					pending.drain(..consumed);

					match result {
						BlockResult::Ready(u) => tx_output.send(u).await.map_err(|_| "Unable to send output")?,
						BlockResult::NotReady => if consumed == 0 {
							stalled = true;
							break;
						},
						BlockResult::Err(e) => {
							log::error!("Error in block: {:?}", e);
							break 'rx;
						}
					}
				}

				// A block that can't make progress on the input it has is waiting for a control message,
				// so stop pulling input until one arrives
				if stalled && control_open {
					match rx_control.recv().await {
						Some(c) => {
							owned_b.control(&c)?;
							continue 'rx;
						},
						None => control_open = false,
					}
				}

				match rx_input.recv().await {
					Some(buffer) => pending.extend(buffer),
					None => break 'rx,
				}

			}

			Ok(())
		});

		let handles = vec![handle];

		Block{ tx_control, tx_input, rx_output, handles }
	}

	/// Closes the inputs and waits for the block to finish what it has.  Output produced in the meantime is discarded.
	pub async fn shutdown(self) -> Result<(), &'static str> {

		let Block{ tx_control, tx_input, mut rx_output, handles } = self;

		drop(tx_control);
		drop(tx_input);

		// Keep draining so a block waiting on a full output channel can finish
		while rx_output.recv().await.is_some() {}

		for handle in handles {
			handle.await.map_err(|_| "Block task panicked")??;
		}

		Ok(())
	}

}
