
pub mod block;
pub mod config;
pub mod error;
pub mod gnss;
pub mod io;
pub mod types;

pub mod utils;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DigSigProcErr {
	LossOfLock,
	Other(&'static str),
}
