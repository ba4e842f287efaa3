//! Construction-time errors

use std::io;
use thiserror::Error;

/// Result type for building acquisition and tracking components
pub type AcqResult<T> = Result<T, AcqError>;

/// Errors that abort channel construction
#[derive(Error, Debug)]
pub enum AcqError {
	/// The configuration does not produce a usable search geometry
	#[error("Configuration error: {0}")]
	Config(String),

	/// A required device handle could not be found
	#[error("Device not found: {0}")]
	DeviceNotFound(String),

	/// Reading a configuration file or writing a dump failed
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	/// A configuration file could not be parsed
	#[error("Unable to parse configuration: {0}")]
	Parse(#[from] serde_json::Error),

	/// The satellite id is outside the range covered by the code table
	#[error("No reference code for satellite {0}")]
	UnknownSatellite(u32),

	/// Tracking was started from a record that doesn't carry a valid acquisition
	#[error("Synchronization record for satellite {0} has no valid acquisition")]
	InvalidHandoff(u32),
}
