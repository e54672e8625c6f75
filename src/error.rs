use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScopeError>;

/// Broad category of a [`ScopeError`], used to decide whether an acquisition can carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// The link to the instrument is unusable (unreachable, closed, timed out).
	Connection,
	/// The instrument answered with something we could not make sense of.
	Protocol,
	/// Sample data disagrees with its header or could not be converted.
	Decode,
	/// A lookup in a [`WaveformSet`](crate::WaveformSet) missed.
	NotFound,
	/// The caller asked for something invalid.
	Usage,
}

#[derive(Error, Debug)]
pub enum ScopeError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Unable to connect to {address}: {reason}")]
	Connect { address: String, reason: String },
	#[error("Connection is closed")]
	NotConnected,
	#[error("Timed out after {0:?}")]
	Timeout(Duration),
	#[error("Serial port error: {0}")]
	Serial(#[from] serialport::Error),
	#[error("Device error {code}: {message}")]
	Device { code: i32, message: &'static str },
	#[error("RPC error: {0}")]
	Rpc(String),
	#[error("Protocol error: {0}")]
	Protocol(String),
	#[error("Channel {0} is not enabled on the instrument")]
	ChannelDisabled(String),
	#[error("Decode error: {0}")]
	Decode(String),
	#[error("Sample count mismatch: header declares {declared}, received {actual}")]
	CountMismatch { declared: usize, actual: usize },
	#[error("CSV error: {0}")]
	Csv(#[from] csv::Error),
	#[error("Source not found: {0}")]
	NotFound(String),
	#[error("Invalid channel source: {0}")]
	InvalidSource(String),
	#[error("Cannot merge waveforms from different instruments: {left:?} vs {right:?}")]
	Incompatible { left: String, right: String },
	#[error("{0} is not available over this link")]
	Unsupported(String),
	#[error("Config error: {0}")]
	Config(#[from] config::ConfigError),
}

impl ScopeError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			ScopeError::Io(_)
			| ScopeError::Connect { .. }
			| ScopeError::NotConnected
			| ScopeError::Timeout(_)
			| ScopeError::Serial(_)
			| ScopeError::Device { .. } => ErrorKind::Connection,
			ScopeError::Rpc(_) | ScopeError::Protocol(_) | ScopeError::ChannelDisabled(_) => ErrorKind::Protocol,
			ScopeError::Decode(_) | ScopeError::CountMismatch { .. } | ScopeError::Csv(_) => ErrorKind::Decode,
			ScopeError::NotFound(_) => ErrorKind::NotFound,
			ScopeError::InvalidSource(_)
			| ScopeError::Incompatible { .. }
			| ScopeError::Unsupported(_)
			| ScopeError::Config(_) => ErrorKind::Usage,
		}
	}

	pub fn is_connection(&self) -> bool { self.kind() == ErrorKind::Connection }

	pub(crate) fn protocol<S: Into<String>>(msg: S) -> Self { ScopeError::Protocol(msg.into()) }

	pub(crate) fn decode<S: Into<String>>(msg: S) -> Self { ScopeError::Decode(msg.into()) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_follow_the_taxonomy() {
		assert_eq!(ScopeError::NotConnected.kind(), ErrorKind::Connection);
		assert_eq!(ScopeError::Timeout(Duration::from_secs(1)).kind(), ErrorKind::Connection);
		assert_eq!(ScopeError::protocol("bad block").kind(), ErrorKind::Protocol);
		assert_eq!(ScopeError::CountMismatch { declared: 3, actual: 2 }.kind(), ErrorKind::Decode);
		assert_eq!(ScopeError::NotFound("CH3".into()).kind(), ErrorKind::NotFound);
		assert_eq!(ScopeError::InvalidSource("CH99".into()).kind(), ErrorKind::Usage);
	}

	#[test]
	fn io_errors_are_connection_errors() {
		let e: ScopeError = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
		assert!(e.is_connection());
	}
}
