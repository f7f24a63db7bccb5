use std::io;

/// Every fallible operation in the workspace returns one of these variants
/// (or wraps one).
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// Codec-level violation: a declared length overruns the body, or the
	/// opcode is unrecognized. Connection-terminating, no response sent.
	#[error("malformed packet: {0}")]
	Malformed(String),

	/// Named timeseries absent on DELETE/QUERY.
	#[error("timeseries not found")]
	NotFound,

	/// CREATE_TS on an already-existing name. Handlers treat this as an
	/// idempotent success and log it at debug.
	#[error("timeseries already exists")]
	AlreadyExists,

	/// A structurally valid opcode this version does not implement.
	#[error("unknown command")]
	UnknownCommand,

	/// Allocation failure (or a configured capacity ceiling) inside a
	/// handler. See `collections::timeseries::Timeseries::MAX_RECORDS`.
	#[error("out of memory")]
	Oom,

	/// Zero-byte read or a DISCONNECT event from the multiplexer.
	#[error("peer disconnected")]
	Disconnected,

	/// Wraps a lower-level I/O failure (bind, accept, read, write).
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	/// Listener bind failure at startup; fatal for the process.
	#[error("failed to bind {addr}: {source}")]
	Bind { addr: String, source: io::Error },

	/// A configuration file or command-line flag could not be parsed.
	#[error("configuration error: {0}")]
	Config(String),
}

pub type Result<T = (), E = Error> = std::result::Result<T, E>;
