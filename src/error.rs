// Copyright 2017-2021 Parity Technologies (UK) Ltd.
// This file is part of substrate-archive.

// substrate-archive is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// substrate-archive is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// You should have received a copy of the GNU General Public License
// along with substrate-archive.  If not, see <http://www.gnu.org/licenses/>.

use std::{env, fmt, io};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy for the log/apply core.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Env(#[from] env::VarError),

	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	#[error(transparent)]
	Fmt(#[from] fmt::Error),
	#[error("sqlx error: {0}")]
	Sql(#[from] sqlx::Error),
	#[error("migration error: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),

	/// A `LogEntry` violated a synthesis precondition (empty SET/WHERE
	/// columns for its op). Fatal to the transaction that was applying it.
	#[error("malformed entry: {0}")]
	Malformed(String),

	/// A payload failed to parse as a `LogEntry`/`LogBatch`: bad tag,
	/// truncated field, or a decimal that doesn't parse as one. Raised by
	/// the codec; distinct from the frame-level length/checksum check the
	/// log store performs before handing bytes to the codec at all.
	#[error("decode error: {0}")]
	Decode(String),

	/// A record failed to decode: unknown tag, truncated payload, checksum
	/// mismatch, or a decimal that doesn't parse. Distinct from reaching the
	/// end of the log.
	#[error("corrupt record at index {0}")]
	Corrupt(u64),

	/// The consumer exhausted every skip candidate in the DEGRADED recovery
	/// protocol without finding a readable record.
	#[error("unrecoverable corruption starting at index {0}")]
	FatalCorruption(u64),

	/// Cooperative shutdown signalled mid-loop; not a failure.
	#[error("consumer {0} stopped")]
	Shutdown(String),

	#[error("sending on a disconnected channel")]
	Channel,

	#[error("log store at {0:?} is closed")]
	StoreClosed(std::path::PathBuf),

	#[error("{0}")]
	General(String),
}

impl From<&str> for Error {
	fn from(e: &str) -> Error {
		Error::General(e.to_string())
	}
}

impl From<String> for Error {
	fn from(e: String) -> Error {
		Error::General(e)
	}
}

impl<T> From<flume::SendError<T>> for Error {
	fn from(_: flume::SendError<T>) -> Error {
		Error::Channel
	}
}
