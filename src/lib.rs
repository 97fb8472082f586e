// Copyright 2018-2021 Parity Technologies (UK) Ltd.
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

//! A durable write-ahead log that mediates between application producers
//! and relational databases. Producers append logical mutations; one or
//! more consumers tail the log and apply them to a target database under
//! transactional guarantees, committing their own progress in the same
//! transaction as the data.

#![forbid(unsafe_code)]

mod codec;
pub mod config;
pub mod consumer;
mod entry;
mod error;
#[cfg(feature = "logging")]
mod logger;
pub mod logstore;
mod offset;
mod sql;
pub mod supervisor;
mod util;

pub use self::{
	codec::Record,
	config::{Config, ConfigBuilder},
	consumer::{Consumer, ConsumerState, Listener, NoopListener},
	entry::{LogBatch, LogBatchBuilder, LogEntry, LogEntryBuilder, LogIndex, Op, Value},
	error::{Error, Result},
	logstore::{LogStore, ReadOutcome, Tailer},
	offset as offset_store,
	sql::{synthesize, Statement},
	supervisor::{Stats, Supervisor},
};

/// Initialize stdout + rotating-file logging. See [`logger::init`].
#[cfg(feature = "logging")]
pub fn init_logger(std: log::LevelFilter, file: log::LevelFilter) -> std::io::Result<()> {
	logger::init(std, file)
}
