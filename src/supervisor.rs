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

//! Constructs the log store and consumer workers, drives them to
//! completion, and tears them down on an orderly stop. One dedicated OS
//! thread per consumer, joined on drop via `jod_thread` — exits cleanly if
//! the caller never calls `stop()` explicitly.

use std::{
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use sqlx::postgres::PgPool;

use crate::{
	config::Config,
	consumer::{Consumer, Listener, NoopListener},
	entry::LogIndex,
	error::Result,
	logstore::LogStore,
};

struct ConsumerWorker {
	consumer_id: String,
	stop_tx: flume::Sender<()>,
	active: Arc<AtomicBool>,
	handle: jod_thread::JoinHandle<Result<()>>,
}

/// Point-in-time snapshot exposed to the embedding application.
#[derive(Clone, Debug)]
pub struct Stats {
	pub log_path: PathBuf,
	pub consumer_count: usize,
	pub active_count: usize,
	pub last_log_index: Option<LogIndex>,
}

/// Owns the log store and every running consumer worker.
pub struct Supervisor {
	log_store: Arc<LogStore>,
	pool: PgPool,
	config: Config,
	listener: Arc<dyn Listener>,
	workers: Vec<ConsumerWorker>,
}

impl Supervisor {
	/// Opens (or creates) the log store at `config.queue_path` and
	/// prepares to drive consumers against `pool`. Doesn't start any
	/// consumer workers yet — call `start_consumers`.
	pub fn new(config: Config, pool: PgPool) -> Result<Self> {
		Self::with_listener(config, pool, Arc::new(NoopListener))
	}

	pub fn with_listener(config: Config, pool: PgPool, listener: Arc<dyn Listener>) -> Result<Self> {
		let log_store = Arc::new(LogStore::open(&config.queue_path, config.block_size)?);
		Ok(Self { log_store, pool, config, listener, workers: Vec::new() })
	}

	pub fn log_store(&self) -> &Arc<LogStore> {
		&self.log_store
	}

	/// Registers one worker per id in `consumer_ids`, each running on its
	/// own thread against `offset_table`/`batch_size` from the config.
	pub fn start_consumers(&mut self, consumer_ids: impl IntoIterator<Item = impl Into<String>>) {
		for consumer_id in consumer_ids {
			self.start_consumer(consumer_id.into());
		}
	}

	fn start_consumer(&mut self, consumer_id: String) {
		let (stop_tx, stop_rx) = flume::bounded(1);
		let active = Arc::new(AtomicBool::new(true));

		let log_store = self.log_store.clone();
		let pool = self.pool.clone();
		let listener = self.listener.clone();
		let offset_table = self.config.offset_table.clone();
		let batch_size = self.config.batch_size;
		let thread_consumer_id = consumer_id.clone();
		let thread_active = active.clone();

		let handle = jod_thread::spawn(move || {
			let result = async_std::task::block_on(async move {
				let mut consumer = Consumer::new(log_store, pool, thread_consumer_id, offset_table, batch_size, listener).await?;
				consumer.run(&stop_rx).await
			});
			thread_active.store(false, Ordering::SeqCst);
			result
		});

		self.workers.push(ConsumerWorker { consumer_id, stop_tx, active, handle });
	}

	/// Signals every worker to stop, then joins each thread in turn. Stop
	/// is cooperative: a worker finishes its current iteration (commit or
	/// rollback) before its thread exits, so this call blocks for roughly
	/// one iteration's worth of work per consumer, not indefinitely.
	pub fn stop(&mut self) -> Result<()> {
		for worker in &self.workers {
			let _ = worker.stop_tx.send(());
		}
		for worker in std::mem::take(&mut self.workers) {
			worker.handle.join()?;
		}
		Ok(())
	}

	/// A point-in-time snapshot. `last_log_index` is read directly off the
	/// log store's write cursor rather than by scanning to the end with a
	/// transient tailer, since the store already tracks it behind its
	/// append lock.
	pub fn stats(&self) -> Stats {
		Stats {
			log_path: self.log_store.dir().to_path_buf(),
			consumer_count: self.workers.len(),
			active_count: self.workers.iter().filter(|w| w.active.load(Ordering::SeqCst)).count(),
			last_log_index: self.log_store.next_index().checked_sub(1),
		}
	}

	pub fn consumer_ids(&self) -> Vec<&str> {
		self.workers.iter().map(|w| w.consumer_id.as_str()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stats_reports_zero_consumers_before_start() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config { queue_path: dir.path().to_path_buf(), ..Config::default() };
		// A Supervisor needs a live PgPool to start consumers, but `stats()`
		// and log-store construction don't — exercised further in
		// tests/consumer.rs against a real database.
		let log_store = LogStore::open(&config.queue_path, config.block_size).unwrap();
		assert_eq!(log_store.next_index(), 0);
	}
}
