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

//! The transactional consumer: tails the log, synthesises and executes SQL,
//! and commits its own progress in the same transaction as the data it
//! applied.

use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use sqlx::{postgres::PgPool, Postgres};

use crate::{
	codec::Record,
	entry::{LogEntry, LogIndex},
	error::{Error, Result},
	logstore::{LogStore, ReadOutcome, Tailer},
	offset, sql,
};

/// Progressive skip distances tried, in order, once a read returns
/// `CORRUPT`. The first candidate that decodes cleanly wins.
const DEGRADED_SKIPS: [u64; 5] = [1, 10, 100, 1_000, 10_000];

const IDLE_BACKOFF: Duration = Duration::from_millis(100);
const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
	Starting,
	Running,
	Degraded,
	Stopping,
	Stopped,
}

/// Hooks into the consumer loop for the embedding application. Calls are
/// synchronous relative to the loop and must not block for long; a panic
/// inside one is caught and logged rather than allowed to take the
/// transaction down with it.
pub trait Listener: Send + Sync {
	fn before_process(&self, _entry: &LogEntry) {}
	fn after_process(&self, _entry: &LogEntry, _success: bool, _error: Option<&Error>) {}
	fn on_batch_complete(&self, _entries: &[LogEntry], _success: bool) {}
}

/// A listener that does nothing; the default when the caller doesn't need
/// one.
pub struct NoopListener;
impl Listener for NoopListener {}

/// Reads batches from one log store tailer and applies them to a target
/// database, one consumer id at a time. Not `Clone` or `Sync` — a consumer
/// is driven by exactly one worker.
pub struct Consumer {
	log_store: Arc<LogStore>,
	pool: PgPool,
	consumer_id: String,
	offset_table: String,
	batch_size: usize,
	listener: Arc<dyn Listener>,
	state: ConsumerState,
	tailer: Tailer,
	last_committed: Option<LogIndex>,
}

impl Consumer {
	/// Ensures the offset table exists, seeks the tailer to the consumer's
	/// last committed position, and transitions STARTING → RUNNING.
	pub async fn new(
		log_store: Arc<LogStore>,
		pool: PgPool,
		consumer_id: impl Into<String>,
		offset_table: impl Into<String>,
		batch_size: usize,
		listener: Arc<dyn Listener>,
	) -> Result<Self> {
		let consumer_id = consumer_id.into();
		let offset_table = offset_table.into();

		let mut conn = pool.acquire().await?;
		offset::ensure_table(&mut conn, &offset_table).await?;
		let last_committed = offset::get(&mut conn, &offset_table, &consumer_id).await?;
		drop(conn);

		let start = last_committed.map(|i| i + 1).unwrap_or(0);
		let tailer = log_store.open_tailer(Some(start))?;

		Ok(Self {
			log_store,
			pool,
			consumer_id,
			offset_table,
			batch_size,
			listener,
			state: ConsumerState::Running,
			tailer,
			last_committed,
		})
	}

	pub fn consumer_id(&self) -> &str {
		&self.consumer_id
	}

	pub fn state(&self) -> ConsumerState {
		self.state
	}

	/// Runs the main loop until `stop_rx` fires, then finishes the
	/// in-flight iteration and transitions to STOPPED. Returns the terminal
	/// error if the consumer stopped because of unrecoverable corruption.
	pub async fn run(&mut self, stop_rx: &flume::Receiver<()>) -> Result<()> {
		loop {
			if stop_rx.try_recv().is_ok() {
				break;
			}

			match self.run_iteration().await {
				Ok(0) => async_std::task::sleep(IDLE_BACKOFF).await,
				Ok(_) => {}
				Err(Error::FatalCorruption(index)) => {
					log::error!("consumer {} unrecoverable corruption at index {}", self.consumer_id, index);
					self.state = ConsumerState::Stopped;
					return Err(Error::FatalCorruption(index));
				}
				Err(err) => {
					log::warn!("consumer {} iteration failed, backing off: {}", self.consumer_id, err);
					async_std::task::sleep(FAILURE_BACKOFF).await;
					self.reseek_to_last_committed()?;
				}
			}

			if stop_rx.try_recv().is_ok() {
				break;
			}
		}
		self.state = ConsumerState::Stopped;
		Ok(())
	}

	fn reseek_to_last_committed(&mut self) -> Result<()> {
		self.tailer.seek(self.last_committed.map(|i| i + 1).unwrap_or(0))
	}

	/// One pass: read up to `batch_size` records, apply + commit offset in
	/// one transaction. Returns the number of records applied (0 means
	/// idle — caller should back off). Exposed publicly so callers that
	/// want single-step control (tests, or an embedder driving its own
	/// scheduling loop) don't have to go through `run`'s backoff/retry
	/// wrapper.
	pub async fn run_iteration(&mut self) -> Result<usize> {
		let mut records = Vec::new();
		let mut batch_end = None;
		let mut corruption = None;

		while records.len() < self.batch_size {
			match self.tailer.read() {
				Ok(ReadOutcome::Record(index, record)) => {
					batch_end = Some(index);
					records.push(record);
				}
				Ok(ReadOutcome::End) => break,
				Err(Error::Corrupt(index)) => {
					corruption = Some(index);
					break;
				}
				Err(other) => return Err(other),
			}
		}

		let applied = records.len();
		if let Some(batch_end) = batch_end {
			self.apply_and_commit(batch_end, records).await?;
		}

		if let Some(index) = corruption {
			self.recover_from_corruption(index).await?;
		}

		Ok(applied)
	}

	async fn apply_and_commit(&mut self, batch_end: LogIndex, records: Vec<Record>) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		let mut failure = None;
		'apply: for record in &records {
			let entries: &[LogEntry] = match record {
				Record::Entry(entry) => std::slice::from_ref(entry),
				Record::Batch(batch) => batch.entries(),
			};
			for entry in entries {
				if let Err(err) = self.apply_entry(&mut tx, entry).await {
					failure = Some(err);
					break 'apply;
				}
			}
		}

		if let Some(err) = failure {
			tx.rollback().await.ok();
			self.notify_batch_complete(&records, false);
			self.reseek_to_last_committed()?;
			return Err(err);
		}

		if let Err(err) = offset::upsert(&mut tx, &self.offset_table, &self.consumer_id, batch_end, now_millis()).await {
			tx.rollback().await.ok();
			self.notify_batch_complete(&records, false);
			self.reseek_to_last_committed()?;
			return Err(err);
		}

		tx.commit().await?;
		self.last_committed = Some(batch_end);
		self.notify_batch_complete(&records, true);
		Ok(())
	}

	async fn apply_entry(&self, tx: &mut sqlx::Transaction<'_, Postgres>, entry: &LogEntry) -> Result<()> {
		self.notify_before(entry);
		let result = self.execute_entry(tx, entry).await;
		self.notify_after(entry, result.is_ok(), result.as_ref().err());
		result
	}

	async fn execute_entry(&self, tx: &mut sqlx::Transaction<'_, Postgres>, entry: &LogEntry) -> Result<()> {
		let statement = match sql::synthesize(entry)? {
			Some(statement) => statement.for_postgres(),
			None => return Ok(()),
		};

		let mut query = sqlx::query(&statement.text);
		for value in &statement.params {
			query = bind_value(query, value);
		}
		query.execute(&mut *tx).await?;
		Ok(())
	}

	/// DEGRADED recovery: try `current + {1, 10, 100, 1000, 10000}` in
	/// order, seeking and reading one record at each candidate. The
	/// skipped range is never committed — an operator can detect a gap by
	/// comparing the committed offset to the log's end.
	async fn recover_from_corruption(&mut self, at: LogIndex) -> Result<()> {
		self.state = ConsumerState::Degraded;
		log::warn!("consumer {} entering DEGRADED at index {}", self.consumer_id, at);

		for skip in DEGRADED_SKIPS {
			let candidate = at + skip;
			self.tailer.seek(candidate)?;
			match self.tailer.read() {
				// `End` counts as recovered too: it means the candidate landed
				// past the last written record, i.e. past the corruption into
				// clean (if currently empty) territory, not onto another
				// unreadable frame.
				Ok(_) => {
					self.tailer.seek(candidate)?;
					self.state = ConsumerState::Running;
					log::warn!("consumer {} recovered at index {} (skipped {} records)", self.consumer_id, candidate, skip);
					return Ok(());
				}
				Err(Error::Corrupt(_)) => continue,
				Err(other) => return Err(other),
			}
		}

		Err(Error::FatalCorruption(at))
	}

	fn notify_before(&self, entry: &LogEntry) {
		let listener = &self.listener;
		if catch_unwind(AssertUnwindSafe(|| listener.before_process(entry))).is_err() {
			log::error!("consumer {}: beforeProcess listener panicked", self.consumer_id);
		}
	}

	fn notify_after(&self, entry: &LogEntry, success: bool, error: Option<&Error>) {
		let listener = &self.listener;
		if catch_unwind(AssertUnwindSafe(|| listener.after_process(entry, success, error))).is_err() {
			log::error!("consumer {}: afterProcess listener panicked", self.consumer_id);
		}
	}

	fn notify_batch_complete(&self, records: &[Record], success: bool) {
		let entries = flatten_entries(records);
		let listener = &self.listener;
		if catch_unwind(AssertUnwindSafe(|| listener.on_batch_complete(&entries, success))).is_err() {
			log::error!("consumer {}: onBatchComplete listener panicked", self.consumer_id);
		}
	}
}

fn flatten_entries(records: &[Record]) -> Vec<LogEntry> {
	let mut entries = Vec::new();
	for record in records {
		match record {
			Record::Entry(entry) => entries.push(entry.clone()),
			Record::Batch(batch) => entries.extend(batch.entries().iter().cloned()),
		}
	}
	entries
}

/// Binds a `Value` by its natural sqlx type. NULL has no precise typed
/// setter in a closed value enum, so it's bound as an untyped `Option`,
/// leaning on Postgres inferring the parameter type from context — the
/// same "last-resort coercion" spirit as a textual fallback.
fn bind_value<'q>(
	query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
	value: &'q crate::entry::Value,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
	use crate::entry::Value;
	match value {
		Value::I32(v) => query.bind(*v),
		Value::I64(v) => query.bind(*v),
		Value::F64(v) => query.bind(*v),
		Value::Bool(v) => query.bind(*v),
		Value::Str(v) => query.bind(v.as_str()),
		Value::Decimal(v) => query.bind(*v),
		Value::Null => query.bind(Option::<String>::None),
	}
}

fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
