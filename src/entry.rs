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

//! The log entry model: typed values, single mutations and the atomic
//! batches that group them.

use std::{
	collections::HashSet,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use indexmap::IndexMap;
use rust_decimal::Decimal;

use crate::error::{Error, Result};

/// Position of a record in a log store, counted from zero.
pub type LogIndex = u64;

/// The kind of mutation a [`LogEntry`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
	Insert,
	Update,
	Delete,
	Upsert,
	/// Carries no column data; marks a position in the log without an
	/// associated SQL statement (used by adaptors that need a synchronization
	/// point without writing a row).
	BatchMarker,
}

/// A single typed value held in a [`LogEntry`]'s data map.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	I32(i32),
	I64(i64),
	F64(f64),
	Bool(bool),
	Str(String),
	/// Arbitrary-precision decimal; scale is preserved through encode/decode.
	Decimal(Decimal),
	Null,
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::I32(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::I64(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::F64(v)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Str(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Str(v.to_string())
	}
}

impl From<Decimal> for Value {
	fn from(v: Decimal) -> Self {
		Value::Decimal(v)
	}
}

impl<T> From<Option<T>> for Value
where
	Value: From<T>,
{
	fn from(v: Option<T>) -> Self {
		match v {
			Some(v) => Value::from(v),
			None => Value::Null,
		}
	}
}

/// `where_`-prefixed keys mark the predicate half of an UPDATE/DELETE;
/// `_`-prefixed keys are carried through the log but never bound into SQL.
pub(crate) const WHERE_PREFIX: &str = "where_";
pub(crate) const INTERNAL_PREFIX: &str = "_";

fn is_where_key(key: &str) -> bool {
	key.starts_with(WHERE_PREFIX)
}

fn is_internal_key(key: &str) -> bool {
	key.starts_with(INTERNAL_PREFIX) && !is_where_key(key)
}

/// One logical mutation against a single table in a single logical database.
///
/// Immutable once built. `data` preserves insertion order, which the codec
/// relies on for a deterministic wire encoding.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
	db: String,
	table: String,
	op: Op,
	data: IndexMap<String, Value>,
	tx_id: Option<String>,
	timestamp: i64,
}

impl LogEntry {
	pub fn db(&self) -> &str {
		&self.db
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn op(&self) -> Op {
		self.op
	}

	pub fn data(&self) -> &IndexMap<String, Value> {
		&self.data
	}

	pub fn tx_id(&self) -> Option<&str> {
		self.tx_id.as_deref()
	}

	pub fn timestamp(&self) -> i64 {
		self.timestamp
	}

	/// The fully-qualified table reference used by the synthesiser:
	/// `"{db}.{table}"`. The core presumes `db`/`table` are safe identifiers,
	/// not user input; quoting per dialect is left to the adaptor.
	pub fn qualified_table(&self) -> String {
		format!("{}.{}", self.db, self.table)
	}

	/// Column/value pairs bound for INSERT/UPDATE/UPSERT: every key that is
	/// neither `where_`- nor `_`-prefixed, in insertion order.
	pub fn set_columns(&self) -> Vec<(&str, &Value)> {
		self.data.iter().filter(|(k, _)| !is_where_key(k) && !is_internal_key(k)).map(|(k, v)| (k.as_str(), v)).collect()
	}

	/// Predicate column/value pairs for UPDATE/DELETE, with the `where_`
	/// prefix stripped, in insertion order.
	pub fn where_columns(&self) -> Vec<(&str, &Value)> {
		self.data
			.iter()
			.filter(|(k, _)| is_where_key(k))
			.map(|(k, v)| (&k[WHERE_PREFIX.len()..], v))
			.collect()
	}

	fn set_tx_id(&mut self, tx_id: String) {
		self.tx_id = Some(tx_id);
	}

	/// Restores the `tx_id` read off the wire. Bypasses batch-builder
	/// stamping, which is only meaningful at construction time.
	pub(crate) fn set_tx_id_for_decode(&mut self, tx_id: String) {
		self.tx_id = Some(tx_id);
	}

	/// Restores the `timestamp` read off the wire, overriding the
	/// construction-time stamp `build()` assigns.
	pub(crate) fn set_timestamp_for_decode(&mut self, timestamp: i64) {
		self.timestamp = timestamp;
	}
}

/// Fluent constructor for a [`LogEntry`].
pub struct LogEntryBuilder {
	db: String,
	table: String,
	op: Op,
	data: IndexMap<String, Value>,
}

impl LogEntryBuilder {
	pub fn new(db: impl Into<String>, table: impl Into<String>, op: Op) -> Self {
		Self { db: db.into(), table: table.into(), op, data: IndexMap::new() }
	}

	pub fn put(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.data.insert(key.into(), value.into());
		self
	}

	/// Freezes the entry. Fails only on the structural invariants that don't
	/// depend on `op` (non-empty `db`/`table`); the op-specific WHERE/SET
	/// non-emptiness invariants are enforced by the synthesiser, which is
	/// where they're actually actionable.
	pub fn build(self) -> Result<LogEntry> {
		if self.db.is_empty() {
			return Err(Error::Malformed("db must not be empty".into()));
		}
		if self.table.is_empty() {
			return Err(Error::Malformed("table must not be empty".into()));
		}
		Ok(LogEntry { db: self.db, table: self.table, op: self.op, data: self.data, tx_id: None, timestamp: now_millis() })
	}
}

/// An atomic group of entries sharing a transaction id.
#[derive(Clone, Debug, PartialEq)]
pub struct LogBatch {
	tx_id: String,
	timestamp: i64,
	entries: Vec<LogEntry>,
	db_names: HashSet<String>,
}

impl LogBatch {
	pub fn tx_id(&self) -> &str {
		&self.tx_id
	}

	pub fn timestamp(&self) -> i64 {
		self.timestamp
	}

	pub fn entries(&self) -> &[LogEntry] {
		&self.entries
	}

	pub fn db_names(&self) -> &HashSet<String> {
		&self.db_names
	}

	/// Restores the `timestamp` read off the wire, overriding the
	/// construction-time stamp `build()` assigns.
	pub(crate) fn set_timestamp_for_decode(&mut self, timestamp: i64) {
		self.timestamp = timestamp;
	}
}

/// Fluent constructor for a [`LogBatch`].
pub struct LogBatchBuilder {
	tx_id: Option<String>,
	entries: Vec<LogEntry>,
}

impl LogBatchBuilder {
	pub fn new() -> Self {
		Self { tx_id: None, entries: Vec::new() }
	}

	/// Sets an explicit transaction id. If never called, `build()` generates
	/// a fresh unique one.
	pub fn tx_id(mut self, tx_id: impl Into<String>) -> Self {
		self.tx_id = Some(tx_id.into());
		self
	}

	pub fn add_entry(mut self, entry: LogEntry) -> Self {
		self.entries.push(entry);
		self
	}

	/// Freezes the batch. Stamps `tx_id` onto every entry it holds. Fails if
	/// no entries were added — a batch is meaningless empty.
	pub fn build(self) -> Result<LogBatch> {
		if self.entries.is_empty() {
			return Err(Error::Malformed("batch must contain at least one entry".into()));
		}
		let tx_id = self.tx_id.unwrap_or_else(generate_tx_id);
		let mut entries = self.entries;
		for entry in &mut entries {
			entry.set_tx_id(tx_id.clone());
		}
		let db_names = entries.iter().map(|e| e.db().to_string()).collect();
		Ok(LogBatch { tx_id, timestamp: now_millis(), entries, db_names })
	}
}

impl Default for LogBatchBuilder {
	fn default() -> Self {
		Self::new()
	}
}

static TX_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_tx_id() -> String {
	let n = TX_COUNTER.fetch_add(1, Ordering::Relaxed);
	format!("tx-{}-{}", now_millis(), n)
}

fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_rejects_empty_db_or_table() {
		assert!(LogEntryBuilder::new("", "t", Op::Insert).build().is_err());
		assert!(LogEntryBuilder::new("d", "", Op::Insert).build().is_err());
		assert!(LogEntryBuilder::new("d", "t", Op::Insert).build().is_ok());
	}

	#[test]
	fn set_and_where_columns_split_by_prefix() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Update)
			.put("where_id", 7i64)
			.put("balance", Decimal::new(1050, 2))
			.put("_trace", "abc")
			.build()
			.unwrap();

		let set = entry.set_columns();
		assert_eq!(set, vec![("balance", &Value::Decimal(Decimal::new(1050, 2)))]);

		let predicate = entry.where_columns();
		assert_eq!(predicate, vec![("id", &Value::I64(7))]);
	}

	#[test]
	fn batch_build_stamps_tx_id_on_every_entry() {
		let e1 = LogEntryBuilder::new("admin", "a", Op::Insert).put("x", 1i32).build().unwrap();
		let e2 = LogEntryBuilder::new("admin", "b", Op::Insert).put("y", 2i32).build().unwrap();
		let batch = LogBatchBuilder::new().tx_id("tx-fixed").add_entry(e1).add_entry(e2).build().unwrap();

		assert!(batch.entries().iter().all(|e| e.tx_id() == Some("tx-fixed")));
		assert_eq!(batch.db_names().len(), 1);
	}

	#[test]
	fn batch_build_rejects_empty() {
		assert!(LogBatchBuilder::new().build().is_err());
	}

	#[test]
	fn batch_build_generates_unique_tx_id_when_unset() {
		let e1 = LogEntryBuilder::new("admin", "a", Op::Insert).build().unwrap();
		let b1 = LogBatchBuilder::new().add_entry(e1).build().unwrap();

		let e2 = LogEntryBuilder::new("admin", "a", Op::Insert).build().unwrap();
		let b2 = LogBatchBuilder::new().add_entry(e2).build().unwrap();

		assert_ne!(b1.tx_id(), b2.tx_id());
	}
}
