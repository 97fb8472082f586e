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

//! Binary encoding of [`LogEntry`]/[`LogBatch`] payloads.
//!
//! This module owns the payload grammar only — the schema tag, field
//! layout, and type tags. Record framing (length prefix, crc32c trailer)
//! is the log store's concern; see `logstore::segment`.

use std::{convert::TryInto, str::FromStr};

use indexmap::IndexMap;
use rust_decimal::Decimal;

use crate::{
	entry::{LogBatch, LogBatchBuilder, LogEntry, LogEntryBuilder, Op, Value},
	error::{Error, Result},
};

const TAG_ENTRY: u8 = 1;
const TAG_BATCH: u8 = 2;

const OP_INSERT: u8 = 0;
const OP_UPDATE: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_UPSERT: u8 = 3;
const OP_BATCH_MARKER: u8 = 4;

const VAL_I32: u8 = 0;
const VAL_I64: u8 = 1;
const VAL_F64: u8 = 2;
const VAL_BOOL: u8 = 3;
const VAL_STR: u8 = 4;
const VAL_DECIMAL: u8 = 5;
const VAL_NULL: u8 = 6;

/// Either a single mutation or an atomic group, as read off the log.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
	Entry(LogEntry),
	Batch(LogBatch),
}

/// Encodes a record into its wire payload (framing is applied by the log
/// store, not here).
pub fn encode(record: &Record) -> Vec<u8> {
	let mut out = Vec::new();
	match record {
		Record::Entry(entry) => encode_entry(entry, &mut out),
		Record::Batch(batch) => encode_batch(batch, &mut out),
	}
	out
}

/// Decodes a payload previously produced by [`encode`]. Any structural
/// problem — unknown tag, truncated field, unparseable decimal — is
/// reported as [`Error::Decode`], never a panic.
pub fn decode(bytes: &[u8]) -> Result<Record> {
	let mut cursor = Cursor::new(bytes);
	let tag = cursor.read_u8()?;
	match tag {
		TAG_ENTRY => Ok(Record::Entry(decode_entry_body(&mut cursor)?)),
		TAG_BATCH => Ok(Record::Batch(decode_batch_body(&mut cursor)?)),
		other => Err(Error::Decode(format!("unknown schema tag {}", other))),
	}
}

fn encode_entry(entry: &LogEntry, out: &mut Vec<u8>) {
	out.push(TAG_ENTRY);
	encode_entry_body(entry, out);
}

fn encode_entry_body(entry: &LogEntry, out: &mut Vec<u8>) {
	write_string(out, entry.db());
	write_string(out, entry.table());
	out.push(op_to_tag(entry.op()));
	write_string(out, entry.tx_id().unwrap_or(""));
	out.extend_from_slice(&entry.timestamp().to_le_bytes());
	out.extend_from_slice(&(entry.data().len() as u32).to_le_bytes());
	for (name, value) in entry.data() {
		write_string(out, name);
		write_value(out, value);
	}
}

fn encode_batch(batch: &LogBatch, out: &mut Vec<u8>) {
	out.push(TAG_BATCH);
	write_string(out, batch.tx_id());
	out.extend_from_slice(&batch.timestamp().to_le_bytes());
	out.extend_from_slice(&(batch.entries().len() as u32).to_le_bytes());
	for entry in batch.entries() {
		encode_entry(entry, out);
	}
}

fn decode_entry_body(cursor: &mut Cursor) -> Result<LogEntry> {
	let db = cursor.read_string()?;
	let table = cursor.read_string()?;
	let op = tag_to_op(cursor.read_u8()?)?;
	let tx_id = cursor.read_string()?;
	let timestamp = cursor.read_i64()?;
	let count = cursor.read_u32()? as usize;

	let mut data = IndexMap::with_capacity(count);
	for _ in 0..count {
		let name = cursor.read_string()?;
		let value = read_value(cursor)?;
		data.insert(name, value);
	}

	let mut builder = LogEntryBuilder::new(db, table, op);
	for (name, value) in data {
		builder = builder.put(name, value);
	}
	let mut entry = builder.build()?;
	if !tx_id.is_empty() {
		entry.set_tx_id_for_decode(tx_id);
	}
	entry.set_timestamp_for_decode(timestamp);
	Ok(entry)
}

fn decode_batch_body(cursor: &mut Cursor) -> Result<LogBatch> {
	let tx_id = cursor.read_string()?;
	let timestamp = cursor.read_i64()?;
	let count = cursor.read_u32()? as usize;

	let mut builder = LogBatchBuilder::new().tx_id(tx_id);
	for _ in 0..count {
		let tag = cursor.read_u8()?;
		if tag != TAG_ENTRY {
			return Err(Error::Decode(format!("expected entry tag inside batch, got {}", tag)));
		}
		builder = builder.add_entry(decode_entry_body(cursor)?);
	}
	let mut batch = builder.build()?;
	batch.set_timestamp_for_decode(timestamp);
	Ok(batch)
}

fn op_to_tag(op: Op) -> u8 {
	match op {
		Op::Insert => OP_INSERT,
		Op::Update => OP_UPDATE,
		Op::Delete => OP_DELETE,
		Op::Upsert => OP_UPSERT,
		Op::BatchMarker => OP_BATCH_MARKER,
	}
}

fn tag_to_op(tag: u8) -> Result<Op> {
	match tag {
		OP_INSERT => Ok(Op::Insert),
		OP_UPDATE => Ok(Op::Update),
		OP_DELETE => Ok(Op::Delete),
		OP_UPSERT => Ok(Op::Upsert),
		OP_BATCH_MARKER => Ok(Op::BatchMarker),
		other => Err(Error::Decode(format!("unknown op tag {}", other))),
	}
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
	match value {
		Value::I32(v) => {
			out.push(VAL_I32);
			out.extend_from_slice(&v.to_le_bytes());
		}
		Value::I64(v) => {
			out.push(VAL_I64);
			out.extend_from_slice(&v.to_le_bytes());
		}
		Value::F64(v) => {
			out.push(VAL_F64);
			out.extend_from_slice(&v.to_le_bytes());
		}
		Value::Bool(v) => {
			out.push(VAL_BOOL);
			out.push(if *v { 1 } else { 0 });
		}
		Value::Str(v) => {
			out.push(VAL_STR);
			write_string(out, v);
		}
		Value::Decimal(v) => {
			out.push(VAL_DECIMAL);
			write_string(out, &v.to_string());
		}
		Value::Null => out.push(VAL_NULL),
	}
}

fn read_value(cursor: &mut Cursor) -> Result<Value> {
	let tag = cursor.read_u8()?;
	Ok(match tag {
		VAL_I32 => Value::I32(cursor.read_i32()?),
		VAL_I64 => Value::I64(cursor.read_i64()?),
		VAL_F64 => Value::F64(cursor.read_f64()?),
		VAL_BOOL => Value::Bool(cursor.read_u8()? != 0),
		VAL_STR => Value::Str(cursor.read_string()?),
		VAL_DECIMAL => {
			let s = cursor.read_string()?;
			Decimal::from_str(&s).map_err(|e| Error::Decode(format!("invalid decimal {:?}: {}", s, e)))?.into()
		}
		VAL_NULL => Value::Null,
		other => return Err(Error::Decode(format!("unknown value tag {}", other))),
	})
}

fn write_string(out: &mut Vec<u8>, s: &str) {
	out.extend_from_slice(&(s.len() as u32).to_le_bytes());
	out.extend_from_slice(s.as_bytes());
}

/// A forward-only byte reader raising [`Error::Decode`] on truncation,
/// rather than panicking, so a short/garbled record surfaces as corruption
/// instead of taking the process down with it.
struct Cursor<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Cursor<'a> {
	fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8]> {
		if self.pos + n > self.bytes.len() {
			return Err(Error::Decode("truncated payload".into()));
		}
		let slice = &self.bytes[self.pos..self.pos + n];
		self.pos += n;
		Ok(slice)
	}

	fn read_u8(&mut self) -> Result<u8> {
		Ok(self.take(1)?[0])
	}

	fn read_u32(&mut self) -> Result<u32> {
		Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
	}

	fn read_i32(&mut self) -> Result<i32> {
		Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
	}

	fn read_i64(&mut self) -> Result<i64> {
		Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
	}

	fn read_f64(&mut self) -> Result<f64> {
		Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
	}

	fn read_string(&mut self) -> Result<String> {
		let len = self.read_u32()? as usize;
		let bytes = self.take(len)?;
		String::from_utf8(bytes.to_vec()).map_err(|e| Error::Decode(format!("invalid utf8: {}", e)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::LogEntryBuilder;

	fn sample_entry() -> LogEntry {
		LogEntryBuilder::new("admin", "accounts", Op::Update)
			.put("where_id", 7i64)
			.put("balance", Decimal::new(1050, 2))
			.put("active", true)
			.put("nickname", Value::Null)
			.put("note", "hi")
			.build()
			.unwrap()
	}

	#[test]
	fn entry_round_trips() {
		let entry = sample_entry();
		let bytes = encode(&Record::Entry(entry.clone()));
		match decode(&bytes).unwrap() {
			Record::Entry(decoded) => assert_eq!(decoded, entry),
			Record::Batch(_) => panic!("expected entry"),
		}
	}

	#[test]
	fn batch_round_trips_and_shares_tx_id() {
		let batch = LogBatchBuilder::new()
			.add_entry(sample_entry())
			.add_entry(LogEntryBuilder::new("admin", "ledger", Op::Insert).put("amount", 100i64).build().unwrap())
			.build()
			.unwrap();
		let bytes = encode(&Record::Batch(batch.clone()));
		match decode(&bytes).unwrap() {
			Record::Batch(decoded) => assert_eq!(decoded, batch),
			Record::Entry(_) => panic!("expected batch"),
		}
	}

	#[test]
	fn unknown_schema_tag_is_decode_error() {
		let bytes = vec![0xffu8];
		assert!(matches!(decode(&bytes), Err(Error::Decode(_))));
	}

	#[test]
	fn truncated_payload_is_decode_error() {
		let entry = sample_entry();
		let mut bytes = encode(&Record::Entry(entry));
		bytes.truncate(bytes.len() - 3);
		assert!(matches!(decode(&bytes), Err(Error::Decode(_))));
	}
}
