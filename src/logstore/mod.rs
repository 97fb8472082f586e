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

//! Append-only, segmented, crash-safe log store.

pub mod segment;
pub mod tailer;

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

pub use tailer::{ReadOutcome, Tailer};

use crate::{
	codec::Record,
	entry::LogIndex,
	error::Result,
	util::create_dir,
};
use segment::Segment;

struct Inner {
	active: Segment,
	next_index: LogIndex,
}

/// Owns the on-disk segment files rooted at `dir`. `append` is the only
/// mutating entry point and serialises concurrent producers behind a single
/// `parking_lot::Mutex` — the same "one writer, briefly held lock" idiom the
/// batch accumulator in the ancestor of this module used for its shared
/// buffer.
pub struct LogStore {
	dir: PathBuf,
	block_size: u64,
	inner: Mutex<Inner>,
}

impl LogStore {
	/// Opens (creating if necessary) a log store rooted at `dir`. A segment
	/// rolls to a new file once its size exceeds `block_size`, never
	/// splitting a record across the boundary.
	pub fn open(dir: impl AsRef<Path>, block_size: u64) -> Result<Self> {
		let dir = dir.as_ref().to_path_buf();
		create_dir(&dir)?;

		let segments = segment::scan_segments(&dir)?;
		let (active, next_index) = match segments.last() {
			Some((first_index, path)) => {
				let (segment, count) = Segment::open_existing(*first_index, path.clone())?;
				(segment, first_index + count)
			}
			None => (Segment::create(&dir, 0)?, 0),
		};

		Ok(Self { dir, block_size, inner: Mutex::new(Inner { active, next_index }) })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Durably appends `record`, returning its assigned index. Safe to call
	/// concurrently from multiple producers; each returned index is unique
	/// and strictly greater than every index returned before this call
	/// completed.
	pub fn append(&self, record: &Record) -> Result<LogIndex> {
		let payload = crate::codec::encode(record);
		let mut inner = self.inner.lock();

		let index = inner.next_index;
		inner.active.append_record(&payload)?;
		inner.next_index += 1;

		if inner.active.size() >= self.block_size {
			let new_first = inner.next_index;
			inner.active = Segment::create(&self.dir, new_first)?;
		}

		Ok(index)
	}

	/// Opens a tailer positioned at `start_index` (default: the beginning).
	pub fn open_tailer(&self, start_index: Option<LogIndex>) -> Result<Tailer> {
		Tailer::new(self.dir.clone(), start_index.unwrap_or(0))
	}

	/// The index that would be assigned to the next appended record, i.e.
	/// one past the last written index. Used by the supervisor's `stats()`.
	pub fn next_index(&self) -> LogIndex {
		self.inner.lock().next_index
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		codec::Record,
		entry::{LogEntryBuilder, Op},
	};

	fn sample(n: i32) -> Record {
		Record::Entry(LogEntryBuilder::new("admin", "t", Op::Insert).put("n", n).build().unwrap())
	}

	#[test]
	fn append_assigns_monotonic_indices() {
		let dir = tempfile::tempdir().unwrap();
		let store = LogStore::open(dir.path(), 1024 * 1024).unwrap();
		assert_eq!(store.append(&sample(1)).unwrap(), 0);
		assert_eq!(store.append(&sample(2)).unwrap(), 1);
		assert_eq!(store.append(&sample(3)).unwrap(), 2);
		assert_eq!(store.next_index(), 3);
	}

	#[test]
	fn tailer_reads_back_what_was_appended() {
		let dir = tempfile::tempdir().unwrap();
		let store = LogStore::open(dir.path(), 1024 * 1024).unwrap();
		for n in 0..5 {
			store.append(&sample(n)).unwrap();
		}

		let mut tailer = store.open_tailer(None).unwrap();
		for expected in 0..5 {
			match tailer.read().unwrap() {
				ReadOutcome::Record(index, Record::Entry(entry)) => {
					assert_eq!(index, expected as u64);
					assert_eq!(entry.data().get("n"), Some(&crate::entry::Value::I32(expected)));
				}
				other => panic!("unexpected outcome at {}: {}", expected, matches!(other, ReadOutcome::End)),
			}
		}
		assert!(matches!(tailer.read().unwrap(), ReadOutcome::End));
		assert_eq!(tailer.current_index(), Some(4));
	}

	#[test]
	fn rollover_creates_new_segment_without_splitting_records() {
		let dir = tempfile::tempdir().unwrap();
		// A tiny block size forces a rollover after the very first append.
		let store = LogStore::open(dir.path(), 1).unwrap();
		for n in 0..3 {
			store.append(&sample(n)).unwrap();
		}

		let segments = segment::scan_segments(dir.path()).unwrap();
		assert!(segments.len() >= 2, "expected rollover to have produced multiple segments");

		let mut tailer = store.open_tailer(None).unwrap();
		for expected in 0..3i32 {
			match tailer.read().unwrap() {
				ReadOutcome::Record(index, _) => assert_eq!(index, expected as u64),
				ReadOutcome::End => panic!("expected record at {}", expected),
			}
		}
	}

	#[test]
	fn reopening_an_existing_store_resumes_indices() {
		let dir = tempfile::tempdir().unwrap();
		{
			let store = LogStore::open(dir.path(), 1024 * 1024).unwrap();
			store.append(&sample(1)).unwrap();
			store.append(&sample(2)).unwrap();
		}
		let store = LogStore::open(dir.path(), 1024 * 1024).unwrap();
		assert_eq!(store.next_index(), 2);
		assert_eq!(store.append(&sample(3)).unwrap(), 2);
	}

	#[test]
	fn seek_repositions_mid_log() {
		let dir = tempfile::tempdir().unwrap();
		let store = LogStore::open(dir.path(), 1024 * 1024).unwrap();
		for n in 0..5 {
			store.append(&sample(n)).unwrap();
		}
		let mut tailer = store.open_tailer(None).unwrap();
		tailer.seek(3).unwrap();
		match tailer.read().unwrap() {
			ReadOutcome::Record(index, _) => assert_eq!(index, 3),
			ReadOutcome::End => panic!("expected record at 3"),
		}
	}
}
