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

//! Per-consumer read cursor over a [`super::LogStore`]'s segments.

use std::{
	fs::File,
	io::{Read, Seek, SeekFrom},
	path::PathBuf,
};

use crate::{
	codec::{self, Record},
	entry::LogIndex,
	error::{Error, Result},
};

use super::segment;

/// Outcome of one [`Tailer::read`] call.
pub enum ReadOutcome {
	Record(LogIndex, Record),
	/// No new data yet. Not fatal; the caller may retry later.
	End,
}

/// Holds its own read-only file handle per segment and a
/// `(segment, byte offset, next index)` cursor. Not shared across threads —
/// each consumer owns exactly one.
pub struct Tailer {
	dir: PathBuf,
	segments: Vec<(LogIndex, PathBuf)>,
	seg_pos: usize,
	file: Option<File>,
	byte_offset: u64,
	next_index: LogIndex,
	current_index: Option<LogIndex>,
}

impl Tailer {
	pub(crate) fn new(dir: PathBuf, start_index: LogIndex) -> Result<Self> {
		let segments = segment::scan_segments(&dir)?;
		let mut tailer = Self { dir, segments, seg_pos: 0, file: None, byte_offset: 0, next_index: 0, current_index: None };
		tailer.seek(start_index)?;
		Ok(tailer)
	}

	/// The index of the last successfully read record. `None` before any
	/// read has happened since construction or the last `seek`.
	pub fn current_index(&self) -> Option<LogIndex> {
		self.current_index
	}

	/// Repositions to an explicit index. Scans segment start-indices to find
	/// the owning segment, then scans frame headers from that segment's
	/// start to find the target's byte offset — there is no secondary index,
	/// but segments are few enough relative to records that this is cheap
	/// compared to the record count itself.
	pub fn seek(&mut self, index: LogIndex) -> Result<()> {
		self.refresh_segments()?;

		let seg_pos = self.segments.iter().rposition(|(first, _)| *first <= index).unwrap_or(0);
		if self.segments.is_empty() {
			self.file = None;
			self.byte_offset = 0;
			self.next_index = 0;
			self.current_index = None;
			return Ok(());
		}

		let (first_index, path) = self.segments[seg_pos].clone();
		let mut file = File::open(&path)?;
		let mut byte_offset = 0u64;
		let mut cur = first_index;
		while cur < index {
			file.seek(SeekFrom::Start(byte_offset))?;
			let mut len_buf = [0u8; 4];
			if file.read_exact(&mut len_buf).is_err() {
				break;
			}
			let payload_len = u32::from_le_bytes(len_buf) as u64;
			byte_offset += 4 + payload_len + 4;
			cur += 1;
		}

		self.seg_pos = seg_pos;
		self.file = Some(file);
		self.byte_offset = byte_offset;
		self.next_index = cur;
		self.current_index = None;
		Ok(())
	}

	/// Reads the next record. `Ok(ReadOutcome::End)` means no new data is
	/// available yet; `Err(Error::Corrupt(index))` means the record at the
	/// current position failed to decode or verify and the cursor is left
	/// in place so the caller can `seek` past it.
	pub fn read(&mut self) -> Result<ReadOutcome> {
		loop {
			if self.file.is_none() {
				if self.seg_pos >= self.segments.len() {
					self.refresh_segments()?;
					if self.seg_pos >= self.segments.len() {
						return Ok(ReadOutcome::End);
					}
				}
				let path = self.segments[self.seg_pos].1.clone();
				self.file = Some(File::open(&path)?);
				self.byte_offset = 0;
			}

			let is_last_segment = self.seg_pos + 1 >= self.segments.len();
			let file = self.file.as_mut().expect("just ensured Some");

			file.seek(SeekFrom::Start(self.byte_offset))?;
			let mut len_buf = [0u8; 4];
			if file.read_exact(&mut len_buf).is_err() {
				if is_last_segment {
					self.refresh_segments()?;
					if self.segments.len() > self.seg_pos + 1 {
						self.seg_pos += 1;
						self.file = None;
						continue;
					}
					return Ok(ReadOutcome::End);
				}
				self.seg_pos += 1;
				self.file = None;
				continue;
			}

			let payload_len = u32::from_le_bytes(len_buf) as usize;
			let mut payload = vec![0u8; payload_len];
			let mut crc_buf = [0u8; 4];
			let have_full_frame = file.read_exact(&mut payload).is_ok() && file.read_exact(&mut crc_buf).is_ok();

			if !have_full_frame {
				if is_last_segment {
					// Interrupted write in progress; nothing new to report yet.
					return Ok(ReadOutcome::End);
				}
				return Err(Error::Corrupt(self.next_index));
			}

			let expected_crc = u32::from_le_bytes(crc_buf);
			if crc32c::crc32c(&payload) != expected_crc {
				return Err(Error::Corrupt(self.next_index));
			}

			let record = match codec::decode(&payload) {
				Ok(record) => record,
				Err(_) => return Err(Error::Corrupt(self.next_index)),
			};

			let index = self.next_index;
			self.byte_offset += 4 + payload_len as u64 + 4;
			self.next_index += 1;
			self.current_index = Some(index);
			return Ok(ReadOutcome::Record(index, record));
		}
	}

	fn refresh_segments(&mut self) -> Result<()> {
		let fresh = segment::scan_segments(&self.dir)?;
		if fresh.len() > self.segments.len() {
			self.segments = fresh;
		}
		Ok(())
	}
}
