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

//! Configuration surface, with the defaults enumerated in the external
//! interfaces section.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_QUEUE_PATH: &str = "./chronicle-queue";
const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
const DEFAULT_OFFSET_DB: &str = "admin";
const DEFAULT_OFFSET_TABLE: &str = "consumer_offsets";
const DEFAULT_CONSUMER_COUNT: usize = 1;
const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	/// Log directory.
	#[serde(default = "default_queue_path")]
	pub queue_path: PathBuf,
	/// Segment block size hint, in bytes.
	#[serde(default = "default_block_size")]
	pub block_size: u64,
	/// Logical database the offset table lives in. Informational only —
	/// the core connects through whatever `PgPool` the caller supplies;
	/// this field documents which database that pool is expected to point
	/// at.
	#[serde(default = "default_offset_db")]
	pub offset_db: String,
	#[serde(default = "default_offset_table")]
	pub offset_table: String,
	#[serde(default = "default_consumer_count")]
	pub consumer_count: usize,
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	/// Record-level compression toggle. Off by default; no compression
	/// codec ships with this core (see DESIGN.md).
	#[serde(default)]
	pub compression: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			queue_path: default_queue_path(),
			block_size: default_block_size(),
			offset_db: default_offset_db(),
			offset_table: default_offset_table(),
			consumer_count: default_consumer_count(),
			batch_size: default_batch_size(),
			compression: false,
		}
	}
}

fn default_queue_path() -> PathBuf {
	PathBuf::from(DEFAULT_QUEUE_PATH)
}

const fn default_block_size() -> u64 {
	DEFAULT_BLOCK_SIZE
}

fn default_offset_db() -> String {
	DEFAULT_OFFSET_DB.to_string()
}

fn default_offset_table() -> String {
	DEFAULT_OFFSET_TABLE.to_string()
}

const fn default_consumer_count() -> usize {
	DEFAULT_CONSUMER_COUNT
}

const fn default_batch_size() -> usize {
	DEFAULT_BATCH_SIZE
}

/// Fluent builder for [`Config`].
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
	config: Config,
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self { config: Config::default() }
	}

	pub fn queue_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.config.queue_path = path.into();
		self
	}

	pub fn block_size(mut self, bytes: u64) -> Self {
		self.config.block_size = bytes;
		self
	}

	pub fn offset_db(mut self, db: impl Into<String>) -> Self {
		self.config.offset_db = db.into();
		self
	}

	pub fn offset_table(mut self, table: impl Into<String>) -> Self {
		self.config.offset_table = table.into();
		self
	}

	pub fn consumer_count(mut self, count: usize) -> Self {
		self.config.consumer_count = count;
		self
	}

	pub fn batch_size(mut self, size: usize) -> Self {
		self.config.batch_size = size;
		self
	}

	pub fn compression(mut self, on: bool) -> Self {
		self.config.compression = on;
		self
	}

	pub fn build(self) -> Config {
		self.config
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_documented_values() {
		let config = Config::default();
		assert_eq!(config.queue_path, PathBuf::from("./chronicle-queue"));
		assert_eq!(config.block_size, 64 * 1024 * 1024);
		assert_eq!(config.offset_db, "admin");
		assert_eq!(config.offset_table, "consumer_offsets");
		assert_eq!(config.consumer_count, 1);
		assert_eq!(config.batch_size, 100);
		assert!(!config.compression);
	}

	#[test]
	fn builder_overrides_defaults() {
		let config = ConfigBuilder::new().batch_size(50).consumer_count(4).compression(true).build();
		assert_eq!(config.batch_size, 50);
		assert_eq!(config.consumer_count, 4);
		assert!(config.compression);
	}
}
