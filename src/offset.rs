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

//! Per-consumer offset, stored in the target database so that advancing it
//! can be bound into the same transaction that applies the batch's data.
//!
//! `last_processed` is stored as epoch-milliseconds (the same representation
//! `LogEntry::timestamp` uses) rather than a SQL timestamp type, so this
//! module has no dependency on `chrono`'s optional database type mapping.

use sqlx::{postgres::PgConnection, Executor};

use crate::{entry::LogIndex, error::Result};

/// Idempotent DDL creating the offset table if it doesn't already exist.
pub async fn ensure_table(conn: &mut PgConnection, table: &str) -> Result<()> {
	let ddl = format!(
		"CREATE TABLE IF NOT EXISTS {} (
			consumer_id TEXT PRIMARY KEY,
			last_offset BIGINT NOT NULL,
			last_processed BIGINT NOT NULL
		)",
		table
	);
	conn.execute(ddl.as_str()).await?;
	Ok(())
}

/// The last committed offset for `consumer_id`, or `None` if it has never
/// committed.
pub async fn get(conn: &mut PgConnection, table: &str, consumer_id: &str) -> Result<Option<LogIndex>> {
	let query = format!("SELECT last_offset FROM {} WHERE consumer_id = $1", table);
	let row: Option<(i64,)> = sqlx::query_as(&query).bind(consumer_id).fetch_optional(conn).await?;
	Ok(row.map(|(offset,)| offset as LogIndex))
}

/// Creates or advances the offset row for `consumer_id`. Callers execute
/// this against the same transaction that applies the batch's entries, so
/// the two commit atomically.
pub async fn upsert(conn: &mut PgConnection, table: &str, consumer_id: &str, index: LogIndex, processed_at_ms: i64) -> Result<()> {
	let query = format!(
		"INSERT INTO {table} (consumer_id, last_offset, last_processed) VALUES ($1, $2, $3)
		 ON CONFLICT (consumer_id) DO UPDATE SET last_offset = EXCLUDED.last_offset, last_processed = EXCLUDED.last_processed",
		table = table
	);
	sqlx::query(&query).bind(consumer_id).bind(index as i64).bind(processed_at_ms).execute(conn).await?;
	Ok(())
}
