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

//! Maps a [`LogEntry`] to a parameterised statement. Pure and side-effect
//! free: no connection, no dialect assumptions beyond `?` placeholders.

use crate::{
	entry::{LogEntry, Op, Value},
	error::{Error, Result},
};

/// A `?`-placeholder statement plus its positional parameters, in bind
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
	pub text: String,
	pub params: Vec<Value>,
}

impl Statement {
	/// Rewrites `?` placeholders to PostgreSQL's `$1, $2, …` form. The only
	/// genuinely Postgres-shaped detail forced on the core by shipping a
	/// real driver; quoting and everything else about the text is untouched.
	pub fn for_postgres(&self) -> Statement {
		let mut text = String::with_capacity(self.text.len() + self.params.len() * 2);
		let mut n = 0usize;
		for ch in self.text.chars() {
			if ch == '?' {
				n += 1;
				text.push('$');
				text.push_str(&n.to_string());
			} else {
				text.push(ch);
			}
		}
		Statement { text, params: self.params.clone() }
	}
}

/// Synthesises the statement for `entry`. Returns `Ok(None)` for
/// `Op::BatchMarker`, which carries no column data and has no associated
/// SQL — the caller should treat it as a no-op.
pub fn synthesize(entry: &LogEntry) -> Result<Option<Statement>> {
	match entry.op() {
		Op::Insert => synthesize_insert(entry).map(Some),
		Op::Update => synthesize_update(entry).map(Some),
		Op::Delete => synthesize_delete(entry).map(Some),
		Op::Upsert => synthesize_upsert(entry).map(Some),
		Op::BatchMarker => Ok(None),
	}
}

fn synthesize_insert(entry: &LogEntry) -> Result<Statement> {
	let cols = entry.set_columns();
	if cols.is_empty() {
		return Err(Error::Malformed(format!("INSERT on {} has no columns", entry.qualified_table())));
	}

	let names: Vec<&str> = cols.iter().map(|(k, _)| *k).collect();
	let placeholders = vec!["?"; cols.len()].join(",");
	let text = format!("INSERT INTO {} ({}) VALUES ({})", entry.qualified_table(), names.join(","), placeholders);
	let params = cols.into_iter().map(|(_, v)| v.clone()).collect();
	Ok(Statement { text, params })
}

fn synthesize_update(entry: &LogEntry) -> Result<Statement> {
	let cols = entry.set_columns();
	let predicate = entry.where_columns();
	if cols.is_empty() {
		return Err(Error::Malformed(format!("UPDATE on {} has no SET columns", entry.qualified_table())));
	}
	if predicate.is_empty() {
		return Err(Error::Malformed(format!("UPDATE on {} has no WHERE predicate", entry.qualified_table())));
	}

	let set_clause = cols.iter().map(|(k, _)| format!("{}=?", k)).collect::<Vec<_>>().join(",");
	let where_clause = predicate.iter().map(|(k, _)| format!("{}=?", k)).collect::<Vec<_>>().join(" AND ");
	let text = format!("UPDATE {} SET {} WHERE {}", entry.qualified_table(), set_clause, where_clause);

	let mut params: Vec<Value> = cols.into_iter().map(|(_, v)| v.clone()).collect();
	params.extend(predicate.into_iter().map(|(_, v)| v.clone()));
	Ok(Statement { text, params })
}

fn synthesize_delete(entry: &LogEntry) -> Result<Statement> {
	let predicate = entry.where_columns();
	if predicate.is_empty() {
		return Err(Error::Malformed(format!("DELETE on {} has no WHERE predicate", entry.qualified_table())));
	}

	let where_clause = predicate.iter().map(|(k, _)| format!("{}=?", k)).collect::<Vec<_>>().join(" AND ");
	let text = format!("DELETE FROM {} WHERE {}", entry.qualified_table(), where_clause);
	let params = predicate.into_iter().map(|(_, v)| v.clone()).collect();
	Ok(Statement { text, params })
}

fn synthesize_upsert(entry: &LogEntry) -> Result<Statement> {
	let cols = entry.set_columns();
	if cols.is_empty() {
		return Err(Error::Malformed(format!("UPSERT on {} has no columns", entry.qualified_table())));
	}

	let names: Vec<&str> = cols.iter().map(|(k, _)| *k).collect();
	let placeholders = vec!["?"; cols.len()].join(",");

	// Primary-key heuristic: a column is excluded from the update list if it
	// is named exactly "id" or begins with "id_".
	let update_names: Vec<&str> = names.iter().copied().filter(|k| !is_primary_key_like(k)).collect();

	let mut text = format!("INSERT INTO {} ({}) VALUES ({})", entry.qualified_table(), names.join(","), placeholders);
	if !update_names.is_empty() {
		let update_clause = update_names.iter().map(|k| format!("{0}=VALUES({0})", k)).collect::<Vec<_>>().join(",");
		text.push_str(" ON DUPLICATE KEY UPDATE ");
		text.push_str(&update_clause);
	}

	let params = cols.into_iter().map(|(_, v)| v.clone()).collect();
	Ok(Statement { text, params })
}

fn is_primary_key_like(name: &str) -> bool {
	name == "id" || name.starts_with("id_")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::LogEntryBuilder;

	#[test]
	fn insert_lists_columns_in_insertion_order() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Insert).put("name", "alice").put("balance", 100i64).build().unwrap();
		let stmt = synthesize(&entry).unwrap().unwrap();
		assert_eq!(stmt.text, "INSERT INTO admin.accounts (name,balance) VALUES (?,?)");
		assert_eq!(stmt.params, vec![Value::Str("alice".into()), Value::I64(100)]);
	}

	#[test]
	fn insert_fails_malformed_on_empty_columns() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Insert).build().unwrap();
		assert!(matches!(synthesize(&entry), Err(Error::Malformed(_))));
	}

	#[test]
	fn update_orders_set_then_where_params() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Update)
			.put("balance", 50i64)
			.put("where_id", 7i64)
			.build()
			.unwrap();
		let stmt = synthesize(&entry).unwrap().unwrap();
		assert_eq!(stmt.text, "UPDATE admin.accounts SET balance=? WHERE id=?");
		assert_eq!(stmt.params, vec![Value::I64(50), Value::I64(7)]);
	}

	#[test]
	fn update_fails_malformed_on_empty_where() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Update).put("balance", 50i64).build().unwrap();
		assert!(matches!(synthesize(&entry), Err(Error::Malformed(_))));
	}

	#[test]
	fn update_fails_malformed_on_empty_set() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Update).put("where_id", 7i64).build().unwrap();
		assert!(matches!(synthesize(&entry), Err(Error::Malformed(_))));
	}

	#[test]
	fn delete_uses_where_only() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Delete).put("where_id", 7i64).build().unwrap();
		let stmt = synthesize(&entry).unwrap().unwrap();
		assert_eq!(stmt.text, "DELETE FROM admin.accounts WHERE id=?");
		assert_eq!(stmt.params, vec![Value::I64(7)]);
	}

	#[test]
	fn upsert_excludes_primary_key_like_columns_from_update_list() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Upsert)
			.put("id", 1i64)
			.put("id_tenant", 2i64)
			.put("balance", 10i64)
			.build()
			.unwrap();
		let stmt = synthesize(&entry).unwrap().unwrap();
		assert_eq!(stmt.text, "INSERT INTO admin.accounts (id,id_tenant,balance) VALUES (?,?,?) ON DUPLICATE KEY UPDATE balance=VALUES(balance)");
	}

	#[test]
	fn internal_and_where_keys_are_excluded_from_insert() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Insert)
			.put("_trace", "abc")
			.put("where_id", 1i64)
			.put("name", "bob")
			.build()
			.unwrap();
		let stmt = synthesize(&entry).unwrap().unwrap();
		assert_eq!(stmt.text, "INSERT INTO admin.accounts (name) VALUES (?)");
	}

	#[test]
	fn batch_marker_has_no_statement() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::BatchMarker).build().unwrap();
		assert_eq!(synthesize(&entry).unwrap(), None);
	}

	#[test]
	fn for_postgres_rewrites_placeholders_in_order() {
		let entry = LogEntryBuilder::new("admin", "accounts", Op::Update)
			.put("balance", 50i64)
			.put("where_id", 7i64)
			.build()
			.unwrap();
		let stmt = synthesize(&entry).unwrap().unwrap().for_postgres();
		assert_eq!(stmt.text, "UPDATE admin.accounts SET balance=$1 WHERE id=$2");
	}
}
