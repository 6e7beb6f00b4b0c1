// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema for the permission and policy rule tables.
//!
//! Table names carry a configurable prefix, so the DDL is assembled at
//! runtime from [`TableNames`] rather than shipped as static migration files.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const PERMISSION_TABLE: &str = "permission";
const PERMISSION_RULE_TABLE: &str = "permission_rule";

/// Physical table names after applying the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
	pub permission: String,
	pub permission_rule: String,
}

impl TableNames {
	/// Builds table names for `prefix`.
	///
	/// # Errors
	/// Returns `DbError::InvalidQuery` if the prefix is not a plain identifier,
	/// since it is spliced into SQL text.
	pub fn with_prefix(prefix: &str) -> Result<Self, DbError> {
		if !prefix
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_')
		{
			return Err(DbError::InvalidQuery(format!(
				"table name prefix '{prefix}' is not a valid identifier"
			)));
		}

		Ok(Self {
			permission: format!("{prefix}{PERMISSION_TABLE}"),
			permission_rule: format!("{prefix}{PERMISSION_RULE_TABLE}"),
		})
	}
}

impl Default for TableNames {
	fn default() -> Self {
		Self {
			permission: PERMISSION_TABLE.to_string(),
			permission_rule: PERMISSION_RULE_TABLE.to_string(),
		}
	}
}

/// Create both tables and their indexes if they do not exist.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool, tables: &TableNames) -> Result<(), DbError> {
	let permission = &tables.permission;
	let rule = &tables.permission_rule;

	let statements = [
		format!(
			r#"
			CREATE TABLE IF NOT EXISTS {permission} (
				owner TEXT NOT NULL,
				name TEXT NOT NULL,
				created_time TEXT NOT NULL,
				display_name TEXT NOT NULL DEFAULT '',
				users TEXT NOT NULL DEFAULT '[]',
				roles TEXT NOT NULL DEFAULT '[]',
				resource_type TEXT NOT NULL DEFAULT '',
				resources TEXT NOT NULL DEFAULT '[]',
				actions TEXT NOT NULL DEFAULT '[]',
				effect TEXT NOT NULL DEFAULT 'allow',
				is_enabled INTEGER NOT NULL DEFAULT 1,
				PRIMARY KEY (owner, name)
			)
			"#
		),
		format!(
			"CREATE INDEX IF NOT EXISTS idx_{permission}_created_time ON {permission}(created_time)"
		),
		format!(
			r#"
			CREATE TABLE IF NOT EXISTS {rule} (
				id INTEGER PRIMARY KEY AUTOINCREMENT,
				ptype TEXT NOT NULL,
				v0 TEXT NOT NULL DEFAULT '',
				v1 TEXT NOT NULL DEFAULT '',
				v2 TEXT NOT NULL DEFAULT '',
				v3 TEXT NOT NULL DEFAULT '',
				v4 TEXT NOT NULL DEFAULT '',
				v5 TEXT NOT NULL DEFAULT ''
			)
			"#
		),
		format!("CREATE INDEX IF NOT EXISTS idx_{rule}_ptype_v4 ON {rule}(ptype, v4)"),
	];

	for statement in &statements {
		sqlx::query(statement).execute(pool).await?;
	}

	tracing::debug!(permission = %permission, rule = %rule, "permission tables ready");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[test]
	fn test_default_table_names() {
		let tables = TableNames::default();
		assert_eq!(tables.permission, "permission");
		assert_eq!(tables.permission_rule, "permission_rule");
	}

	#[test]
	fn test_prefixed_table_names() {
		let tables = TableNames::with_prefix("casbin_").unwrap();
		assert_eq!(tables.permission, "casbin_permission");
		assert_eq!(tables.permission_rule, "casbin_permission_rule");
	}

	#[test]
	fn test_prefix_must_be_identifier() {
		assert!(TableNames::with_prefix("x; DROP TABLE permission").is_err());
	}

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let pool = create_test_pool().await;
		let tables = TableNames::with_prefix("t_").unwrap();

		run_migrations(&pool, &tables).await.unwrap();
		run_migrations(&pool, &tables).await.unwrap();

		let count: i64 = sqlx::query_scalar(
			"SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('t_permission', 't_permission_rule')",
		)
		.fetch_one(&pool)
		.await
		.unwrap();
		assert_eq!(count, 2);
	}
}
