// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a SqlitePool with WAL mode and common settings.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./loom.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid, `DbError::Sqlx` if the
/// connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new().connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_create_pool_creates_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("permissions.db");
		let url = format!("sqlite:{}", path.display());

		let pool = create_pool(&url).await.unwrap();
		let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
		assert_eq!(one, 1);
		assert!(path.exists());
	}

	#[tokio::test]
	async fn test_create_pool_fails_when_directory_is_missing() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("missing").join("permissions.db");
		let url = format!("sqlite:{}", path.display());

		let result = create_pool(&url).await;
		assert!(matches!(result, Err(DbError::Sqlx(_))));
	}
}
