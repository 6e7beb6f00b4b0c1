// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::migrations::{run_migrations, TableNames};

/// In-memory pool pinned to a single connection so every query sees the same
/// database.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str(":memory:")
		.unwrap()
		.create_if_missing(true);

	SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool")
}

pub async fn create_permission_test_pool(tables: &TableNames) -> SqlitePool {
	let pool = create_test_pool().await;
	run_migrations(&pool, tables).await.unwrap();
	pool
}
