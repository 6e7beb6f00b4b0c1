// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

/// Errors from the permission and policy rule tables.
///
/// Missing rows are not errors; lookups return `Ok(None)` or `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	/// A stored row could not be decoded, or a caller broke a repository
	/// precondition.
	#[error("Internal: {0}")]
	Internal(String),

	/// A list column held malformed JSON, or a list could not be encoded.
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Unknown search or sort field, or a table prefix that is not an
	/// identifier.
	#[error("Invalid query: {0}")]
	InvalidQuery(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
