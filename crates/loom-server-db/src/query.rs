// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Filtering, sorting and paging for permission listings.
//!
//! Field names arrive from API callers in either camelCase (`displayName`)
//! or snake_case (`display_name`). They are resolved against a fixed column
//! list before being spliced into SQL; values are always bound.

use sqlx::{QueryBuilder, Sqlite};

use crate::error::DbError;

/// Column used when no usable sort is requested.
pub const DEFAULT_SORT_COLUMN: &str = "created_time";

const COLUMNS: &[&str] = &[
	"owner",
	"name",
	"created_time",
	"display_name",
	"users",
	"roles",
	"resource_type",
	"resources",
	"actions",
	"effect",
	"is_enabled",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
	Ascend,
	Descend,
}

impl SortOrder {
	/// `"ascend"` sorts ascending; anything else, including nothing, descends.
	pub fn parse(order: Option<&str>) -> Self {
		match order {
			Some("ascend") => SortOrder::Ascend,
			_ => SortOrder::Descend,
		}
	}

	fn as_sql(&self) -> &'static str {
		match self {
			SortOrder::Ascend => "ASC",
			SortOrder::Descend => "DESC",
		}
	}
}

/// Resolve a caller-supplied field name to a permission column.
pub fn column_for(field: &str) -> Option<&'static str> {
	let snake = camel_to_snake(field);
	COLUMNS.iter().copied().find(|column| *column == snake)
}

fn camel_to_snake(field: &str) -> String {
	let mut out = String::with_capacity(field.len() + 4);
	for (i, c) in field.chars().enumerate() {
		if c.is_ascii_uppercase() {
			if i > 0 {
				out.push('_');
			}
			out.push(c.to_ascii_lowercase());
		} else {
			out.push(c);
		}
	}
	out
}

/// Query parameters for counting and listing permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionQuery {
	pub owner: Option<String>,
	pub field: Option<String>,
	pub value: Option<String>,
	pub offset: Option<i64>,
	pub limit: Option<i64>,
	pub sort_field: Option<String>,
	pub sort_order: Option<String>,
}

impl PermissionQuery {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn owner(mut self, owner: impl Into<String>) -> Self {
		self.owner = Some(owner.into());
		self
	}

	/// Substring match of `value` against `field`.
	pub fn search(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
		self.field = Some(field.into());
		self.value = Some(value.into());
		self
	}

	pub fn page(mut self, offset: i64, limit: i64) -> Self {
		self.offset = Some(offset);
		self.limit = Some(limit);
		self
	}

	pub fn sort(mut self, field: impl Into<String>, order: impl Into<String>) -> Self {
		self.sort_field = Some(field.into());
		self.sort_order = Some(order.into());
		self
	}

	/// Append `WHERE` conditions for owner and search.
	///
	/// # Errors
	/// Returns `DbError::InvalidQuery` for an unknown search field.
	pub fn push_filters(&self, builder: &mut QueryBuilder<'_, Sqlite>) -> Result<(), DbError> {
		builder.push(" WHERE 1 = 1");

		if let Some(owner) = non_empty(&self.owner) {
			builder.push(" AND owner = ");
			builder.push_bind(owner.to_string());
		}

		if let (Some(field), Some(value)) = (non_empty(&self.field), non_empty(&self.value)) {
			let column = column_for(field)
				.ok_or_else(|| DbError::InvalidQuery(format!("unknown search field '{field}'")))?;
			builder.push(format!(" AND {column} LIKE "));
			builder.push_bind(format!("%{value}%"));
		}

		Ok(())
	}

	/// Append `ORDER BY` and, when both offset and limit are non-negative,
	/// `LIMIT ... OFFSET ...`.
	///
	/// # Errors
	/// Returns `DbError::InvalidQuery` for an unknown sort field.
	pub fn push_order_and_page(
		&self,
		builder: &mut QueryBuilder<'_, Sqlite>,
	) -> Result<(), DbError> {
		let column = match (non_empty(&self.sort_field), non_empty(&self.sort_order)) {
			(Some(field), Some(_)) => column_for(field)
				.ok_or_else(|| DbError::InvalidQuery(format!("unknown sort field '{field}'")))?,
			_ => DEFAULT_SORT_COLUMN,
		};
		let order = SortOrder::parse(self.sort_order.as_deref());
		builder.push(format!(
			" ORDER BY {column} {}, owner ASC, name ASC",
			order.as_sql()
		));

		if let Some((offset, limit)) = self.paging() {
			builder.push(" LIMIT ");
			builder.push_bind(limit);
			builder.push(" OFFSET ");
			builder.push_bind(offset);
		}

		Ok(())
	}

	fn paging(&self) -> Option<(i64, i64)> {
		match (self.offset, self.limit) {
			(Some(offset), Some(limit)) if offset >= 0 && limit >= 0 => Some((offset, limit)),
			_ => None,
		}
	}
}

fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().filter(|v| !v.is_empty())
}
