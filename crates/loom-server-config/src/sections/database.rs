// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database configuration.

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_DRIVER_NAME: &str = "sqlite";
pub const DEFAULT_DATA_SOURCE_NAME: &str = "sqlite:./";
pub const DEFAULT_DB_NAME: &str = "loom.db";

/// Database configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
	pub driver_name: String,
	/// Connection prefix; the database name is appended to form the URL.
	pub data_source_name: String,
	pub db_name: String,
	/// Prepended to every table name, e.g. `casbin_` gives `casbin_permission`.
	pub table_name_prefix: String,
}

impl DatabaseConfig {
	/// Connection URL handed to the pool, e.g. `sqlite:./loom.db`.
	pub fn url(&self) -> String {
		format!("{}{}", self.data_source_name, self.db_name)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if !self.driver_name.eq_ignore_ascii_case(DEFAULT_DRIVER_NAME) {
			return Err(ConfigError::InvalidValue {
				key: "database.driver_name".to_string(),
				message: format!(
					"unsupported driver '{}', only '{DEFAULT_DRIVER_NAME}' is available",
					self.driver_name
				),
			});
		}

		if self.db_name.is_empty() {
			return Err(ConfigError::Validation(
				"database.db_name must not be empty".to_string(),
			));
		}

		let prefix_ok = self
			.table_name_prefix
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_');
		if !prefix_ok {
			return Err(ConfigError::InvalidValue {
				key: "database.table_name_prefix".to_string(),
				message: format!(
					"'{}' may only contain ASCII letters, digits and underscores",
					self.table_name_prefix
				),
			});
		}

		Ok(())
	}
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

/// Database configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub driver_name: Option<String>,
	#[serde(default)]
	pub data_source_name: Option<String>,
	#[serde(default)]
	pub db_name: Option<String>,
	#[serde(default)]
	pub table_name_prefix: Option<String>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.driver_name.is_some() {
			self.driver_name = other.driver_name;
		}
		if other.data_source_name.is_some() {
			self.data_source_name = other.data_source_name;
		}
		if other.db_name.is_some() {
			self.db_name = other.db_name;
		}
		if other.table_name_prefix.is_some() {
			self.table_name_prefix = other.table_name_prefix;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			driver_name: self
				.driver_name
				.unwrap_or_else(|| DEFAULT_DRIVER_NAME.to_string()),
			data_source_name: self
				.data_source_name
				.unwrap_or_else(|| DEFAULT_DATA_SOURCE_NAME.to_string()),
			db_name: self.db_name.unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
			table_name_prefix: self.table_name_prefix.unwrap_or_default(),
		}
	}
}
