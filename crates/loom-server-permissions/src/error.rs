// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_permissions_core::PermissionCoreError;
use loom_server_config::ConfigError;
use loom_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
	#[error("Database error: {0}")]
	Database(#[from] DbError),

	#[error("Policy engine error: {0}")]
	Engine(#[from] casbin::Error),

	#[error("Invalid permission: {0}")]
	Invalid(#[from] PermissionCoreError),

	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, PermissionError>;
