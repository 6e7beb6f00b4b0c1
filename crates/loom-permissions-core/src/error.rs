// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for permission core types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionCoreError {
	#[error("invalid permission id '{0}': expected owner/name")]
	InvalidId(String),

	#[error("invalid effect '{0}': expected allow or deny")]
	InvalidEffect(String),
}

pub type Result<T> = std::result::Result<T, PermissionCoreError>;
