// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission server implementation for Loom.
//!
//! Permissions are stored as records and flattened into policy rules for a
//! shared casbin enforcer. This crate wires the pieces together.
//!
//! # Architecture
//!
//! - `engine` - The shared enforcer and its rule table
//! - `sync` - Replaces the rules derived from one permission at a time
//! - `service` - Permission CRUD that keeps rules in step
//!
//! # Example
//!
//! ```ignore
//! use loom_server_permissions::bootstrap;
//!
//! let config = loom_server_config::load_config()?;
//! let service = bootstrap(&config).await?;
//!
//! service.create(&permission).await?;
//! let allowed = service.engine().enforce("o1/alice", "res1", "read").await?;
//! ```

pub mod engine;
pub mod error;
pub mod service;
pub mod sync;

pub use engine::{PolicyEngine, POLICY_MODEL};
pub use error::{PermissionError, Result};
pub use service::PermissionService;
pub use sync::{PolicySynchronizer, RecordGuard};

use std::sync::Arc;

use loom_server_config::ServerConfig;
use loom_server_db::{
	create_pool, run_migrations, PermissionRepository, PolicyRuleRepository, TableNames,
};
use sqlx::sqlite::SqlitePool;
use tracing::info;

/// Build the permission service on an existing pool.
///
/// Tables must already exist; see [`run_migrations`].
pub async fn open(pool: SqlitePool, tables: &TableNames) -> Result<PermissionService> {
	let rules = Arc::new(PolicyRuleRepository::new(pool.clone(), tables));
	let permissions = Arc::new(PermissionRepository::new(pool, tables));

	let engine = PolicyEngine::new(rules).await?;
	let synchronizer = PolicySynchronizer::new(engine);
	Ok(PermissionService::new(permissions, synchronizer))
}

/// Connect, migrate and load the policy engine from configuration.
///
/// # Errors
/// Any failure here should abort startup.
#[tracing::instrument(skip(config))]
pub async fn bootstrap(config: &ServerConfig) -> Result<PermissionService> {
	let tables = TableNames::with_prefix(&config.database.table_name_prefix)?;
	let pool = create_pool(&config.database.url()).await?;
	run_migrations(&pool, &tables).await?;

	let service = open(pool, &tables).await?;
	info!(
		permission_table = %tables.permission,
		rule_table = %tables.permission_rule,
		rules = service.engine().policies().await.len(),
		"permission service ready"
	);
	Ok(service)
}
