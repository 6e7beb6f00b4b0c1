// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for Loom permissions.
//!
//! Two tables back the permission service: the permission records
//! themselves and the flattened policy rules expanded from them. Both live
//! in SQLite and honour a configurable table name prefix.

pub mod error;
pub mod migrations;
pub mod permission;
pub mod policy_rule;
pub mod pool;
pub mod query;
pub mod testing;

pub use error::{DbError, Result};
pub use migrations::{run_migrations, TableNames};
pub use permission::{PermissionRepository, PermissionStore};
pub use policy_rule::{PolicyRuleRepository, PolicyRuleStore};
pub use pool::create_pool;
pub use query::{column_for, PermissionQuery, SortOrder, DEFAULT_SORT_COLUMN};
