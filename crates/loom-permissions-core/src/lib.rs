// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Loom permission rules.
//!
//! A [`Permission`] binds users and roles to resources and actions with an
//! allow or deny [`Effect`]. The policy engine does not consume permissions
//! directly; it consumes flattened [`PolicyRule`] tuples produced by
//! [`expand_policies`]. This crate has no I/O and is shared by the database
//! layer (`loom-server-db`) and the server crate (`loom-server-permissions`).
//!
//! # Example
//!
//! ```
//! use loom_permissions_core::{expand_policies, Effect, Permission};
//!
//! let mut permission = Permission::new("o1", "p1");
//! permission.users = vec!["o1/alice".to_string()];
//! permission.resources = vec!["res1".to_string()];
//! permission.actions = vec!["Read".to_string()];
//! permission.effect = Effect::Allow;
//!
//! let rules = expand_policies(&permission);
//! assert_eq!(rules[0].action, "read");
//! assert_eq!(rules[0].permission_id, "o1/p1");
//! ```

pub mod error;
pub mod permission;
pub mod policy;

pub use error::{PermissionCoreError, Result};
pub use permission::{Effect, Permission, PermissionId, ID_SEPARATOR};
pub use policy::{
	belongs_to, dedup_rules, expand_policies, expected_rule_count, PolicyRule, RoleAssignment,
	PERMISSION_ID_FIELD,
};
