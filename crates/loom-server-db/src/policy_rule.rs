// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable storage for policy rules and role assignments.
//!
//! Rows follow the usual `ptype, v0..v5` layout. `p` rows hold
//! `(subject, object, action, effect, permission_id)` in `v0..v4`; `g` rows
//! hold `(subject, role)` in `v0..v1`. The policy engine is rebuilt from
//! this table on startup.

use async_trait::async_trait;
use loom_permissions_core::{PermissionId, PolicyRule, RoleAssignment};
use sqlx::sqlite::SqlitePool;

use crate::error::DbError;
use crate::migrations::TableNames;

const POLICY_TYPE: &str = "p";
const GROUPING_TYPE: &str = "g";

#[async_trait]
pub trait PolicyRuleStore: Send + Sync {
	async fn load_policy_rules(&self) -> Result<Vec<PolicyRule>, DbError>;
	async fn load_role_assignments(&self) -> Result<Vec<RoleAssignment>, DbError>;
	async fn list_permission_rules(&self, id: &PermissionId) -> Result<Vec<PolicyRule>, DbError>;
	async fn replace_permission_rules(
		&self,
		id: &PermissionId,
		rules: &[PolicyRule],
	) -> Result<u64, DbError>;
	async fn remove_permission_rules(&self, id: &PermissionId) -> Result<u64, DbError>;
	async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, DbError>;
	async fn remove_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, DbError>;
}

#[derive(sqlx::FromRow)]
struct PolicyRuleRow {
	v0: String,
	v1: String,
	v2: String,
	v3: String,
	v4: String,
}

impl From<PolicyRuleRow> for PolicyRule {
	fn from(row: PolicyRuleRow) -> Self {
		PolicyRule {
			subject: row.v0,
			object: row.v1,
			action: row.v2,
			effect: row.v3,
			permission_id: row.v4,
		}
	}
}

#[derive(Clone)]
pub struct PolicyRuleRepository {
	pool: SqlitePool,
	table: String,
}

impl PolicyRuleRepository {
	pub fn new(pool: SqlitePool, tables: &TableNames) -> Self {
		Self {
			pool,
			table: tables.permission_rule.clone(),
		}
	}

	/// Load every `p` rule in insertion order.
	#[tracing::instrument(skip(self))]
	pub async fn load_policy_rules(&self) -> Result<Vec<PolicyRule>, DbError> {
		let rows: Vec<PolicyRuleRow> = sqlx::query_as(&format!(
			"SELECT v0, v1, v2, v3, v4 FROM {} WHERE ptype = ? ORDER BY id",
			self.table
		))
		.bind(POLICY_TYPE)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(PolicyRule::from).collect())
	}

	/// Load every `g` row in insertion order.
	#[tracing::instrument(skip(self))]
	pub async fn load_role_assignments(&self) -> Result<Vec<RoleAssignment>, DbError> {
		let rows: Vec<(String, String)> = sqlx::query_as(&format!(
			"SELECT v0, v1 FROM {} WHERE ptype = ? ORDER BY id",
			self.table
		))
		.bind(GROUPING_TYPE)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|(subject, role)| RoleAssignment { subject, role })
			.collect())
	}

	#[tracing::instrument(skip(self), fields(id = %id))]
	pub async fn list_permission_rules(
		&self,
		id: &PermissionId,
	) -> Result<Vec<PolicyRule>, DbError> {
		let rows: Vec<PolicyRuleRow> = sqlx::query_as(&format!(
			"SELECT v0, v1, v2, v3, v4 FROM {} WHERE ptype = ? AND v4 = ? ORDER BY id",
			self.table
		))
		.bind(POLICY_TYPE)
		.bind(id.to_string())
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(PolicyRule::from).collect())
	}

	/// Swap the stored rule set for a permission in a single transaction.
	///
	/// Callers are expected to pass a deduplicated set; rules are stored as
	/// given.
	///
	/// # Returns
	/// The number of rules removed.
	#[tracing::instrument(skip(self, rules), fields(id = %id, rules = rules.len()))]
	pub async fn replace_permission_rules(
		&self,
		id: &PermissionId,
		rules: &[PolicyRule],
	) -> Result<u64, DbError> {
		let id = id.to_string();
		if let Some(foreign) = rules.iter().find(|rule| rule.permission_id != id) {
			return Err(DbError::Internal(format!(
				"rule for '{}' passed while replacing '{id}'",
				foreign.permission_id
			)));
		}

		let mut tx = self.pool.begin().await?;

		let removed = sqlx::query(&format!(
			"DELETE FROM {} WHERE ptype = ? AND v4 = ?",
			self.table
		))
		.bind(POLICY_TYPE)
		.bind(&id)
		.execute(&mut *tx)
		.await?
		.rows_affected();

		let insert = format!(
			"INSERT INTO {} (ptype, v0, v1, v2, v3, v4) VALUES (?, ?, ?, ?, ?, ?)",
			self.table
		);
		for rule in rules {
			sqlx::query(&insert)
				.bind(POLICY_TYPE)
				.bind(&rule.subject)
				.bind(&rule.object)
				.bind(&rule.action)
				.bind(&rule.effect)
				.bind(&rule.permission_id)
				.execute(&mut *tx)
				.await?;
		}

		tx.commit().await?;

		tracing::debug!(id = %id, removed, inserted = rules.len(), "permission rules replaced");
		Ok(removed)
	}

	/// Delete every stored rule tagged with the permission id.
	#[tracing::instrument(skip(self), fields(id = %id))]
	pub async fn remove_permission_rules(&self, id: &PermissionId) -> Result<u64, DbError> {
		let removed = sqlx::query(&format!(
			"DELETE FROM {} WHERE ptype = ? AND v4 = ?",
			self.table
		))
		.bind(POLICY_TYPE)
		.bind(id.to_string())
		.execute(&self.pool)
		.await?
		.rows_affected();

		tracing::debug!(id = %id, removed, "permission rules removed");
		Ok(removed)
	}

	/// Store a role assignment.
	///
	/// # Returns
	/// `false` if the assignment was already present.
	#[tracing::instrument(skip(self), fields(subject = %assignment.subject, role = %assignment.role))]
	pub async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, DbError> {
		let existing: i64 = sqlx::query_scalar(&format!(
			"SELECT COUNT(*) FROM {} WHERE ptype = ? AND v0 = ? AND v1 = ?",
			self.table
		))
		.bind(GROUPING_TYPE)
		.bind(&assignment.subject)
		.bind(&assignment.role)
		.fetch_one(&self.pool)
		.await?;

		if existing > 0 {
			return Ok(false);
		}

		sqlx::query(&format!(
			"INSERT INTO {} (ptype, v0, v1) VALUES (?, ?, ?)",
			self.table
		))
		.bind(GROUPING_TYPE)
		.bind(&assignment.subject)
		.bind(&assignment.role)
		.execute(&self.pool)
		.await?;

		Ok(true)
	}

	#[tracing::instrument(skip(self), fields(subject = %assignment.subject, role = %assignment.role))]
	pub async fn remove_role_assignment(
		&self,
		assignment: &RoleAssignment,
	) -> Result<bool, DbError> {
		let result = sqlx::query(&format!(
			"DELETE FROM {} WHERE ptype = ? AND v0 = ? AND v1 = ?",
			self.table
		))
		.bind(GROUPING_TYPE)
		.bind(&assignment.subject)
		.bind(&assignment.role)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() != 0)
	}
}

#[async_trait]
impl PolicyRuleStore for PolicyRuleRepository {
	async fn load_policy_rules(&self) -> Result<Vec<PolicyRule>, DbError> {
		self.load_policy_rules().await
	}

	async fn load_role_assignments(&self) -> Result<Vec<RoleAssignment>, DbError> {
		self.load_role_assignments().await
	}

	async fn list_permission_rules(&self, id: &PermissionId) -> Result<Vec<PolicyRule>, DbError> {
		self.list_permission_rules(id).await
	}

	async fn replace_permission_rules(
		&self,
		id: &PermissionId,
		rules: &[PolicyRule],
	) -> Result<u64, DbError> {
		self.replace_permission_rules(id, rules).await
	}

	async fn remove_permission_rules(&self, id: &PermissionId) -> Result<u64, DbError> {
		self.remove_permission_rules(id).await
	}

	async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, DbError> {
		self.add_role_assignment(assignment).await
	}

	async fn remove_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, DbError> {
		self.remove_role_assignment(assignment).await
	}
}
