// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared policy engine handle.
//!
//! The enforcer keeps its working set in a [`MemoryAdapter`]; the rule table
//! behind [`PolicyRuleStore`] is the durable copy. The working set is loaded
//! from the table when the engine is built and on [`PolicyEngine::reload`],
//! and mutated incrementally in between.

use std::collections::HashSet;
use std::sync::Arc;

use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use loom_permissions_core::{
	dedup_rules, PermissionId, PolicyRule, RoleAssignment, PERMISSION_ID_FIELD,
};
use loom_server_db::PolicyRuleStore;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;

/// Model text handed to the enforcer.
///
/// A request is allowed when some rule allows it and no rule denies it.
/// Subjects match directly or through `g` role links.
pub const POLICY_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft, id

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

/// Cloneable handle to the process-wide enforcer.
#[derive(Clone)]
pub struct PolicyEngine {
	enforcer: Arc<RwLock<Enforcer>>,
	store: Arc<dyn PolicyRuleStore>,
	#[cfg(test)]
	fail_next_write: Arc<std::sync::atomic::AtomicBool>,
}

impl PolicyEngine {
	/// Build an enforcer and load every persisted rule and role assignment.
	///
	/// # Errors
	/// Returns `PermissionError::Database` if the rule table cannot be read,
	/// `PermissionError::Engine` if the model or rules are rejected.
	#[tracing::instrument(skip(store))]
	pub async fn new(store: Arc<dyn PolicyRuleStore>) -> Result<Self> {
		let enforcer = build_enforcer(store.as_ref()).await?;
		Ok(Self {
			enforcer: Arc::new(RwLock::new(enforcer)),
			store,
			#[cfg(test)]
			fail_next_write: Arc::default(),
		})
	}

	pub fn enforcer(&self) -> Arc<RwLock<Enforcer>> {
		Arc::clone(&self.enforcer)
	}

	pub fn store(&self) -> Arc<dyn PolicyRuleStore> {
		Arc::clone(&self.store)
	}

	/// Evaluate a request against the current working set.
	#[tracing::instrument(skip(self))]
	pub async fn enforce(&self, subject: &str, object: &str, action: &str) -> Result<bool> {
		let enforcer = self.enforcer.read().await;
		let allowed = enforcer.enforce((subject, object, action))?;
		debug!(allowed, "policy evaluated");
		Ok(allowed)
	}

	/// Every `p` rule currently loaded.
	pub async fn policies(&self) -> Vec<PolicyRule> {
		let enforcer = self.enforcer.read().await;
		enforcer
			.get_policy()
			.into_iter()
			.filter_map(PolicyRule::from_vec)
			.collect()
	}

	/// Loaded rules that were expanded from the given permission.
	pub async fn policies_for(&self, id: &PermissionId) -> Vec<PolicyRule> {
		let enforcer = self.enforcer.read().await;
		enforcer
			.get_filtered_policy(PERMISSION_ID_FIELD, vec![id.to_string()])
			.into_iter()
			.filter_map(PolicyRule::from_vec)
			.collect()
	}

	pub async fn role_assignments(&self) -> Vec<RoleAssignment> {
		let enforcer = self.enforcer.read().await;
		enforcer
			.get_grouping_policy()
			.into_iter()
			.filter_map(|row| match row.as_slice() {
				[subject, role] => Some(RoleAssignment::new(subject.as_str(), role.as_str())),
				_ => None,
			})
			.collect()
	}

	/// Let `subject` inherit every rule granted to `role`.
	///
	/// # Returns
	/// `false` if the assignment already existed.
	#[tracing::instrument(skip(self))]
	pub async fn assign_role(&self, subject: &str, role: &str) -> Result<bool> {
		let assignment = RoleAssignment::new(subject, role);
		if !self.store.add_role_assignment(&assignment).await? {
			return Ok(false);
		}

		let mut enforcer = self.enforcer.write().await;
		enforcer.add_grouping_policy(assignment.into_vec()).await?;
		info!(subject, role, "role assigned");
		Ok(true)
	}

	/// # Returns
	/// `false` if no such assignment existed.
	#[tracing::instrument(skip(self))]
	pub async fn unassign_role(&self, subject: &str, role: &str) -> Result<bool> {
		let assignment = RoleAssignment::new(subject, role);
		if !self.store.remove_role_assignment(&assignment).await? {
			return Ok(false);
		}

		let mut enforcer = self.enforcer.write().await;
		enforcer.remove_grouping_policy(assignment.into_vec()).await?;
		info!(subject, role, "role unassigned");
		Ok(true)
	}

	/// Rebuild the working set from the rule table.
	///
	/// The replacement enforcer is fully loaded before the swap, so readers
	/// never observe a partial set.
	#[tracing::instrument(skip(self))]
	pub async fn reload(&self) -> Result<()> {
		let fresh = build_enforcer(self.store.as_ref()).await?;
		*self.enforcer.write().await = fresh;
		info!("policy engine reloaded");
		Ok(())
	}

	/// Swap the loaded rules for `id` with `rules`.
	pub(crate) async fn replace_rules(&self, id: &PermissionId, rules: Vec<PolicyRule>) -> Result<()> {
		#[cfg(test)]
		self.take_write_failure()?;
		let mut enforcer = self.enforcer.write().await;
		enforcer
			.remove_filtered_policy(PERMISSION_ID_FIELD, vec![id.to_string()])
			.await?;
		if !rules.is_empty() {
			enforcer
				.add_policies(rules.into_iter().map(PolicyRule::into_vec).collect())
				.await?;
		}
		Ok(())
	}

	pub(crate) async fn remove_rules(&self, id: &PermissionId) -> Result<()> {
		#[cfg(test)]
		self.take_write_failure()?;
		let mut enforcer = self.enforcer.write().await;
		enforcer
			.remove_filtered_policy(PERMISSION_ID_FIELD, vec![id.to_string()])
			.await?;
		Ok(())
	}

	/// Make the next `replace_rules` or `remove_rules` call fail.
	#[cfg(test)]
	pub(crate) fn fail_next_write(&self) {
		self.fail_next_write
			.store(true, std::sync::atomic::Ordering::SeqCst);
	}

	#[cfg(test)]
	fn take_write_failure(&self) -> Result<()> {
		if self
			.fail_next_write
			.swap(false, std::sync::atomic::Ordering::SeqCst)
		{
			let cause = std::io::Error::new(std::io::ErrorKind::Other, "enforcer write failed");
			return Err(casbin::Error::IoError(cause).into());
		}
		Ok(())
	}
}

async fn build_enforcer(store: &dyn PolicyRuleStore) -> Result<Enforcer> {
	let model = DefaultModel::from_str(POLICY_MODEL).await?;
	let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;

	let rules = dedup_rules(store.load_policy_rules().await?);
	let rule_count = rules.len();
	if !rules.is_empty() {
		enforcer
			.add_policies(rules.into_iter().map(PolicyRule::into_vec).collect())
			.await?;
	}

	let mut seen = HashSet::new();
	let assignments: Vec<Vec<String>> = store
		.load_role_assignments()
		.await?
		.into_iter()
		.filter(|assignment| seen.insert(assignment.clone()))
		.map(RoleAssignment::into_vec)
		.collect();
	let assignment_count = assignments.len();
	if !assignments.is_empty() {
		enforcer.add_grouping_policies(assignments).await?;
	}

	debug!(
		rules = rule_count,
		role_assignments = assignment_count,
		"policy engine loaded"
	);
	Ok(enforcer)
}
