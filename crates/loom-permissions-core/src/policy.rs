// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flattened policy rules and the expansion that derives them from a
//! [`Permission`].
//!
//! A permission is a template: every principal (users, then roles) is paired
//! with every resource and every action. Each combination becomes one
//! [`PolicyRule`] tagged with the permission's id, which lets the rule set for
//! a permission be replaced as a unit.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::permission::{Permission, PermissionId};

/// Column index of the owning permission id within a policy rule.
pub const PERMISSION_ID_FIELD: usize = 4;

/// A `(subject, object, action, effect, permission_id)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
	pub subject: String,
	pub object: String,
	pub action: String,
	pub effect: String,
	pub permission_id: String,
}

impl PolicyRule {
	pub fn into_vec(self) -> Vec<String> {
		vec![
			self.subject,
			self.object,
			self.action,
			self.effect,
			self.permission_id,
		]
	}

	/// Builds a rule from engine columns. Returns `None` unless exactly five
	/// columns are present.
	pub fn from_vec(values: Vec<String>) -> Option<Self> {
		let [subject, object, action, effect, permission_id]: [String; 5] = values.try_into().ok()?;
		Some(Self {
			subject,
			object,
			action,
			effect,
			permission_id,
		})
	}
}

/// Role membership: `subject` inherits everything granted to `role`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
	pub subject: String,
	pub role: String,
}

impl RoleAssignment {
	pub fn new(subject: impl Into<String>, role: impl Into<String>) -> Self {
		Self {
			subject: subject.into(),
			role: role.into(),
		}
	}

	pub fn into_vec(self) -> Vec<String> {
		vec![self.subject, self.role]
	}
}

/// Expands a permission into its full cross product of policy rules.
///
/// Order is principal, then resource, then action. Duplicates are kept, so
/// the result always holds `(users + roles) * resources * actions` rules.
/// The enabled flag is not consulted.
pub fn expand_policies(permission: &Permission) -> Vec<PolicyRule> {
	let id = permission.id().to_string();
	let effect = permission.effect.as_str();

	let mut rules = Vec::with_capacity(expected_rule_count(permission));
	for principal in permission.principals() {
		for resource in &permission.resources {
			for action in &permission.actions {
				rules.push(PolicyRule {
					subject: principal.to_string(),
					object: resource.clone(),
					action: action.to_lowercase(),
					effect: effect.to_string(),
					permission_id: id.clone(),
				});
			}
		}
	}
	rules
}

pub fn expected_rule_count(permission: &Permission) -> usize {
	(permission.users.len() + permission.roles.len())
		* permission.resources.len()
		* permission.actions.len()
}

/// Drops repeated rules while keeping first-seen order.
pub fn dedup_rules(rules: Vec<PolicyRule>) -> Vec<PolicyRule> {
	let mut seen = HashSet::with_capacity(rules.len());
	rules
		.into_iter()
		.filter(|rule| seen.insert(rule.clone()))
		.collect()
}

/// True when the rule was expanded from the given permission.
pub fn belongs_to(rule: &PolicyRule, id: &PermissionId) -> bool {
	rule.permission_id == id.to_string()
}
