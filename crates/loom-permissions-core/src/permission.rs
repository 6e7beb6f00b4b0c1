// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission records and their derived identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PermissionCoreError;

/// Separator between owner and name in a [`PermissionId`].
pub const ID_SEPARATOR: char = '/';

/// Derived identifier of a permission, rendered as `owner/name`.
///
/// The same string tags every policy rule expanded from the permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionId {
	pub owner: String,
	pub name: String,
}

impl PermissionId {
	pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			owner: owner.into(),
			name: name.into(),
		}
	}

	/// Parses `owner/name`, splitting on the first separator only.
	pub fn parse(id: &str) -> Result<Self, PermissionCoreError> {
		id.split_once(ID_SEPARATOR)
			.map(|(owner, name)| Self::new(owner, name))
			.ok_or_else(|| PermissionCoreError::InvalidId(id.to_string()))
	}
}

impl fmt::Display for PermissionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}{}", self.owner, ID_SEPARATOR, self.name)
	}
}

impl FromStr for PermissionId {
	type Err = PermissionCoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

/// Outcome a matching policy rule contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Effect {
	#[default]
	Allow,
	Deny,
}

impl Effect {
	pub fn as_str(&self) -> &'static str {
		match self {
			Effect::Allow => "allow",
			Effect::Deny => "deny",
		}
	}
}

impl fmt::Display for Effect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Effect {
	type Err = PermissionCoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim();
		if trimmed.eq_ignore_ascii_case("allow") {
			Ok(Effect::Allow)
		} else if trimmed.eq_ignore_ascii_case("deny") {
			Ok(Effect::Deny)
		} else {
			Err(PermissionCoreError::InvalidEffect(s.to_string()))
		}
	}
}

impl TryFrom<String> for Effect {
	type Error = PermissionCoreError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<Effect> for String {
	fn from(effect: Effect) -> Self {
		effect.as_str().to_string()
	}
}

/// A named authorization rule binding principals to resources and actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
	pub owner: String,
	pub name: String,
	#[serde(rename = "createdTime")]
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub display_name: String,

	#[serde(default)]
	pub users: Vec<String>,
	#[serde(default)]
	pub roles: Vec<String>,

	#[serde(default)]
	pub resource_type: String,
	#[serde(default)]
	pub resources: Vec<String>,
	/// Stored as entered; lowercased when expanded into policy rules.
	#[serde(default)]
	pub actions: Vec<String>,
	#[serde(default)]
	pub effect: Effect,

	#[serde(default)]
	pub is_enabled: bool,
}

impl Permission {
	/// Creates an enabled permission with no principals, resources or actions.
	pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			owner: owner.into(),
			name: name.into(),
			created_at: Utc::now(),
			display_name: String::new(),
			users: Vec::new(),
			roles: Vec::new(),
			resource_type: String::new(),
			resources: Vec::new(),
			actions: Vec::new(),
			effect: Effect::Allow,
			is_enabled: true,
		}
	}

	pub fn id(&self) -> PermissionId {
		PermissionId::new(self.owner.clone(), self.name.clone())
	}

	/// Users first, then roles, each in stored order.
	pub fn principals(&self) -> impl Iterator<Item = &str> {
		self.users
			.iter()
			.chain(self.roles.iter())
			.map(String::as_str)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_id_display() {
		let permission = Permission::new("org1", "perm1");
		assert_eq!(permission.id().to_string(), "org1/perm1");
	}

	#[test]
	fn test_id_parse_splits_on_first_separator() {
		let id = PermissionId::parse("org1/perm1").unwrap();
		assert_eq!(id.owner, "org1");
		assert_eq!(id.name, "perm1");

		let id = PermissionId::parse("org1/team/perm1").unwrap();
		assert_eq!(id.owner, "org1");
		assert_eq!(id.name, "team/perm1");
	}

	#[test]
	fn test_id_parse_without_separator_fails() {
		let err = PermissionId::parse("perm1").unwrap_err();
		assert_eq!(err, PermissionCoreError::InvalidId("perm1".to_string()));
	}

	#[test]
	fn test_effect_parse_is_case_insensitive() {
		assert_eq!("Allow".parse::<Effect>().unwrap(), Effect::Allow);
		assert_eq!("DENY".parse::<Effect>().unwrap(), Effect::Deny);
		assert!("maybe".parse::<Effect>().is_err());
	}

	#[test]
	fn test_permission_json_uses_camel_case() {
		let json = serde_json::json!({
			"owner": "o1",
			"name": "p1",
			"createdTime": "2025-01-01T00:00:00Z",
			"displayName": "Read reports",
			"users": ["o1/alice"],
			"roles": [],
			"resourceType": "Application",
			"resources": ["res1"],
			"actions": ["Read"],
			"effect": "Allow",
			"isEnabled": true
		});

		let permission: Permission = serde_json::from_value(json).unwrap();
		assert_eq!(permission.display_name, "Read reports");
		assert_eq!(permission.effect, Effect::Allow);
		assert_eq!(permission.actions, vec!["Read".to_string()]);
		assert!(permission.is_enabled);

		let back = serde_json::to_value(&permission).unwrap();
		assert_eq!(back["effect"], "allow");
		assert_eq!(back["resourceType"], "Application");
	}

	#[test]
	fn test_principals_lists_users_before_roles() {
		let mut permission = Permission::new("o1", "p1");
		permission.users = vec!["o1/alice".to_string()];
		permission.roles = vec!["o1/admins".to_string(), "o1/ops".to_string()];

		let principals: Vec<_> = permission.principals().collect();
		assert_eq!(principals, vec!["o1/alice", "o1/admins", "o1/ops"]);
	}

	proptest! {
		#[test]
		fn id_roundtrips_when_owner_has_no_separator(
			owner in "[a-z0-9_-]{1,20}",
			name in "[a-z0-9_/-]{1,20}",
		) {
			let id = PermissionId::new(owner.clone(), name.clone());
			let parsed = PermissionId::parse(&id.to_string()).unwrap();
			prop_assert_eq!(parsed.owner, owner);
			prop_assert_eq!(parsed.name, name);
		}
	}
}
