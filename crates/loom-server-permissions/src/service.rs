// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission CRUD with policy synchronization.
//!
//! Every successful create or update re-expands the record; deletes and
//! renames retire the rules of the old id.

use std::sync::Arc;

use loom_permissions_core::{Permission, PermissionId};
use loom_server_db::{PermissionQuery, PermissionStore};
use tracing::info;

use crate::engine::PolicyEngine;
use crate::error::Result;
use crate::sync::PolicySynchronizer;

#[derive(Clone)]
pub struct PermissionService {
	store: Arc<dyn PermissionStore>,
	synchronizer: PolicySynchronizer,
}

impl PermissionService {
	pub fn new(store: Arc<dyn PermissionStore>, synchronizer: PolicySynchronizer) -> Self {
		Self {
			store,
			synchronizer,
		}
	}

	pub fn engine(&self) -> &PolicyEngine {
		self.synchronizer.engine()
	}

	pub fn synchronizer(&self) -> &PolicySynchronizer {
		&self.synchronizer
	}

	/// Count permissions, optionally restricted to an owner and a substring
	/// match on one field.
	#[tracing::instrument(skip(self))]
	pub async fn count(
		&self,
		owner: Option<&str>,
		field: Option<&str>,
		value: Option<&str>,
	) -> Result<i64> {
		let query = PermissionQuery {
			owner: owner.map(str::to_string),
			field: field.map(str::to_string),
			value: value.map(str::to_string),
			..Default::default()
		};
		Ok(self.store.count_permissions(&query).await?)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list(&self, owner: Option<&str>) -> Result<Vec<Permission>> {
		Ok(self.store.list_permissions(owner).await?)
	}

	#[tracing::instrument(skip(self, query))]
	pub async fn list_page(&self, query: &PermissionQuery) -> Result<Vec<Permission>> {
		Ok(self.store.list_permissions_page(query).await?)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get(&self, owner: &str, name: &str) -> Result<Option<Permission>> {
		Ok(self.store.get_permission(owner, name).await?)
	}

	/// Look up a permission by its `owner/name` id.
	///
	/// # Errors
	/// Returns `PermissionError::Invalid` if `id` has no separator.
	#[tracing::instrument(skip(self))]
	pub async fn get_by_id(&self, id: &str) -> Result<Option<Permission>> {
		let id = PermissionId::parse(id)?;
		self.get(&id.owner, &id.name).await
	}

	/// Insert a permission and apply its rules.
	///
	/// The record lock for the permission's id is held from the insert until
	/// its rules are applied.
	///
	/// # Errors
	/// Returns `PermissionError::Database` if the record already exists.
	#[tracing::instrument(skip(self, permission), fields(id = %permission.id()))]
	pub async fn create(&self, permission: &Permission) -> Result<bool> {
		let id = permission.id();
		let guard = self.synchronizer.lock(&[&id]).await;

		let created = self.store.create_permission(permission).await?;
		if created {
			let rules = self
				.synchronizer
				.expand_and_replace_locked(&guard, permission)
				.await?;
			info!(id = %id, rules, "permission created");
		}
		Ok(created)
	}

	/// Overwrite the permission at `id` with `permission` and re-apply its
	/// rules. When the new owner or name differs from `id`, rules of the old
	/// id are removed.
	///
	/// Both the old and the new id stay locked for the whole call, so the
	/// stored row and the loaded rules always come from the same update.
	///
	/// # Returns
	/// `false` with no side effects if nothing exists at `id`.
	#[tracing::instrument(skip(self, permission), fields(new_id = %permission.id()))]
	pub async fn update(&self, id: &str, permission: &Permission) -> Result<bool> {
		let id = PermissionId::parse(id)?;
		let new_id = permission.id();
		let guard = self.synchronizer.lock(&[&id, &new_id]).await;

		if self.store.get_permission(&id.owner, &id.name).await?.is_none() {
			return Ok(false);
		}

		let updated = self.store.update_permission(&id, permission).await?;
		if updated {
			if new_id != id {
				self.synchronizer.remove_locked(&guard, &id).await?;
			}
			let rules = self
				.synchronizer
				.expand_and_replace_locked(&guard, permission)
				.await?;
			info!(id = %id, new_id = %new_id, rules, "permission updated");
		}
		Ok(updated)
	}

	/// Delete a permission and the rules expanded from it.
	#[tracing::instrument(skip(self, permission), fields(id = %permission.id()))]
	pub async fn delete(&self, permission: &Permission) -> Result<bool> {
		let id = permission.id();
		let guard = self.synchronizer.lock(&[&id]).await;

		let deleted = self.store.delete_permission(&id).await?;
		if deleted {
			let rules = self.synchronizer.remove_locked(&guard, &id).await?;
			info!(id = %id, rules, "permission deleted");
		}
		Ok(deleted)
	}

	/// Re-expand every stored permission into the rule table and engine.
	pub async fn resync(&self) -> Result<usize> {
		self.synchronizer.resync(self.store.as_ref()).await
	}
}
