// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keeps the rule table and the engine in step with permission records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use loom_permissions_core::{dedup_rules, expand_policies, Permission, PermissionId};
use loom_server_db::{PermissionStore, PolicyRuleStore};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::engine::PolicyEngine;
use crate::error::Result;

type RecordLocks = Mutex<HashMap<PermissionId, Arc<AsyncMutex<()>>>>;

/// Exclusive hold on one or more permission ids.
///
/// Obtained from [`PolicySynchronizer::lock`]. Map entries for the held ids
/// are dropped with the guard unless another task is waiting on them.
pub struct RecordGuard {
	locks: Arc<RecordLocks>,
	held: Vec<(PermissionId, OwnedMutexGuard<()>)>,
}

impl RecordGuard {
	pub fn covers(&self, id: &PermissionId) -> bool {
		self.held.iter().any(|(held, _)| held == id)
	}
}

impl Drop for RecordGuard {
	fn drop(&mut self) {
		let ids: Vec<PermissionId> = self.held.drain(..).map(|(id, _guard)| id).collect();
		let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
		for id in ids {
			// Waiters hold their own clone of the Arc.
			if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
				locks.remove(&id);
			}
		}
	}
}

/// Replaces the policy rules derived from a permission, in the rule table
/// and in the engine, as one unit per permission id.
#[derive(Clone)]
pub struct PolicySynchronizer {
	engine: PolicyEngine,
	store: Arc<dyn PolicyRuleStore>,
	locks: Arc<RecordLocks>,
}

impl PolicySynchronizer {
	pub fn new(engine: PolicyEngine) -> Self {
		let store = engine.store();
		Self {
			engine,
			store,
			locks: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	pub fn engine(&self) -> &PolicyEngine {
		&self.engine
	}

	/// Take the record locks for `ids`.
	///
	/// Locks are acquired in id order, so two callers naming the same ids in
	/// a different order cannot deadlock. Repeated ids are taken once.
	pub async fn lock(&self, ids: &[&PermissionId]) -> RecordGuard {
		let mut ids: Vec<PermissionId> = ids.iter().map(|id| (*id).clone()).collect();
		ids.sort();
		ids.dedup();

		let mut guard = RecordGuard {
			locks: Arc::clone(&self.locks),
			held: Vec::with_capacity(ids.len()),
		};
		for id in ids {
			let lock = self.lock_for(&id);
			let held = lock.lock_owned().await;
			guard.held.push((id, held));
		}
		guard
	}

	/// Expand `permission` and make its rules the only ones tagged with its id.
	///
	/// The table is written first, in one transaction. If it fails the engine
	/// is left alone. If the engine then rejects the rules, the engine is
	/// rebuilt from the table before the error is returned.
	///
	/// # Returns
	/// The number of distinct rules applied.
	#[tracing::instrument(skip(self, permission), fields(id = %permission.id()))]
	pub async fn expand_and_replace(&self, permission: &Permission) -> Result<usize> {
		let guard = self.lock(&[&permission.id()]).await;
		self.expand_and_replace_locked(&guard, permission).await
	}

	/// [`expand_and_replace`](Self::expand_and_replace) for a caller that
	/// already holds the lock for the permission's id.
	pub async fn expand_and_replace_locked(
		&self,
		guard: &RecordGuard,
		permission: &Permission,
	) -> Result<usize> {
		let id = permission.id();
		debug_assert!(guard.covers(&id), "record lock not held for {id}");
		let rules = dedup_rules(expand_policies(permission));
		let count = rules.len();

		let removed = self.store.replace_permission_rules(&id, &rules).await?;
		if let Err(e) = self.engine.replace_rules(&id, rules).await {
			warn!(id = %id, error = %e, "engine rejected rules, reloading from table");
			self.engine.reload().await?;
			return Err(e);
		}

		debug!(id = %id, removed, applied = count, "policy rules replaced");
		Ok(count)
	}

	/// Drop every rule tagged with `id`.
	#[tracing::instrument(skip(self), fields(id = %id))]
	pub async fn remove(&self, id: &PermissionId) -> Result<u64> {
		let guard = self.lock(&[id]).await;
		self.remove_locked(&guard, id).await
	}

	/// [`remove`](Self::remove) for a caller that already holds the lock for
	/// `id`.
	pub async fn remove_locked(&self, guard: &RecordGuard, id: &PermissionId) -> Result<u64> {
		debug_assert!(guard.covers(id), "record lock not held for {id}");
		let removed = self.store.remove_permission_rules(id).await?;
		if let Err(e) = self.engine.remove_rules(id).await {
			warn!(id = %id, error = %e, "engine failed to drop rules, reloading from table");
			self.engine.reload().await?;
			return Err(e);
		}

		debug!(id = %id, removed, "policy rules removed");
		Ok(removed)
	}

	/// Re-expand every stored permission.
	///
	/// # Returns
	/// The total number of rules applied.
	#[tracing::instrument(skip(self, permissions))]
	pub async fn resync(&self, permissions: &dyn PermissionStore) -> Result<usize> {
		let records = permissions.list_permissions(None).await?;
		let mut total = 0;
		for record in &records {
			total += self.expand_and_replace(record).await?;
		}

		info!(permissions = records.len(), rules = total, "policy rules resynchronized");
		Ok(total)
	}

	fn lock_for(&self, id: &PermissionId) -> Arc<AsyncMutex<()>> {
		let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
		Arc::clone(locks.entry(id.clone()).or_default())
	}

	#[cfg(test)]
	fn tracked_locks(&self) -> usize {
		self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::PermissionError;
	use loom_permissions_core::{Effect, PolicyRule};
	use loom_server_db::testing::create_permission_test_pool;
	use loom_server_db::{PermissionRepository, PolicyRuleRepository, TableNames};

	struct Fixture {
		sync: PolicySynchronizer,
		rules: Arc<PolicyRuleRepository>,
		permissions: PermissionRepository,
	}

	async fn fixture() -> Fixture {
		let tables = TableNames::default();
		let pool = create_permission_test_pool(&tables).await;
		let rules = Arc::new(PolicyRuleRepository::new(pool.clone(), &tables));
		let engine = PolicyEngine::new(rules.clone()).await.unwrap();
		Fixture {
			sync: PolicySynchronizer::new(engine),
			rules,
			permissions: PermissionRepository::new(pool, &tables),
		}
	}

	fn strings(values: &[&str]) -> Vec<String> {
		values.iter().map(|v| v.to_string()).collect()
	}

	fn permission(resources: &[&str]) -> Permission {
		let mut permission = Permission::new("o1", "p1");
		permission.users = strings(&["o1/alice"]);
		permission.resources = strings(resources);
		permission.actions = strings(&["Read", "Write"]);
		permission
	}

	#[tokio::test]
	async fn test_expand_writes_table_and_engine() {
		let f = fixture().await;
		let applied = f.sync.expand_and_replace(&permission(&["A"])).await.unwrap();
		assert_eq!(applied, 2);

		let id = PermissionId::new("o1", "p1");
		let table = f.rules.list_permission_rules(&id).await.unwrap();
		let engine = f.sync.engine().policies_for(&id).await;
		assert_eq!(table, engine);
		assert_eq!(table[0].action, "read");
		assert_eq!(table[1].action, "write");
	}

	#[tokio::test]
	async fn test_expand_is_idempotent() {
		let f = fixture().await;
		let record = permission(&["A"]);
		f.sync.expand_and_replace(&record).await.unwrap();
		let first = f.sync.engine().policies().await;

		f.sync.expand_and_replace(&record).await.unwrap();
		assert_eq!(f.sync.engine().policies().await, first);
		assert_eq!(f.rules.load_policy_rules().await.unwrap(), first);
	}

	#[tokio::test]
	async fn test_duplicates_are_collapsed_when_applied() {
		let f = fixture().await;
		let mut record = permission(&["A", "A"]);
		record.actions = strings(&["read", "READ"]);

		let applied = f.sync.expand_and_replace(&record).await.unwrap();
		assert_eq!(applied, 1);
		assert_eq!(f.rules.load_policy_rules().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_changed_resources_replace_old_rules() {
		let f = fixture().await;
		f.sync.expand_and_replace(&permission(&["A"])).await.unwrap();
		f.sync.expand_and_replace(&permission(&["B"])).await.unwrap();

		let rules = f.sync.engine().policies().await;
		assert!(rules.iter().all(|r: &PolicyRule| r.object == "B"));
		assert!(f
			.rules
			.load_policy_rules()
			.await
			.unwrap()
			.iter()
			.all(|r| r.object == "B"));
		assert!(!f.sync.engine().enforce("o1/alice", "A", "read").await.unwrap());
		assert!(f.sync.engine().enforce("o1/alice", "B", "read").await.unwrap());
	}

	#[tokio::test]
	async fn test_empty_dimension_clears_rules() {
		let f = fixture().await;
		f.sync.expand_and_replace(&permission(&["A"])).await.unwrap();
		assert_eq!(f.sync.expand_and_replace(&permission(&[])).await.unwrap(), 0);
		assert!(f.sync.engine().policies().await.is_empty());
		assert!(f.rules.load_policy_rules().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_remove_drops_rules() {
		let f = fixture().await;
		f.sync.expand_and_replace(&permission(&["A"])).await.unwrap();

		let removed = f
			.sync
			.remove(&PermissionId::new("o1", "p1"))
			.await
			.unwrap();
		assert_eq!(removed, 2);
		assert!(f.sync.engine().policies().await.is_empty());
		assert_eq!(f.sync.tracked_locks(), 0);
	}

	#[tokio::test]
	async fn test_lock_entries_released_after_each_call() {
		let f = fixture().await;
		f.sync.expand_and_replace(&permission(&["A"])).await.unwrap();
		assert_eq!(f.sync.tracked_locks(), 0);

		let p1 = PermissionId::new("o1", "p1");
		let p2 = PermissionId::new("o1", "p2");
		{
			let guard = f.sync.lock(&[&p2, &p1, &p2]).await;
			assert!(guard.covers(&p1));
			assert!(guard.covers(&p2));
			assert_eq!(f.sync.tracked_locks(), 2);
		}
		assert_eq!(f.sync.tracked_locks(), 0);
	}

	#[tokio::test]
	async fn test_lock_blocks_other_writers_for_same_id() {
		let f = fixture().await;
		let id = PermissionId::new("o1", "p1");
		let guard = f.sync.lock(&[&id]).await;

		let sync = f.sync.clone();
		let writer = tokio::spawn(async move {
			sync.expand_and_replace(&permission(&["A"])).await.unwrap();
		});
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		assert!(!writer.is_finished());
		assert!(f.rules.load_policy_rules().await.unwrap().is_empty());
		// Another task is queued on the entry, so it survives this drop.
		drop(guard);
		assert_eq!(f.sync.tracked_locks(), 1);

		writer.await.unwrap();
		assert_eq!(f.sync.engine().policies().await.len(), 2);
		assert_eq!(f.sync.tracked_locks(), 0);
	}

	#[tokio::test]
	async fn test_engine_failure_on_replace_reloads_from_table() {
		let f = fixture().await;
		f.sync.expand_and_replace(&permission(&["A"])).await.unwrap();

		f.sync.engine().fail_next_write();
		let result = f.sync.expand_and_replace(&permission(&["B"])).await;
		assert!(matches!(result, Err(PermissionError::Engine(_))));

		let table = f.rules.load_policy_rules().await.unwrap();
		assert_eq!(f.sync.engine().policies().await, table);
		assert!(table.iter().all(|r| r.object == "B"));
		assert!(f.sync.engine().enforce("o1/alice", "B", "read").await.unwrap());
		assert!(!f.sync.engine().enforce("o1/alice", "A", "read").await.unwrap());
		assert_eq!(f.sync.tracked_locks(), 0);
	}

	#[tokio::test]
	async fn test_engine_failure_on_remove_reloads_from_table() {
		let f = fixture().await;
		let mut other = permission(&["C"]);
		other.name = "p2".to_string();
		f.sync.expand_and_replace(&permission(&["A"])).await.unwrap();
		f.sync.expand_and_replace(&other).await.unwrap();

		f.sync.engine().fail_next_write();
		let result = f.sync.remove(&PermissionId::new("o1", "p1")).await;
		assert!(matches!(result, Err(PermissionError::Engine(_))));

		let table = f.rules.load_policy_rules().await.unwrap();
		assert_eq!(table.len(), 2);
		assert_eq!(f.sync.engine().policies().await, table);
		assert!(!f.sync.engine().enforce("o1/alice", "A", "read").await.unwrap());
		assert!(f.sync.engine().enforce("o1/alice", "C", "read").await.unwrap());
		assert_eq!(f.sync.tracked_locks(), 0);
	}

	#[tokio::test]
	async fn test_resync_rebuilds_from_records() {
		let f = fixture().await;
		let mut deny = permission(&["A"]);
		deny.name = "p2".to_string();
		deny.effect = Effect::Deny;
		f.permissions.create_permission(&permission(&["A"])).await.unwrap();
		f.permissions.create_permission(&deny).await.unwrap();

		let total = f.sync.resync(&f.permissions).await.unwrap();
		assert_eq!(total, 4);
		assert_eq!(f.sync.engine().policies().await.len(), 4);
		assert!(!f.sync.engine().enforce("o1/alice", "A", "read").await.unwrap());
	}

	#[tokio::test]
	async fn test_concurrent_replaces_for_one_record_stay_consistent() {
		let f = fixture().await;
		let mut handles = Vec::new();
		for i in 0..8 {
			let sync = f.sync.clone();
			handles.push(tokio::spawn(async move {
				let resource = format!("R{i}");
				sync.expand_and_replace(&permission(&[resource.as_str()]))
					.await
					.unwrap();
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let engine = f.sync.engine().policies().await;
		let table = f.rules.load_policy_rules().await.unwrap();
		assert_eq!(engine.len(), 2);
		assert_eq!(engine, table);
	}
}
