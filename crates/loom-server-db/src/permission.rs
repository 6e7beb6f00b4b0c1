// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Permission repository for database operations.
//!
//! Permissions are keyed by `(owner, name)`. List-valued fields (users,
//! roles, resources, actions) are stored as JSON arrays in TEXT columns.
//! `created_time` is fixed-width RFC 3339 UTC so it sorts as text.
//! Nothing here touches policy rules; keeping the engine in step is the
//! caller's job.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use loom_permissions_core::{Permission, PermissionId};
use sqlx::{sqlite::SqlitePool, QueryBuilder, Row, Sqlite};

use crate::error::DbError;
use crate::migrations::TableNames;
use crate::query::PermissionQuery;

const SELECT_COLUMNS: &str = "owner, name, created_time, display_name, users, roles, resource_type, resources, actions, effect, is_enabled";

#[async_trait]
pub trait PermissionStore: Send + Sync {
	async fn count_permissions(&self, query: &PermissionQuery) -> Result<i64, DbError>;
	async fn list_permissions(&self, owner: Option<&str>) -> Result<Vec<Permission>, DbError>;
	async fn list_permissions_page(&self, query: &PermissionQuery)
		-> Result<Vec<Permission>, DbError>;
	async fn get_permission(&self, owner: &str, name: &str) -> Result<Option<Permission>, DbError>;
	async fn create_permission(&self, permission: &Permission) -> Result<bool, DbError>;
	async fn update_permission(
		&self,
		id: &PermissionId,
		permission: &Permission,
	) -> Result<bool, DbError>;
	async fn delete_permission(&self, id: &PermissionId) -> Result<bool, DbError>;
}

/// SQLite-backed permission storage.
#[derive(Clone)]
pub struct PermissionRepository {
	pool: SqlitePool,
	table: String,
}

impl PermissionRepository {
	/// Create a new repository with the given pool.
	///
	/// # Arguments
	/// * `pool` - SQLite connection pool
	/// * `tables` - Prefixed table names; only `permission` is used here
	pub fn new(pool: SqlitePool, tables: &TableNames) -> Self {
		Self {
			pool,
			table: tables.permission.clone(),
		}
	}

	/// Count permissions matching the owner and search filters of `query`.
	/// Sorting and paging are ignored.
	#[tracing::instrument(skip(self, query), fields(owner = ?query.owner, field = ?query.field))]
	pub async fn count_permissions(&self, query: &PermissionQuery) -> Result<i64, DbError> {
		let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {}", self.table));
		query.push_filters(&mut builder)?;

		let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
		Ok(count)
	}

	/// List permissions, newest first.
	///
	/// # Arguments
	/// * `owner` - Restrict to one owner; `None` lists every owner
	#[tracing::instrument(skip(self))]
	pub async fn list_permissions(&self, owner: Option<&str>) -> Result<Vec<Permission>, DbError> {
		let mut query = PermissionQuery::new();
		query.owner = owner.map(str::to_string);
		self.list_permissions_page(&query).await
	}

	/// List permissions with filtering, sorting and paging.
	///
	/// # Errors
	/// Returns `DbError::InvalidQuery` for unknown search or sort fields.
	#[tracing::instrument(skip(self, query), fields(owner = ?query.owner, offset = ?query.offset, limit = ?query.limit))]
	pub async fn list_permissions_page(
		&self,
		query: &PermissionQuery,
	) -> Result<Vec<Permission>, DbError> {
		let mut builder =
			QueryBuilder::<Sqlite>::new(format!("SELECT {SELECT_COLUMNS} FROM {}", self.table));
		query.push_filters(&mut builder)?;
		query.push_order_and_page(&mut builder)?;

		let rows = builder.build().fetch_all(&self.pool).await?;
		let permissions: Result<Vec<_>, _> = rows.iter().map(row_to_permission).collect();
		let permissions = permissions?;

		tracing::debug!(count = permissions.len(), "listed permissions");
		Ok(permissions)
	}

	/// Get a permission by owner and name.
	///
	/// # Returns
	/// `None` if either part is empty or no such permission exists.
	#[tracing::instrument(skip(self))]
	pub async fn get_permission(
		&self,
		owner: &str,
		name: &str,
	) -> Result<Option<Permission>, DbError> {
		if owner.is_empty() || name.is_empty() {
			return Ok(None);
		}

		let row = sqlx::query(&format!(
			"SELECT {SELECT_COLUMNS} FROM {} WHERE owner = ? AND name = ?",
			self.table
		))
		.bind(owner)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(row_to_permission).transpose()
	}

	/// Insert a permission.
	///
	/// # Returns
	/// `true` if exactly one row was inserted.
	///
	/// # Errors
	/// Returns `DbError::Sqlx` if the insert fails (e.g., duplicate owner/name).
	#[tracing::instrument(skip(self, permission), fields(owner = %permission.owner, name = %permission.name))]
	pub async fn create_permission(&self, permission: &Permission) -> Result<bool, DbError> {
		let result = sqlx::query(&format!(
			r#"
			INSERT INTO {} (owner, name, created_time, display_name, users, roles, resource_type, resources, actions, effect, is_enabled)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
			self.table
		))
		.bind(&permission.owner)
		.bind(&permission.name)
		.bind(permission.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
		.bind(&permission.display_name)
		.bind(serde_json::to_string(&permission.users)?)
		.bind(serde_json::to_string(&permission.roles)?)
		.bind(&permission.resource_type)
		.bind(serde_json::to_string(&permission.resources)?)
		.bind(serde_json::to_string(&permission.actions)?)
		.bind(permission.effect.as_str())
		.bind(permission.is_enabled)
		.execute(&self.pool)
		.await?;

		tracing::debug!(owner = %permission.owner, name = %permission.name, "permission created");
		Ok(result.rows_affected() == 1)
	}

	/// Overwrite the permission stored at `id`.
	///
	/// Every column except `created_time` is replaced, including `owner` and
	/// `name`, so this can rename a permission.
	///
	/// # Returns
	/// `true` if a row was updated; `false` if nothing exists at `id`.
	#[tracing::instrument(skip(self, permission), fields(id = %id))]
	pub async fn update_permission(
		&self,
		id: &PermissionId,
		permission: &Permission,
	) -> Result<bool, DbError> {
		let result = sqlx::query(&format!(
			r#"
			UPDATE {}
			SET owner = ?, name = ?, display_name = ?, users = ?, roles = ?, resource_type = ?,
				resources = ?, actions = ?, effect = ?, is_enabled = ?
			WHERE owner = ? AND name = ?
			"#,
			self.table
		))
		.bind(&permission.owner)
		.bind(&permission.name)
		.bind(&permission.display_name)
		.bind(serde_json::to_string(&permission.users)?)
		.bind(serde_json::to_string(&permission.roles)?)
		.bind(&permission.resource_type)
		.bind(serde_json::to_string(&permission.resources)?)
		.bind(serde_json::to_string(&permission.actions)?)
		.bind(permission.effect.as_str())
		.bind(permission.is_enabled)
		.bind(&id.owner)
		.bind(&id.name)
		.execute(&self.pool)
		.await?;

		let updated = result.rows_affected() != 0;
		tracing::debug!(id = %id, updated, "permission update applied");
		Ok(updated)
	}

	/// Delete a permission by composite key.
	///
	/// # Returns
	/// `true` if a row was removed.
	#[tracing::instrument(skip(self), fields(id = %id))]
	pub async fn delete_permission(&self, id: &PermissionId) -> Result<bool, DbError> {
		let result = sqlx::query(&format!(
			"DELETE FROM {} WHERE owner = ? AND name = ?",
			self.table
		))
		.bind(&id.owner)
		.bind(&id.name)
		.execute(&self.pool)
		.await?;

		let deleted = result.rows_affected() != 0;
		tracing::debug!(id = %id, deleted, "permission delete applied");
		Ok(deleted)
	}
}

fn row_to_permission(row: &sqlx::sqlite::SqliteRow) -> Result<Permission, DbError> {
	let created_time: String = row.get("created_time");
	let users: String = row.get("users");
	let roles: String = row.get("roles");
	let resources: String = row.get("resources");
	let actions: String = row.get("actions");
	let effect: String = row.get("effect");

	Ok(Permission {
		owner: row.get("owner"),
		name: row.get("name"),
		created_at: DateTime::parse_from_rfc3339(&created_time)
			.map_err(|e| DbError::Internal(format!("Invalid created_time: {e}")))?
			.with_timezone(&Utc),
		display_name: row.get("display_name"),
		users: serde_json::from_str(&users)?,
		roles: serde_json::from_str(&roles)?,
		resource_type: row.get("resource_type"),
		resources: serde_json::from_str(&resources)?,
		actions: serde_json::from_str(&actions)?,
		effect: effect
			.parse()
			.map_err(|e| DbError::Internal(format!("Invalid effect: {e}")))?,
		is_enabled: row.get("is_enabled"),
	})
}

#[async_trait]
impl PermissionStore for PermissionRepository {
	async fn count_permissions(&self, query: &PermissionQuery) -> Result<i64, DbError> {
		self.count_permissions(query).await
	}

	async fn list_permissions(&self, owner: Option<&str>) -> Result<Vec<Permission>, DbError> {
		self.list_permissions(owner).await
	}

	async fn list_permissions_page(
		&self,
		query: &PermissionQuery,
	) -> Result<Vec<Permission>, DbError> {
		self.list_permissions_page(query).await
	}

	async fn get_permission(&self, owner: &str, name: &str) -> Result<Option<Permission>, DbError> {
		self.get_permission(owner, name).await
	}

	async fn create_permission(&self, permission: &Permission) -> Result<bool, DbError> {
		self.create_permission(permission).await
	}

	async fn update_permission(
		&self,
		id: &PermissionId,
		permission: &Permission,
	) -> Result<bool, DbError> {
		self.update_permission(id, permission).await
	}

	async fn delete_permission(&self, id: &PermissionId) -> Result<bool, DbError> {
		self.delete_permission(id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_permission_test_pool;
	use chrono::Duration;
	use loom_permissions_core::Effect;

	async fn make_repo() -> PermissionRepository {
		let tables = TableNames::default();
		let pool = create_permission_test_pool(&tables).await;
		PermissionRepository::new(pool, &tables)
	}

	fn strings(values: &[&str]) -> Vec<String> {
		values.iter().map(|v| v.to_string()).collect()
	}

	fn make_permission(owner: &str, name: &str, minutes_ago: i64) -> Permission {
		let mut permission = Permission::new(owner, name);
		permission.created_at = Utc::now() - Duration::minutes(minutes_ago);
		permission.display_name = format!("Permission {name}");
		permission.users = strings(&[format!("{owner}/alice").as_str()]);
		permission.resources = strings(&["app-1"]);
		permission.actions = strings(&["Read"]);
		permission
	}

	#[tokio::test]
	async fn test_create_and_get_permission() {
		let repo = make_repo().await;
		let mut permission = make_permission("o1", "p1", 0);
		permission.roles = strings(&["o1/admins"]);
		permission.resource_type = "Application".to_string();
		permission.effect = Effect::Deny;
		permission.is_enabled = false;

		assert!(repo.create_permission(&permission).await.unwrap());

		let fetched = repo.get_permission("o1", "p1").await.unwrap().unwrap();
		assert_eq!(fetched.owner, "o1");
		assert_eq!(fetched.name, "p1");
		assert_eq!(fetched.users, strings(&["o1/alice"]));
		assert_eq!(fetched.roles, strings(&["o1/admins"]));
		assert_eq!(fetched.actions, strings(&["Read"]));
		assert_eq!(fetched.resource_type, "Application");
		assert_eq!(fetched.effect, Effect::Deny);
		assert!(!fetched.is_enabled);
		assert_eq!(fetched.created_at.timestamp(), permission.created_at.timestamp());
	}

	#[tokio::test]
	async fn test_enabled_flag_stored_as_integer_and_updated() {
		let repo = make_repo().await;
		let mut permission = make_permission("o1", "p1", 0);
		assert!(repo.create_permission(&permission).await.unwrap());

		let raw: i64 = sqlx::query_scalar(&format!(
			"SELECT is_enabled FROM {} WHERE owner = 'o1' AND name = 'p1'",
			repo.table
		))
		.fetch_one(&repo.pool)
		.await
		.unwrap();
		assert_eq!(raw, 1);
		assert!(repo.get_permission("o1", "p1").await.unwrap().unwrap().is_enabled);

		permission.is_enabled = false;
		let id = PermissionId::new("o1", "p1");
		assert!(repo.update_permission(&id, &permission).await.unwrap());

		let raw: i64 = sqlx::query_scalar(&format!(
			"SELECT is_enabled FROM {} WHERE owner = 'o1' AND name = 'p1'",
			repo.table
		))
		.fetch_one(&repo.pool)
		.await
		.unwrap();
		assert_eq!(raw, 0);
		assert!(!repo.get_permission("o1", "p1").await.unwrap().unwrap().is_enabled);
	}

	#[tokio::test]
	async fn test_get_permission_not_found() {
		let repo = make_repo().await;
		assert!(repo.get_permission("o1", "missing").await.unwrap().is_none());
		assert!(repo.get_permission("", "p1").await.unwrap().is_none());
		assert!(repo.get_permission("o1", "").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_create_duplicate_is_an_error() {
		let repo = make_repo().await;
		let permission = make_permission("o1", "p1", 0);
		repo.create_permission(&permission).await.unwrap();

		let result = repo.create_permission(&permission).await;
		assert!(matches!(result, Err(DbError::Sqlx(_))));
	}

	#[tokio::test]
	async fn test_update_overwrites_columns_but_not_created_time() {
		let repo = make_repo().await;
		let original = make_permission("o1", "p1", 60);
		repo.create_permission(&original).await.unwrap();

		let mut changed = original.clone();
		changed.created_at = Utc::now();
		changed.resources = strings(&["app-2", "app-3"]);
		changed.display_name = "Renamed".to_string();

		assert!(repo.update_permission(&original.id(), &changed).await.unwrap());

		let fetched = repo.get_permission("o1", "p1").await.unwrap().unwrap();
		assert_eq!(fetched.resources, strings(&["app-2", "app-3"]));
		assert_eq!(fetched.display_name, "Renamed");
		assert_eq!(fetched.created_at.timestamp(), original.created_at.timestamp());
	}

	#[tokio::test]
	async fn test_update_can_rename() {
		let repo = make_repo().await;
		let original = make_permission("o1", "p1", 0);
		repo.create_permission(&original).await.unwrap();

		let mut renamed = original.clone();
		renamed.name = "p2".to_string();
		assert!(repo.update_permission(&original.id(), &renamed).await.unwrap());

		assert!(repo.get_permission("o1", "p1").await.unwrap().is_none());
		assert!(repo.get_permission("o1", "p2").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_update_missing_returns_false() {
		let repo = make_repo().await;
		let permission = make_permission("o1", "p1", 0);
		assert!(!repo
			.update_permission(&permission.id(), &permission)
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_delete_permission() {
		let repo = make_repo().await;
		let permission = make_permission("o1", "p1", 0);
		repo.create_permission(&permission).await.unwrap();

		assert!(repo.delete_permission(&permission.id()).await.unwrap());
		assert!(!repo.delete_permission(&permission.id()).await.unwrap());
		assert!(repo.get_permission("o1", "p1").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_list_permissions_newest_first() {
		let repo = make_repo().await;
		repo.create_permission(&make_permission("o1", "old", 30))
			.await
			.unwrap();
		repo.create_permission(&make_permission("o1", "new", 1))
			.await
			.unwrap();
		repo.create_permission(&make_permission("o2", "other", 10))
			.await
			.unwrap();

		let names: Vec<_> = repo
			.list_permissions(Some("o1"))
			.await
			.unwrap()
			.into_iter()
			.map(|p| p.name)
			.collect();
		assert_eq!(names, vec!["new", "old"]);

		let all = repo.list_permissions(None).await.unwrap();
		assert_eq!(all.len(), 3);
		assert_eq!(all[1].name, "other");
	}

	#[tokio::test]
	async fn test_count_and_page_with_search() {
		let repo = make_repo().await;
		for i in 0..5 {
			let mut permission = make_permission("o1", &format!("p{i}"), i);
			if i % 2 == 0 {
				permission.display_name = format!("Reports {i}");
			}
			repo.create_permission(&permission).await.unwrap();
		}

		let query = PermissionQuery::new().owner("o1").search("displayName", "Reports");
		assert_eq!(repo.count_permissions(&query).await.unwrap(), 3);
		assert_eq!(
			repo.count_permissions(&PermissionQuery::new()).await.unwrap(),
			5
		);

		let page = repo
			.list_permissions_page(&query.clone().sort("name", "ascend").page(1, 1))
			.await
			.unwrap();
		assert_eq!(page.len(), 1);
		assert_eq!(page[0].name, "p2");
	}

	#[tokio::test]
	async fn test_prefixed_tables_are_used() {
		let tables = TableNames::with_prefix("casbin_").unwrap();
		let pool = create_permission_test_pool(&tables).await;
		let repo = PermissionRepository::new(pool.clone(), &tables);

		repo.create_permission(&make_permission("o1", "p1", 0))
			.await
			.unwrap();

		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM casbin_permission")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(count, 1);
	}
}
