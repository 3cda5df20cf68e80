//! Narrow database service and its adapter. The engine never builds SQL; it
//! hands row-level operations to whatever implements [`DatabaseService`]
//! (the production implementation wraps the native database bridge, tests
//! use [`MemoryDatabase`]).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::{DispatchCall, RuntimeAdapter, runtime_err};
use crate::ctx::RequestContext;

/// Row-level operations the database runtime translates into.
#[async_trait]
pub trait DatabaseService: Send + Sync {
	async fn find(
		&self,
		table: &str,
		filter: &serde_json::Map<String, Value>,
	) -> Result<Vec<Value>>;
	async fn insert(&self, table: &str, row: serde_json::Map<String, Value>) -> Result<Value>;
	async fn update(
		&self,
		table: &str,
		filter: &serde_json::Map<String, Value>,
		patch: serde_json::Map<String, Value>,
	) -> Result<Vec<Value>>;
	async fn delete(&self, table: &str, filter: &serde_json::Map<String, Value>) -> Result<u64>;
}

/// In-memory tables with exact-match filtering.
#[derive(Default)]
pub struct MemoryDatabase {
	tables: DashMap<String, Vec<Value>>,
}

fn matches(row: &Value, filter: &serde_json::Map<String, Value>) -> bool {
	filter.iter().all(|(k, v)| row.get(k) == Some(v))
}

#[async_trait]
impl DatabaseService for MemoryDatabase {
	async fn find(
		&self,
		table: &str,
		filter: &serde_json::Map<String, Value>,
	) -> Result<Vec<Value>> {
		Ok(self
			.tables
			.get(table)
			.map(|rows| rows.iter().filter(|r| matches(r, filter)).cloned().collect())
			.unwrap_or_default())
	}

	async fn insert(&self, table: &str, mut row: serde_json::Map<String, Value>) -> Result<Value> {
		row.entry("id".to_string())
			.or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
		let row = Value::Object(row);
		self.tables.entry(table.to_string()).or_default().push(row.clone());
		Ok(row)
	}

	async fn update(
		&self,
		table: &str,
		filter: &serde_json::Map<String, Value>,
		patch: serde_json::Map<String, Value>,
	) -> Result<Vec<Value>> {
		let mut updated = Vec::new();
		if let Some(mut rows) = self.tables.get_mut(table) {
			for row in rows.iter_mut() {
				if matches(row, filter) {
					if let Value::Object(map) = row {
						for (k, v) in &patch {
							map.insert(k.clone(), v.clone());
						}
					}
					updated.push(row.clone());
				}
			}
		}
		Ok(updated)
	}

	async fn delete(&self, table: &str, filter: &serde_json::Map<String, Value>) -> Result<u64> {
		let mut removed = 0;
		if let Some(mut rows) = self.tables.get_mut(table) {
			rows.retain(|row| {
				if matches(row, filter) {
					removed += 1;
					false
				} else {
					true
				}
			});
		}
		Ok(removed)
	}
}

/// Adapter translating materializer calls into service operations.
pub struct DatabaseAdapter {
	name: String,
	service: Arc<dyn DatabaseService>,
}

impl DatabaseAdapter {
	pub fn new(name: &str, service: Arc<dyn DatabaseService>) -> Self {
		Self {
			name: name.to_string(),
			service,
		}
	}
}

fn object_arg(
	args: &serde_json::Map<String, Value>,
	key: &str,
) -> serde_json::Map<String, Value> {
	args.get(key).and_then(Value::as_object).cloned().unwrap_or_default()
}

#[async_trait]
impl RuntimeAdapter for DatabaseAdapter {
	fn name(&self) -> &str {
		&self.name
	}

	async fn dispatch(&self, call: DispatchCall, _ctx: &RequestContext) -> Result<Value> {
		let table = call
			.data
			.get("table")
			.and_then(Value::as_str)
			.ok_or_else(|| runtime_err(&self.name, "materializer config requires a 'table'"))?;
		let operation = call
			.data
			.get("operation")
			.and_then(Value::as_str)
			.unwrap_or(call.op_name.as_str());
		let filter = object_arg(&call.args, "where");
		match operation {
			"find_many" => Ok(Value::Array(self.service.find(table, &filter).await?)),
			"find_first" => Ok(self
				.service
				.find(table, &filter)
				.await?
				.into_iter()
				.next()
				.unwrap_or(Value::Null)),
			"create_one" => self.service.insert(table, object_arg(&call.args, "data")).await,
			"update_many" => Ok(Value::Array(
				self.service.update(table, &filter, object_arg(&call.args, "data")).await?,
			)),
			"delete_many" => {
				let count = self.service.delete(table, &filter).await?;
				Ok(serde_json::json!({"count": count}))
			}
			other => Err(runtime_err(&self.name, format!("unknown database op '{other}'"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn insert_find_update_delete_cycle() {
		let db = MemoryDatabase::default();
		let row = db
			.insert("users", serde_json::json!({"name": "ada"}).as_object().unwrap().clone())
			.await
			.unwrap();
		assert!(row.get("id").is_some(), "inserts assign ids");

		let found = db
			.find("users", serde_json::json!({"name": "ada"}).as_object().unwrap())
			.await
			.unwrap();
		assert_eq!(found.len(), 1);

		let updated = db
			.update(
				"users",
				serde_json::json!({"name": "ada"}).as_object().unwrap(),
				serde_json::json!({"name": "lovelace"}).as_object().unwrap().clone(),
			)
			.await
			.unwrap();
		assert_eq!(updated[0]["name"], "lovelace");

		let removed = db
			.delete("users", serde_json::json!({"name": "lovelace"}).as_object().unwrap())
			.await
			.unwrap();
		assert_eq!(removed, 1);
		assert!(db.find("users", &serde_json::Map::new()).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn adapter_routes_operations() {
		let service = Arc::new(MemoryDatabase::default());
		let adapter = DatabaseAdapter::new("db", service);
		let ctx = RequestContext::anonymous(Arc::new(crate::ctx::SecretStore::default()));

		let create = DispatchCall {
			materializer: crate::typegraph::MaterializerId(0),
			op_name: "create_one".to_string(),
			data: serde_json::json!({"table": "posts"}).as_object().unwrap().clone(),
			effect: crate::typegraph::Effect::Create,
			args: serde_json::json!({"data": {"title": "hi"}}).as_object().unwrap().clone(),
			parent: None,
			selection: None,
		};
		let created = adapter.dispatch(create, &ctx).await.unwrap();
		assert_eq!(created["title"], "hi");

		let find = DispatchCall {
			materializer: crate::typegraph::MaterializerId(1),
			op_name: "find_many".to_string(),
			data: serde_json::json!({"table": "posts"}).as_object().unwrap().clone(),
			effect: crate::typegraph::Effect::None,
			args: serde_json::Map::new(),
			parent: None,
			selection: None,
		};
		let rows = adapter.dispatch(find, &ctx).await.unwrap();
		assert_eq!(rows.as_array().unwrap().len(), 1);
	}
}
