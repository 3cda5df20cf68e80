//! Object storage adapter over the `object_store` crate. Narrow by design:
//! upload, download and list are the only operations the gateway exposes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use serde_json::Value;

use super::{DispatchCall, RuntimeAdapter, runtime_err};
use crate::ctx::RequestContext;

pub struct ObjectStoreAdapter {
	name: String,
	store: Arc<dyn ObjectStore>,
}

impl ObjectStoreAdapter {
	pub fn new(name: &str, store: Arc<dyn ObjectStore>) -> Self {
		Self {
			name: name.to_string(),
			store,
		}
	}

	fn path_arg(&self, call: &DispatchCall) -> Result<ObjectPath> {
		let path = call
			.args
			.get("path")
			.and_then(Value::as_str)
			.ok_or_else(|| runtime_err(&self.name, "object op requires a 'path' argument"))?;
		Ok(ObjectPath::from(path))
	}
}

#[async_trait]
impl RuntimeAdapter for ObjectStoreAdapter {
	fn name(&self) -> &str {
		&self.name
	}

	async fn dispatch(&self, call: DispatchCall, _ctx: &RequestContext) -> Result<Value> {
		match call.op_name.as_str() {
			"upload" => {
				let path = self.path_arg(&call)?;
				let content = call
					.args
					.get("content")
					.and_then(Value::as_str)
					.ok_or_else(|| {
						runtime_err(&self.name, "upload requires a 'content' argument")
					})?;
				self.store
					.put(&path, content.as_bytes().to_vec().into())
					.await
					.map_err(|e| runtime_err(&self.name, e))?;
				Ok(serde_json::json!({"path": path.to_string(), "size": content.len()}))
			}
			"download" => {
				let path = self.path_arg(&call)?;
				let result = self.store.get(&path).await.map_err(|e| runtime_err(&self.name, e))?;
				let bytes = result.bytes().await.map_err(|e| runtime_err(&self.name, e))?;
				let content = String::from_utf8_lossy(&bytes).to_string();
				Ok(serde_json::json!({"path": path.to_string(), "content": content}))
			}
			"list" => {
				let prefix = call
					.args
					.get("prefix")
					.and_then(Value::as_str)
					.map(ObjectPath::from);
				let entries: Vec<Value> = self
					.store
					.list(prefix.as_ref())
					.map_ok(|meta| {
						serde_json::json!({
							"path": meta.location.to_string(),
							"size": meta.size,
						})
					})
					.try_collect()
					.await
					.map_err(|e| runtime_err(&self.name, e))?;
				Ok(Value::Array(entries))
			}
			other => Err(runtime_err(&self.name, format!("unknown object op '{other}'"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ctx::SecretStore;
	use crate::typegraph::{Effect, MaterializerId};

	fn call(op: &str, args: Value) -> DispatchCall {
		DispatchCall {
			materializer: MaterializerId(0),
			op_name: op.to_string(),
			data: serde_json::Map::new(),
			effect: Effect::None,
			args: args.as_object().cloned().unwrap_or_default(),
			parent: None,
			selection: None,
		}
	}

	#[tokio::test]
	async fn upload_download_list_roundtrip() {
		let adapter =
			ObjectStoreAdapter::new("bucket", Arc::new(object_store::memory::InMemory::new()));
		let ctx = RequestContext::anonymous(Arc::new(SecretStore::default()));

		adapter
			.dispatch(
				call("upload", serde_json::json!({"path": "docs/a.txt", "content": "hello"})),
				&ctx,
			)
			.await
			.unwrap();

		let downloaded = adapter
			.dispatch(call("download", serde_json::json!({"path": "docs/a.txt"})), &ctx)
			.await
			.unwrap();
		assert_eq!(downloaded["content"], "hello");

		let listed = adapter
			.dispatch(call("list", serde_json::json!({"prefix": "docs"})), &ctx)
			.await
			.unwrap();
		assert_eq!(listed.as_array().unwrap().len(), 1);
		assert_eq!(listed[0]["path"], "docs/a.txt");
	}

	#[tokio::test]
	async fn download_of_missing_object_fails() {
		let adapter =
			ObjectStoreAdapter::new("bucket", Arc::new(object_store::memory::InMemory::new()));
		let ctx = RequestContext::anonymous(Arc::new(SecretStore::default()));
		assert!(
			adapter
				.dispatch(call("download", serde_json::json!({"path": "missing"})), &ctx)
				.await
				.is_err()
		);
	}
}
