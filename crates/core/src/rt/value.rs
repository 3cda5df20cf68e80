//! Static-value runtime: constants baked into the typegraph and argument
//! echoes. Backs public data, policy constants, and most engine tests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{DispatchCall, RuntimeAdapter, runtime_err};
use crate::ctx::RequestContext;

pub struct ValueAdapter {
	name: String,
}

impl ValueAdapter {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
		}
	}
}

#[async_trait]
impl RuntimeAdapter for ValueAdapter {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports_batching(&self) -> bool {
		true
	}

	async fn dispatch(&self, call: DispatchCall, _ctx: &RequestContext) -> Result<Value> {
		// A configured constant wins over named ops.
		if let Some(value) = call.data.get("value") {
			return Ok(value.clone());
		}
		match call.op_name.as_str() {
			"echo" => Ok(Value::Object(call.args)),
			other => Err(runtime_err(&self.name, format!("unknown value op '{other}'"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::ctx::SecretStore;
	use crate::typegraph::{Effect, MaterializerId};

	fn call(data: Value, args: Value, op: &str) -> DispatchCall {
		DispatchCall {
			materializer: MaterializerId(0),
			op_name: op.to_string(),
			data: data.as_object().cloned().unwrap_or_default(),
			effect: Effect::None,
			args: args.as_object().cloned().unwrap_or_default(),
			parent: None,
			selection: None,
		}
	}

	#[tokio::test]
	async fn constant_value() {
		let adapter = ValueAdapter::new("main");
		let ctx = RequestContext::anonymous(Arc::new(SecretStore::default()));
		let out = adapter
			.dispatch(call(serde_json::json!({"value": [1, 2]}), serde_json::json!({}), "value"), &ctx)
			.await
			.unwrap();
		assert_eq!(out, serde_json::json!([1, 2]));
	}

	#[tokio::test]
	async fn echo_returns_args() {
		let adapter = ValueAdapter::new("main");
		let ctx = RequestContext::anonymous(Arc::new(SecretStore::default()));
		let out = adapter
			.dispatch(call(serde_json::json!({}), serde_json::json!({"a": 1}), "echo"), &ctx)
			.await
			.unwrap();
		assert_eq!(out, serde_json::json!({"a": 1}));
	}

	#[tokio::test]
	async fn unknown_op_fails() {
		let adapter = ValueAdapter::new("main");
		let ctx = RequestContext::anonymous(Arc::new(SecretStore::default()));
		assert!(
			adapter
				.dispatch(call(serde_json::json!({}), serde_json::json!({}), "nope"), &ctx)
				.await
				.is_err()
		);
	}
}
