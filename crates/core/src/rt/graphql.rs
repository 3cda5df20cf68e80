//! Upstream GraphQL adapter. Sibling calls that share a wave collapse into
//! one upstream document with synthetic aliases, so several
//! `FromParent`-driven lookups cost a single round trip.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{DispatchCall, RuntimeAdapter, runtime_err};
use crate::cnf;
use crate::ctx::RequestContext;
use crate::typegraph::Effect;

pub struct GraphqlAdapter {
	name: String,
	endpoint: String,
	client: reqwest::Client,
}

impl GraphqlAdapter {
	pub fn new(name: &str, config: &serde_json::Map<String, Value>) -> Result<Self> {
		let endpoint = config
			.get("endpoint")
			.and_then(Value::as_str)
			.ok_or_else(|| runtime_err(name, "graphql runtime config requires an 'endpoint'"))?
			.to_string();
		let client = reqwest::Client::builder()
			.timeout(Duration::from_millis(*cnf::UPSTREAM_TIMEOUT_MS))
			.build()
			.map_err(|e| runtime_err(name, e))?;
		Ok(Self {
			name: name.to_string(),
			endpoint,
			client,
		})
	}

	async fn post(&self, document: String) -> Result<Value> {
		trace!(runtime = %self.name, %document, "dispatching upstream graphql document");
		let response = self
			.client
			.post(&self.endpoint)
			.json(&serde_json::json!({"query": document}))
			.send()
			.await
			.map_err(|e| runtime_err(&self.name, e))?;
		let status = response.status();
		if !status.is_success() {
			return Err(runtime_err(&self.name, format!("upstream returned {status}")));
		}
		response.json().await.map_err(|e| runtime_err(&self.name, e))
	}
}

#[async_trait]
impl RuntimeAdapter for GraphqlAdapter {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports_batching(&self) -> bool {
		true
	}

	async fn dispatch(&self, call: DispatchCall, ctx: &RequestContext) -> Result<Value> {
		let mut results = self.dispatch_batch(vec![call], ctx).await;
		results.pop().unwrap_or_else(|| {
			Err(runtime_err(&self.name, "batch dispatch returned no result"))
		})
	}

	async fn dispatch_batch(
		&self,
		calls: Vec<DispatchCall>,
		_ctx: &RequestContext,
	) -> Vec<Result<Value>> {
		let document = build_document(&calls);
		let envelope = match self.post(document).await {
			Ok(envelope) => envelope,
			Err(err) => {
				// One failed round trip fails every collapsed call.
				let message = err.to_string();
				return calls
					.iter()
					.map(|_| Err(runtime_err(&self.name, message.clone())))
					.collect();
			}
		};
		split_response(&self.name, calls.len(), &envelope)
	}
}

/// The upstream field name: explicit `field` config, else the op name.
fn field_name(call: &DispatchCall) -> String {
	call.data
		.get("field")
		.and_then(Value::as_str)
		.unwrap_or(call.op_name.as_str())
		.to_string()
}

/// Collapse a group of calls into one upstream document with positional
/// aliases `q0..qN`.
pub(crate) fn build_document(calls: &[DispatchCall]) -> String {
	let kind = match calls.first().map(|c| c.effect) {
		Some(Effect::None) | None => "query",
		_ => "mutation",
	};
	let mut doc = String::from(kind);
	doc.push_str(" {");
	for (index, call) in calls.iter().enumerate() {
		doc.push_str(&format!(" q{index}: {}", field_name(call)));
		doc.push_str(&render_args(&call.args));
		if let Some(selection) = &call.selection {
			doc.push(' ');
			doc.push_str(selection);
		}
	}
	doc.push_str(" }");
	doc
}

/// Split a standard GraphQL response envelope back into per-call results,
/// attributing upstream errors by their alias path.
pub(crate) fn split_response(runtime: &str, count: usize, envelope: &Value) -> Vec<Result<Value>> {
	let data = envelope.get("data");
	let errors = envelope.get("errors").and_then(Value::as_array);
	(0..count)
		.map(|index| {
			let alias = format!("q{index}");
			if let Some(errors) = errors {
				let matching = errors.iter().find(|e| {
					e.get("path").and_then(Value::as_array).and_then(|p| p.first())
						== Some(&Value::String(alias.clone()))
				});
				if let Some(error) = matching {
					let message = error
						.get("message")
						.and_then(Value::as_str)
						.unwrap_or("upstream error");
					return Err(runtime_err(runtime, message));
				}
			}
			match data.and_then(|d| d.get(&alias)) {
				Some(value) => Ok(value.clone()),
				None => Err(runtime_err(runtime, format!("upstream returned no '{alias}' entry"))),
			}
		})
		.collect()
}

/// Render an argument map as a GraphQL argument list, empty when no args.
fn render_args(args: &serde_json::Map<String, Value>) -> String {
	if args.is_empty() {
		return String::new();
	}
	let rendered: Vec<String> =
		args.iter().map(|(k, v)| format!("{k}: {}", render_value(v))).collect();
	format!("({})", rendered.join(", "))
}

/// Render a JSON value as a GraphQL literal.
pub(crate) fn render_value(value: &Value) -> String {
	match value {
		Value::Null => "null".to_string(),
		Value::Bool(b) => b.to_string(),
		Value::Number(n) => n.to_string(),
		Value::String(s) => format!("{s:?}"),
		Value::Array(items) => {
			let rendered: Vec<String> = items.iter().map(render_value).collect();
			format!("[{}]", rendered.join(", "))
		}
		Value::Object(map) => {
			let rendered: Vec<String> =
				map.iter().map(|(k, v)| format!("{k}: {}", render_value(v))).collect();
			format!("{{{}}}", rendered.join(", "))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::typegraph::MaterializerId;

	fn call(field: &str, args: Value, selection: Option<&str>, effect: Effect) -> DispatchCall {
		DispatchCall {
			materializer: MaterializerId(0),
			op_name: field.to_string(),
			data: serde_json::Map::new(),
			effect,
			args: args.as_object().cloned().unwrap_or_default(),
			parent: None,
			selection: selection.map(str::to_string),
		}
	}

	#[test]
	fn literals_render_as_graphql() {
		assert_eq!(render_value(&serde_json::json!(null)), "null");
		assert_eq!(render_value(&serde_json::json!(3)), "3");
		assert_eq!(render_value(&serde_json::json!("a\"b")), "\"a\\\"b\"");
		assert_eq!(render_value(&serde_json::json!([1, "x"])), "[1, \"x\"]");
		assert_eq!(
			render_value(&serde_json::json!({"a": 1, "b": [true]})),
			"{a: 1, b: [true]}"
		);
	}

	#[test]
	fn sibling_calls_collapse_into_one_document() {
		let calls = vec![
			call("user", serde_json::json!({"id": 1}), Some("{ id name }"), Effect::None),
			call("user", serde_json::json!({"id": 2}), Some("{ id name }"), Effect::None),
			call("stats", serde_json::json!({}), None, Effect::None),
		];
		let doc = build_document(&calls);
		assert_eq!(
			doc,
			"query { q0: user(id: 1) { id name } q1: user(id: 2) { id name } q2: stats }"
		);
	}

	#[test]
	fn mutations_build_mutation_documents() {
		let calls = vec![call(
			"createUser",
			serde_json::json!({"name": "ada"}),
			Some("{ id }"),
			Effect::Create,
		)];
		assert_eq!(build_document(&calls), "mutation { q0: createUser(name: \"ada\") { id } }");
	}

	#[test]
	fn split_attributes_aliases_and_errors() {
		let envelope = serde_json::json!({
			"data": {"q0": {"id": 1}, "q1": null},
			"errors": [{"message": "not found", "path": ["q1"]}],
		});
		let results = split_response("up", 2, &envelope);
		assert_eq!(results[0].as_ref().unwrap(), &serde_json::json!({"id": 1}));
		assert!(results[1].as_ref().unwrap_err().to_string().contains("not found"));
	}

	#[test]
	fn split_reports_missing_aliases() {
		let envelope = serde_json::json!({"data": {}});
		let results = split_response("up", 1, &envelope);
		assert!(results[0].as_ref().unwrap_err().to_string().contains("q0"));
	}
}
