//! Upstream HTTP/REST adapter: materializer config maps a field onto a
//! method + path template, arguments fill path placeholders, query params or
//! the JSON body.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{DispatchCall, RuntimeAdapter, runtime_err};
use crate::cnf;
use crate::ctx::RequestContext;

pub struct HttpAdapter {
	name: String,
	endpoint: String,
	client: reqwest::Client,
	headers: Vec<(String, String)>,
}

impl HttpAdapter {
	pub fn new(name: &str, config: &serde_json::Map<String, Value>) -> Result<Self> {
		let endpoint = config
			.get("endpoint")
			.and_then(Value::as_str)
			.ok_or_else(|| runtime_err(name, "http runtime config requires an 'endpoint'"))?
			.trim_end_matches('/')
			.to_string();
		let headers = config
			.get("headers")
			.and_then(Value::as_object)
			.map(|map| {
				map.iter()
					.filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
					.collect()
			})
			.unwrap_or_default();
		let client = reqwest::Client::builder()
			.timeout(Duration::from_millis(*cnf::UPSTREAM_TIMEOUT_MS))
			.build()
			.map_err(|e| runtime_err(name, e))?;
		Ok(Self {
			name: name.to_string(),
			endpoint,
			client,
			headers,
		})
	}
}

#[async_trait]
impl RuntimeAdapter for HttpAdapter {
	fn name(&self) -> &str {
		&self.name
	}

	async fn dispatch(&self, call: DispatchCall, _ctx: &RequestContext) -> Result<Value> {
		let method = call
			.data
			.get("method")
			.and_then(Value::as_str)
			.unwrap_or("GET")
			.to_ascii_uppercase();
		let path = call
			.data
			.get("path")
			.and_then(Value::as_str)
			.ok_or_else(|| runtime_err(&self.name, "materializer config requires a 'path'"))?;
		let (path, consumed) = substitute_path(path, &call.args);
		let url = format!("{}{}", self.endpoint, path);

		let mut request = match method.as_str() {
			"GET" => self.client.get(&url),
			"DELETE" => self.client.delete(&url),
			"POST" => self.client.post(&url),
			"PUT" => self.client.put(&url),
			"PATCH" => self.client.patch(&url),
			other => return Err(runtime_err(&self.name, format!("unsupported method '{other}'"))),
		};
		for (k, v) in &self.headers {
			request = request.header(k, v);
		}

		// Remaining args travel as query params for reads, JSON body otherwise.
		let remaining: serde_json::Map<String, Value> = call
			.args
			.iter()
			.filter(|(k, _)| !consumed.contains(k.as_str()))
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();
		if matches!(method.as_str(), "GET" | "DELETE") {
			let query: Vec<(String, String)> =
				remaining.iter().map(|(k, v)| (k.clone(), query_repr(v))).collect();
			request = request.query(&query);
		} else {
			request = request.json(&Value::Object(remaining));
		}

		trace!(runtime = %self.name, %method, %url, "dispatching upstream http call");
		let response = request.send().await.map_err(|e| runtime_err(&self.name, e))?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(runtime_err(&self.name, format!("upstream returned {status}: {body}")));
		}
		let bytes = response.bytes().await.map_err(|e| runtime_err(&self.name, e))?;
		if bytes.is_empty() {
			return Ok(Value::Null);
		}
		serde_json::from_slice(&bytes)
			.map_err(|e| runtime_err(&self.name, format!("upstream body was not JSON: {e}")))
	}
}

/// Fill `{placeholder}` segments from the args, returning the substituted
/// path and the set of consumed argument names.
fn substitute_path<'a>(
	template: &str,
	args: &'a serde_json::Map<String, Value>,
) -> (String, HashSet<&'a str>) {
	let mut out = String::with_capacity(template.len());
	let mut consumed = HashSet::new();
	let mut rest = template;
	while let Some(open) = rest.find('{') {
		out.push_str(&rest[..open]);
		match rest[open..].find('}') {
			Some(close) => {
				let key = &rest[open + 1..open + close];
				match args.get_key_value(key) {
					Some((k, v)) => {
						consumed.insert(k.as_str());
						out.push_str(&query_repr(v));
					}
					None => {
						// Leave unknown placeholders visible for debugging.
						out.push_str(&rest[open..open + close + 1]);
					}
				}
				rest = &rest[open + close + 1..];
			}
			None => {
				out.push_str(&rest[open..]);
				rest = "";
			}
		}
	}
	out.push_str(rest);
	(out, consumed)
}

/// Scalar rendering for URLs: bare strings, JSON for everything else.
fn query_repr(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn path_placeholders_consume_args() {
		let args = serde_json::json!({"id": 7, "tab": "posts"});
		let (path, consumed) = substitute_path("/users/{id}/{tab}", args.as_object().unwrap());
		assert_eq!(path, "/users/7/posts");
		assert_eq!(consumed.len(), 2);
	}

	#[test]
	fn unknown_placeholder_is_left_in_place() {
		let args = serde_json::json!({});
		let (path, consumed) = substitute_path("/users/{id}", args.as_object().unwrap());
		assert_eq!(path, "/users/{id}");
		assert!(consumed.is_empty());
	}

	#[test]
	fn query_repr_keeps_strings_bare() {
		assert_eq!(query_repr(&serde_json::json!("abc")), "abc");
		assert_eq!(query_repr(&serde_json::json!(12)), "12");
		assert_eq!(query_repr(&serde_json::json!(true)), "true");
	}

	#[test]
	fn endpoint_is_required() {
		assert!(HttpAdapter::new("api", &serde_json::Map::new()).is_err());
	}
}
