//! Per-request context: authenticated claims, the secrets store, and the
//! cancellation token owned by the request.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cnf;

/// The authenticated-context shape consumed by policies and injections.
///
/// Owned by exactly one in-flight request. Cancelling the token abandons
/// every dispatch the request has not yet committed.
#[derive(Debug, Clone)]
pub struct RequestContext {
	/// Claims decoded from the `Authorization` header; empty when anonymous
	pub claims: serde_json::Map<String, Value>,
	/// Peer address, the rate-limit identity fallback
	pub peer_addr: Option<String>,
	/// Secrets for the active typegraph generation
	pub secrets: Arc<SecretStore>,
	pub cancellation: CancellationToken,
	pub request_id: Uuid,
}

impl RequestContext {
	pub fn new(
		claims: serde_json::Map<String, Value>,
		peer_addr: Option<String>,
		secrets: Arc<SecretStore>,
	) -> Self {
		Self {
			claims,
			peer_addr,
			secrets,
			cancellation: CancellationToken::new(),
			request_id: Uuid::new_v4(),
		}
	}

	pub fn anonymous(secrets: Arc<SecretStore>) -> Self {
		Self::new(serde_json::Map::new(), None, secrets)
	}

	/// Look up a claim; dotted keys traverse nested objects.
	pub fn claim(&self, key: &str) -> Option<&Value> {
		let mut segments = key.split('.');
		let mut current = self.claims.get(segments.next()?)?;
		for segment in segments {
			current = current.as_object()?.get(segment)?;
		}
		Some(current)
	}

	/// The rate-limit identity: a configured claim when present, else the
	/// peer address, else a shared anonymous bucket.
	pub fn identity(&self, claim_key: Option<&str>) -> String {
		if let Some(key) = claim_key {
			if let Some(value) = self.claim(key) {
				return match value {
					Value::String(s) => s.clone(),
					other => other.to_string(),
				};
			}
		}
		self.peer_addr.clone().unwrap_or_else(|| "anonymous".to_string())
	}

	pub fn cancel(&self) {
		self.cancellation.cancel();
	}
}

/// Key-value secrets, scoped by typegraph name.
#[derive(Debug, Default)]
pub struct SecretStore {
	values: HashMap<String, String>,
}

impl SecretStore {
	/// Collect secrets for a typegraph from the process environment.
	///
	/// A typegraph named `demo` reads every `TYPEWIRE_SECRET_DEMO_<KEY>`.
	pub fn from_env(typegraph_name: &str) -> Self {
		let prefix = format!("{}_{}_", cnf::SECRET_ENV_PREFIX, sanitize(typegraph_name));
		let values = std::env::vars()
			.filter_map(|(key, value)| {
				key.strip_prefix(&prefix).map(|name| (name.to_string(), value))
			})
			.collect();
		Self {
			values,
		}
	}

	pub fn with_values(values: HashMap<String, String>) -> Self {
		Self {
			values,
		}
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.values.get(key).map(String::as_str)
	}
}

fn sanitize(name: &str) -> String {
	name.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() {
				c.to_ascii_uppercase()
			} else {
				'_'
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn claims_support_dotted_paths() {
		let claims = serde_json::json!({
			"sub": "user-1",
			"profile": {"role": "admin"},
		});
		let ctx = RequestContext::new(
			claims.as_object().unwrap().clone(),
			None,
			Arc::new(SecretStore::default()),
		);
		assert_eq!(ctx.claim("sub").unwrap(), "user-1");
		assert_eq!(ctx.claim("profile.role").unwrap(), "admin");
		assert!(ctx.claim("profile.missing").is_none());
	}

	#[test]
	fn identity_prefers_claim_then_peer() {
		let claims = serde_json::json!({"sub": "user-1"});
		let ctx = RequestContext::new(
			claims.as_object().unwrap().clone(),
			Some("10.0.0.9".to_string()),
			Arc::new(SecretStore::default()),
		);
		assert_eq!(ctx.identity(Some("sub")), "user-1");
		assert_eq!(ctx.identity(Some("missing")), "10.0.0.9");
		assert_eq!(ctx.identity(None), "10.0.0.9");

		let anon = RequestContext::anonymous(Arc::new(SecretStore::default()));
		assert_eq!(anon.identity(None), "anonymous");
	}

	#[test]
	fn secrets_read_from_scoped_env() {
		unsafe { std::env::set_var("TYPEWIRE_SECRET_DEMO_API_KEY", "s3cret") };
		let store = SecretStore::from_env("demo");
		assert_eq!(store.get("API_KEY"), Some("s3cret"));
		assert!(store.get("OTHER").is_none());
		unsafe { std::env::remove_var("TYPEWIRE_SECRET_DEMO_API_KEY") };
	}

	#[test]
	fn typegraph_names_are_sanitized() {
		assert_eq!(sanitize("my-graph.v2"), "MY_GRAPH_V2");
	}
}
