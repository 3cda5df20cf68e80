//! Runtime definitions. One logical runtime instance is shared by every
//! materializer that references it, which is what makes call batching
//! possible.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a runtime within one typegraph generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId(pub u32);

impl RuntimeId {
	pub fn index(&self) -> usize {
		self.0 as usize
	}
}

impl fmt::Display for RuntimeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Kinds of backend executors the gateway can dispatch into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
	/// Static values and echoes; used for public data and tests
	Value,
	/// Sandboxed user functions behind the wit-wire host protocol
	Wire,
	/// A plain HTTP/REST upstream
	Http,
	/// An upstream GraphQL API
	GraphqlUpstream,
	/// A database behind the narrow native database service
	Database,
	/// An object store bucket
	ObjectStore,
	/// A workflow engine behind the narrow native workflow service
	Workflow,
}

impl fmt::Display for RuntimeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Value => write!(f, "value"),
			Self::Wire => write!(f, "wire"),
			Self::Http => write!(f, "http"),
			Self::GraphqlUpstream => write!(f, "graphql_upstream"),
			Self::Database => write!(f, "database"),
			Self::ObjectStore => write!(f, "object_store"),
			Self::Workflow => write!(f, "workflow"),
		}
	}
}

/// A logical backend executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDef {
	pub name: String,
	pub kind: RuntimeKind,
	/// Connection configuration, e.g. an endpoint or module artifact
	#[serde(default)]
	pub config: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn runtime_kind_snake_case() {
		let kind: RuntimeKind = serde_json::from_value(serde_json::json!("graphql_upstream")).unwrap();
		assert_eq!(kind, RuntimeKind::GraphqlUpstream);
		assert_eq!(kind.to_string(), "graphql_upstream");
	}
}
