//! Injections supply materializer argument values without client input.
//!
//! `Static`, `Context` and `Secret` resolve immediately and independently of
//! execution order. `FromParent` is the only variant with a data dependency:
//! it stays pending until the nearest ancestor struct carrying the named
//! field has produced a value.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ctx::RequestContext;
use crate::err::Error;

/// An argument value source that bypasses client input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Injection {
	/// A constant baked into the typegraph
	Static {
		value: Value,
	},
	/// A claim from the authenticated request context
	Context {
		key: String,
	},
	/// A secret from the typegraph's secret store
	Secret {
		key: String,
	},
	/// The value an ancestor produced for the named field
	FromParent {
		field: String,
	},
}

/// Outcome of resolving an injection before execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
	Value(Value),
	/// Deferred until the named ancestor field has executed
	Pending {
		field: String,
	},
}

/// Resolve an injection against the request context.
///
/// `optional` marks injections on optional input fields: a missing context
/// claim or secret then resolves to `null` instead of failing the plan.
pub fn resolve(injection: &Injection, ctx: &RequestContext, optional: bool) -> Result<Resolved> {
	match injection {
		Injection::Static {
			value,
		} => Ok(Resolved::Value(value.clone())),
		Injection::Context {
			key,
		} => match ctx.claim(key) {
			Some(value) => Ok(Resolved::Value(value.clone())),
			None if optional => Ok(Resolved::Value(Value::Null)),
			None => Err(anyhow::Error::new(Error::UnknownContextKey(key.clone()))),
		},
		Injection::Secret {
			key,
		} => match ctx.secrets.get(key) {
			Some(value) => Ok(Resolved::Value(Value::String(value.to_string()))),
			None if optional => Ok(Resolved::Value(Value::Null)),
			None => Err(anyhow::Error::new(Error::UnknownSecret(key.clone()))),
		},
		Injection::FromParent {
			field,
		} => Ok(Resolved::Pending {
			field: field.clone(),
		}),
	}
}

/// Resolve a pending parent injection against the ancestor chain, nearest
/// ancestor last. The first ancestor (walking upwards) that carries the
/// field wins.
pub fn resolve_from_parent(field: &str, ancestors: &[Arc<Value>]) -> Option<Value> {
	for ancestor in ancestors.iter().rev() {
		if let Value::Object(map) = &**ancestor {
			if let Some(value) = map.get(field) {
				return Some(value.clone());
			}
		}
	}
	None
}
