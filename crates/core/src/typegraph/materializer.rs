//! Materializers bind function-kind type nodes to a runtime, its config and
//! an effect classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::runtime::RuntimeId;

/// Index of a materializer within one typegraph generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterializerId(pub u32);

impl MaterializerId {
	pub fn index(&self) -> usize {
		self.0 as usize
	}
}

impl fmt::Display for MaterializerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Classification of a function's side effect, used for query/mutation
/// routing and effect-specific policy slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
	/// Pure read; the only effect a query operation may select
	#[default]
	None,
	Create,
	Update,
	Upsert,
	Delete,
}

impl Effect {
	pub fn is_read(&self) -> bool {
		matches!(self, Self::None)
	}
}

impl fmt::Display for Effect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::None => write!(f, "none"),
			Self::Create => write!(f, "create"),
			Self::Update => write!(f, "update"),
			Self::Upsert => write!(f, "upsert"),
			Self::Delete => write!(f, "delete"),
		}
	}
}

/// The executable binding of a function type node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Materializer {
	/// Operation name understood by the owning runtime
	pub name: String,

	/// The runtime this materializer dispatches into
	pub runtime: RuntimeId,

	#[serde(default)]
	pub effect: Effect,

	/// Score added to a plan per call of this materializer
	#[serde(default = "default_rate_weight")]
	pub rate_weight: u32,

	/// Score once per returned item instead of once per call
	#[serde(default)]
	pub rate_by_result_count: bool,

	/// Runtime-specific configuration
	#[serde(default)]
	pub data: serde_json::Map<String, serde_json::Value>,
}

fn default_rate_weight() -> u32 {
	1
}
