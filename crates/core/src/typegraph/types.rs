//! Arena type nodes. Types reference each other exclusively through integer
//! ids, so cyclic shapes (e.g. self-referential structs) never nest inline.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::materializer::MaterializerId;
use super::policy::PolicyId;
use crate::injection::Injection;

/// Index of a type node within one typegraph generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

impl TypeId {
	pub fn index(&self) -> usize {
		self.0 as usize
	}
}

impl fmt::Display for TypeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// One immutable node in the type arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeNode {
	/// Display name; empty for anonymous scalars and wrappers
	#[serde(default)]
	pub name: String,

	#[serde(flatten)]
	pub kind: TypeKind,

	/// Policy chain declared on this node, evaluated in order
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub policies: Vec<PolicyId>,

	/// Injection binding; only meaningful on function input fields
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub injection: Option<Injection>,
}

/// The shape of a type node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypeKind {
	Boolean,
	Integer,
	Float,
	String,
	Struct {
		fields: IndexMap<String, TypeId>,
	},
	List {
		of: TypeId,
	},
	Optional {
		of: TypeId,
	},
	Union {
		any_of: Vec<TypeId>,
	},
	Either {
		one_of: Vec<TypeId>,
	},
	Function {
		input: TypeId,
		output: TypeId,
		materializer: MaterializerId,
	},
}

impl TypeKind {
	pub fn is_scalar(&self) -> bool {
		matches!(self, Self::Boolean | Self::Integer | Self::Float | Self::String)
	}

	/// Short label used in validation errors.
	pub fn label(&self) -> &'static str {
		match self {
			Self::Boolean => "boolean",
			Self::Integer => "integer",
			Self::Float => "float",
			Self::String => "string",
			Self::Struct {
				..
			} => "struct",
			Self::List {
				..
			} => "list",
			Self::Optional {
				..
			} => "optional",
			Self::Union {
				..
			} => "union",
			Self::Either {
				..
			} => "either",
			Self::Function {
				..
			} => "function",
		}
	}
}

impl TypeNode {
	/// Display label for error messages: the name when present, else the kind.
	pub fn label(&self) -> &str {
		if self.name.is_empty() {
			self.kind.label()
		} else {
			&self.name
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn type_id_is_transparent_in_json() {
		let id: TypeId = serde_json::from_str("7").unwrap();
		assert_eq!(id, TypeId(7));
		assert_eq!(serde_json::to_string(&id).unwrap(), "7");
	}

	#[test]
	fn type_node_struct_roundtrip() {
		let json = serde_json::json!({
			"name": "user",
			"type": "struct",
			"fields": {"id": 1, "posts": 2},
			"policies": [0],
		});
		let node: TypeNode = serde_json::from_value(json).unwrap();
		assert_eq!(node.name, "user");
		assert_eq!(node.policies, vec![crate::typegraph::PolicyId(0)]);
		match &node.kind {
			TypeKind::Struct {
				fields,
			} => {
				assert_eq!(fields["id"], TypeId(1));
				assert_eq!(fields["posts"], TypeId(2));
			}
			other => panic!("unexpected kind: {other:?}"),
		}
	}

	#[test]
	fn scalar_nodes_need_no_extra_fields() {
		let node: TypeNode = serde_json::from_value(serde_json::json!({"type": "integer"})).unwrap();
		assert!(node.kind.is_scalar());
		assert_eq!(node.label(), "integer");
	}
}
