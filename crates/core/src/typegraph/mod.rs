//! The typegraph IR: an immutable arena of types, materializers, runtimes
//! and policies for one compiled API generation.
//!
//! A [`TypegraphDoc`] is the serialized artifact produced by an authoring
//! SDK; [`Typegraph::compile`] validates every cross-reference and freezes
//! the result. Compiled typegraphs are shared read-only between requests and
//! replaced wholesale on redeploy; a reference held by an in-flight request
//! keeps the old generation alive until it drains.

mod materializer;
mod policy;
mod runtime;
mod types;

use anyhow::Result;
use indexmap::IndexMap;
pub use materializer::{Effect, Materializer, MaterializerId};
pub use policy::{EffectSlots, Policy, PolicyId, PolicySpec};
pub use runtime::{RuntimeDef, RuntimeId, RuntimeKind};
use serde::{Deserialize, Serialize};
pub use types::{TypeId, TypeKind, TypeNode};

use crate::err::Error;
use crate::injection::Injection;
use crate::rate::RateConfig;

/// The serialized typegraph artifact, before compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypegraphDoc {
	pub version: String,
	pub name: String,
	pub types: Vec<TypeNode>,
	#[serde(default)]
	pub materializers: Vec<Materializer>,
	#[serde(default)]
	pub runtimes: Vec<RuntimeDef>,
	#[serde(default)]
	pub policies: Vec<Policy>,
	pub meta: Meta,
}

/// Typegraph-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
	/// The exposed root struct; its fields are the operation entry points
	pub root: TypeId,
	/// Policy chain inherited by root fields that declare none
	#[serde(default)]
	pub default_policy: Vec<PolicyId>,
	#[serde(default)]
	pub rate: Option<RateConfig>,
	#[serde(default)]
	pub auth: AuthConfig,
	/// Secrets this typegraph may inject; lookups outside this list are a
	/// compile-time error
	#[serde(default)]
	pub secrets: Vec<String>,
}

/// Shape of the authenticated context, not provider UX.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
	/// Secret holding the HS256 key bearer tokens are verified with; absent
	/// means requests run anonymously
	#[serde(default)]
	pub secret_name: Option<String>,
}

impl TypegraphDoc {
	fn duplicate(&mut self, ty: TypeId) -> Result<TypeId> {
		let node = self
			.types
			.get(ty.index())
			.ok_or_else(|| {
				anyhow::Error::new(Error::UnknownTypeId {
					id: ty.0,
				})
			})?
			.clone();
		let id = TypeId(self.types.len() as u32);
		self.types.push(node);
		Ok(id)
	}

	/// Copy-on-write: returns a fresh node with the policy appended to its
	/// chain. The original node is untouched.
	pub fn with_policy(&mut self, ty: TypeId, policy: PolicyId) -> Result<TypeId> {
		let id = self.duplicate(ty)?;
		self.types[id.index()].policies.push(policy);
		Ok(id)
	}

	/// Copy-on-write rename under a fresh id.
	pub fn renamed(&mut self, ty: TypeId, name: &str) -> Result<TypeId> {
		let id = self.duplicate(ty)?;
		self.types[id.index()].name = name.to_string();
		Ok(id)
	}

	/// Copy-on-write injection binding under a fresh id.
	pub fn with_injection(&mut self, ty: TypeId, injection: Injection) -> Result<TypeId> {
		let id = self.duplicate(ty)?;
		self.types[id.index()].injection = Some(injection);
		Ok(id)
	}
}

/// A compiled, frozen typegraph generation.
#[derive(Debug)]
pub struct Typegraph {
	pub name: String,
	pub version: String,
	types: Vec<TypeNode>,
	materializers: Vec<Materializer>,
	runtimes: Vec<RuntimeDef>,
	policies: Vec<Policy>,
	pub meta: Meta,
}

impl Typegraph {
	/// Validate and freeze a typegraph document.
	///
	/// Every id referenced anywhere must exist in this same generation;
	/// violations are deploy-time errors, never runtime ones.
	pub fn compile(doc: TypegraphDoc) -> Result<Self> {
		validate(&doc)?;
		debug!(
			name = %doc.name,
			types = doc.types.len(),
			materializers = doc.materializers.len(),
			runtimes = doc.runtimes.len(),
			"compiled typegraph"
		);
		Ok(Self {
			name: doc.name,
			version: doc.version,
			types: doc.types,
			materializers: doc.materializers,
			runtimes: doc.runtimes,
			policies: doc.policies,
			meta: doc.meta,
		})
	}

	pub fn ty(&self, id: TypeId) -> Result<&TypeNode> {
		self.types.get(id.index()).ok_or_else(|| {
			anyhow::Error::new(Error::UnknownTypeId {
				id: id.0,
			})
		})
	}

	pub fn materializer(&self, id: MaterializerId) -> Result<&Materializer> {
		self.materializers.get(id.index()).ok_or_else(|| {
			anyhow::Error::new(Error::UnknownMaterializerId {
				id: id.0,
			})
		})
	}

	pub fn runtime(&self, id: RuntimeId) -> Result<&RuntimeDef> {
		self.runtimes.get(id.index()).ok_or_else(|| {
			anyhow::Error::new(Error::UnknownRuntimeId {
				id: id.0,
			})
		})
	}

	pub fn policy(&self, id: PolicyId) -> Result<&Policy> {
		self.policies.get(id.index()).ok_or_else(|| {
			anyhow::Error::new(Error::UnknownPolicyId {
				id: id.0,
			})
		})
	}

	pub fn runtimes(&self) -> &[RuntimeDef] {
		&self.runtimes
	}

	pub fn materializers(&self) -> &[Materializer] {
		&self.materializers
	}

	/// The exposed root fields, name to function type id.
	pub fn root_fields(&self) -> Result<&IndexMap<String, TypeId>> {
		match &self.ty(self.meta.root)?.kind {
			TypeKind::Struct {
				fields,
			} => Ok(fields),
			other => Err(anyhow::Error::new(Error::InvalidTypegraph(format!(
				"the root type must be a struct, found {}",
				other.label()
			)))),
		}
	}

	/// Human-readable label for a type id, tolerant of bad ids.
	pub fn type_label(&self, id: TypeId) -> String {
		match self.types.get(id.index()) {
			Some(node) => node.label().to_string(),
			None => format!("{id}"),
		}
	}
}

fn check_type(doc: &TypegraphDoc, id: TypeId) -> Result<()> {
	if id.index() >= doc.types.len() {
		return Err(anyhow::Error::new(Error::UnknownTypeId {
			id: id.0,
		}));
	}
	Ok(())
}

fn check_materializer(doc: &TypegraphDoc, id: MaterializerId) -> Result<()> {
	if id.index() >= doc.materializers.len() {
		return Err(anyhow::Error::new(Error::UnknownMaterializerId {
			id: id.0,
		}));
	}
	Ok(())
}

fn validate(doc: &TypegraphDoc) -> Result<()> {
	if doc.types.is_empty() {
		return Err(anyhow::Error::new(Error::InvalidTypegraph(
			"the type arena holds no types".to_string(),
		)));
	}
	check_type(doc, doc.meta.root)?;

	// Validate every node's outgoing references.
	for node in &doc.types {
		match &node.kind {
			TypeKind::Struct {
				fields,
			} => {
				for id in fields.values() {
					check_type(doc, *id)?;
				}
			}
			TypeKind::List {
				of,
			}
			| TypeKind::Optional {
				of,
			} => check_type(doc, *of)?,
			TypeKind::Union {
				any_of: variants,
			}
			| TypeKind::Either {
				one_of: variants,
			} => {
				if variants.is_empty() {
					return Err(anyhow::Error::new(Error::InvalidTypegraph(format!(
						"{} '{}' has no members",
						node.kind.label(),
						node.label()
					))));
				}
				for id in variants {
					check_type(doc, *id)?;
				}
			}
			TypeKind::Function {
				input,
				output,
				materializer,
			} => {
				check_type(doc, *input)?;
				check_type(doc, *output)?;
				check_materializer(doc, *materializer)?;
				match &doc.types[input.index()].kind {
					TypeKind::Struct {
						fields,
					} => {
						// Functions are not first-class argument values.
						for (field, id) in fields {
							check_type(doc, *id)?;
							if matches!(
								doc.types[id.index()].kind,
								TypeKind::Function {
									..
								}
							) {
								return Err(anyhow::Error::new(Error::InvalidTypegraph(format!(
									"input field '{field}' of function '{}' is itself a function",
									node.label()
								))));
							}
						}
					}
					other => {
						return Err(anyhow::Error::new(Error::InvalidTypegraph(format!(
							"input of function '{}' must be a struct, found {}",
							node.label(),
							other.label()
						))));
					}
				}
			}
			_ => {}
		}
		for policy in &node.policies {
			if policy.index() >= doc.policies.len() {
				return Err(anyhow::Error::new(Error::UnknownPolicyId {
					id: policy.0,
				}));
			}
		}
		if let Some(Injection::Secret {
			key,
		}) = &node.injection
		{
			if !doc.meta.secrets.iter().any(|s| s == key) {
				return Err(anyhow::Error::new(Error::UndeclaredSecret(key.clone())));
			}
		}
	}

	// Materializers must point at known runtimes.
	for mat in &doc.materializers {
		if mat.runtime.index() >= doc.runtimes.len() {
			return Err(anyhow::Error::new(Error::UnknownRuntimeId {
				id: mat.runtime.0,
			}));
		}
	}

	// Policy slots must reference predicate-shaped (effect-free) materializers.
	for policy in &doc.policies {
		for predicate in policy.predicates() {
			check_materializer(doc, predicate)?;
			if !doc.materializers[predicate.index()].effect.is_read() {
				return Err(anyhow::Error::new(Error::InvalidPolicyPredicate {
					policy: policy.name.clone(),
					materializer: predicate.0,
				}));
			}
		}
	}
	for policy in &doc.meta.default_policy {
		if policy.index() >= doc.policies.len() {
			return Err(anyhow::Error::new(Error::UnknownPolicyId {
				id: policy.0,
			}));
		}
	}

	// Root fields are the operation entry points and must be functions.
	if let TypeKind::Struct {
		fields,
	} = &doc.types[doc.meta.root.index()].kind
	{
		for (field, id) in fields {
			if !matches!(
				doc.types[id.index()].kind,
				TypeKind::Function {
					..
				}
			) {
				return Err(anyhow::Error::new(Error::InvalidTypegraph(format!(
					"root field '{field}' must be a function"
				))));
			}
		}
	} else {
		return Err(anyhow::Error::new(Error::InvalidTypegraph(
			"the root type must be a struct".to_string(),
		)));
	}

	// Rate windows must be non-degenerate.
	if let Some(rate) = &doc.meta.rate {
		if rate.window_sec == 0 || rate.window_limit == 0 || rate.query_limit == 0 {
			return Err(anyhow::Error::new(Error::InvalidTypegraph(
				"rate limits must be positive".to_string(),
			)));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn minimal_doc() -> TypegraphDoc {
		serde_json::from_value(serde_json::json!({
			"version": "0.3",
			"name": "demo",
			"types": [
				{"name": "Query", "type": "struct", "fields": {"hello": 1}},
				{"name": "hello", "type": "function", "input": 2, "output": 3, "materializer": 0},
				{"type": "struct", "fields": {}},
				{"type": "string"},
			],
			"materializers": [
				{"name": "value", "runtime": 0, "data": {"value": "world"}},
			],
			"runtimes": [
				{"name": "main", "kind": "value"},
			],
			"policies": [],
			"meta": {"root": 0},
		}))
		.unwrap()
	}

	#[test]
	fn compile_minimal_typegraph() {
		let tg = Typegraph::compile(minimal_doc()).unwrap();
		assert_eq!(tg.name, "demo");
		let fields = tg.root_fields().unwrap();
		assert_eq!(fields["hello"], TypeId(1));
	}

	#[test]
	fn out_of_range_reference_is_a_compile_error() {
		let mut doc = minimal_doc();
		doc.types.push(
			serde_json::from_value(serde_json::json!({"type": "list", "of": 99})).unwrap(),
		);
		let err = Typegraph::compile(doc).unwrap_err();
		assert!(err.to_string().contains("#99"));
	}

	#[test]
	fn root_fields_must_be_functions() {
		let mut doc = minimal_doc();
		// Point the root field at a plain string instead of a function.
		if let TypeKind::Struct {
			fields,
		} = &mut doc.types[0].kind
		{
			fields.insert("hello".to_string(), TypeId(3));
		}
		let err = Typegraph::compile(doc).unwrap_err();
		assert!(err.to_string().contains("must be a function"));
	}

	#[test]
	fn policy_predicates_must_be_effect_free() {
		let mut doc = minimal_doc();
		doc.materializers.push(
			serde_json::from_value(serde_json::json!({
				"name": "drop_all",
				"runtime": 0,
				"effect": "delete",
			}))
			.unwrap(),
		);
		doc.policies.push(
			serde_json::from_value(serde_json::json!({"name": "broken", "single": 1})).unwrap(),
		);
		let err = Typegraph::compile(doc).unwrap_err();
		assert!(err.to_string().contains("not a predicate"));
	}

	#[test]
	fn injected_secrets_must_be_declared() {
		let mut doc = minimal_doc();
		doc.types.push(
			serde_json::from_value(serde_json::json!({
				"type": "string",
				"injection": {"source": "secret", "key": "API_KEY"},
			}))
			.unwrap(),
		);
		let err = Typegraph::compile(doc.clone()).unwrap_err();
		assert!(err.to_string().contains("API_KEY"));

		doc.meta.secrets.push("API_KEY".to_string());
		Typegraph::compile(doc).unwrap();
	}

	#[test]
	fn with_policy_is_copy_on_write() {
		let mut doc = minimal_doc();
		doc.policies.push(
			serde_json::from_value(serde_json::json!({"name": "public", "single": 0})).unwrap(),
		);
		let fresh = doc.with_policy(TypeId(3), PolicyId(0)).unwrap();
		assert_eq!(fresh, TypeId(4));
		assert!(doc.types[3].policies.is_empty(), "the original node must not change");
		assert_eq!(doc.types[4].policies, vec![PolicyId(0)]);
	}

	#[test]
	fn renamed_and_with_injection_allocate_fresh_ids() {
		let mut doc = minimal_doc();
		let renamed = doc.renamed(TypeId(3), "title").unwrap();
		assert_eq!(doc.types[renamed.index()].name, "title");
		assert_eq!(doc.types[3].name, "");

		let injected = doc
			.with_injection(
				TypeId(3),
				Injection::Static {
					value: serde_json::json!("fixed"),
				},
			)
			.unwrap();
		assert_ne!(renamed, injected);
		assert!(doc.types[injected.index()].injection.is_some());
	}

	#[test]
	fn degenerate_rate_config_is_rejected() {
		let mut doc = minimal_doc();
		doc.meta.rate = Some(RateConfig {
			window_sec: 0,
			window_limit: 35,
			query_limit: 25,
			context_identifier: None,
			local_excess: 0,
		});
		assert!(Typegraph::compile(doc).is_err());
	}
}
