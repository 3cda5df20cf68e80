//! Policies are predicate materializers. A policy either applies one
//! predicate to every effect or binds a predicate per effect slot.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::materializer::{Effect, MaterializerId};

/// Index of a policy within one typegraph generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(pub u32);

impl PolicyId {
	pub fn index(&self) -> usize {
		self.0 as usize
	}
}

impl fmt::Display for PolicyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// A named access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
	pub name: String,
	#[serde(flatten)]
	pub spec: PolicySpec,
}

/// How the policy selects its predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySpec {
	/// One predicate for every effect
	Single(MaterializerId),
	/// A predicate per effect slot; an empty slot defers
	PerEffect(EffectSlots),
}

/// Effect slots of a per-effect policy. `Upsert` resolves through the
/// `update` slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectSlots {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub read: Option<MaterializerId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub create: Option<MaterializerId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub update: Option<MaterializerId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delete: Option<MaterializerId>,
}

impl Policy {
	/// The predicate evaluated for the given effect, if any.
	pub fn predicate_for(&self, effect: Effect) -> Option<MaterializerId> {
		match &self.spec {
			PolicySpec::Single(materializer) => Some(*materializer),
			PolicySpec::PerEffect(slots) => match effect {
				Effect::None => slots.read,
				Effect::Create => slots.create,
				Effect::Update | Effect::Upsert => slots.update,
				Effect::Delete => slots.delete,
			},
		}
	}

	/// Every materializer referenced by this policy.
	pub fn predicates(&self) -> Vec<MaterializerId> {
		match &self.spec {
			PolicySpec::Single(materializer) => vec![*materializer],
			PolicySpec::PerEffect(slots) => [slots.read, slots.create, slots.update, slots.delete]
				.into_iter()
				.flatten()
				.collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_policy_covers_all_effects() {
		let policy: Policy =
			serde_json::from_value(serde_json::json!({"name": "public", "single": 3})).unwrap();
		for effect in [Effect::None, Effect::Create, Effect::Update, Effect::Delete] {
			assert_eq!(policy.predicate_for(effect), Some(MaterializerId(3)));
		}
	}

	#[test]
	fn per_effect_policy_selects_slots() {
		let policy: Policy = serde_json::from_value(serde_json::json!({
			"name": "crud",
			"per_effect": {"read": 1, "delete": 2},
		}))
		.unwrap();
		assert_eq!(policy.predicate_for(Effect::None), Some(MaterializerId(1)));
		assert_eq!(policy.predicate_for(Effect::Delete), Some(MaterializerId(2)));
		assert_eq!(policy.predicate_for(Effect::Create), None);
		// Upsert resolves through the update slot.
		assert_eq!(policy.predicate_for(Effect::Upsert), None);
		assert_eq!(policy.predicates(), vec![MaterializerId(1), MaterializerId(2)]);
	}
}
