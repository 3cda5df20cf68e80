//! Hierarchical per-field, per-effect access control.
//!
//! Policies apply top-down: a field inherits the nearest ancestor's resolved
//! decision unless it declares its own chain, which is evaluated in declared
//! order with the first non-deferring predicate winning. A chain that only
//! defers denies, as does an empty chain with nothing to inherit.
//!
//! A policy predicate is itself a materializer, so evaluating one may
//! dispatch into any runtime (including the sandboxed function host) and is
//! subject to the same failure containment as data fields.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::ctx::RequestContext;
use crate::err::Error;
use crate::rt::{DispatchCall, Dispatcher};
use crate::typegraph::{Effect, MaterializerId, PolicyId, Typegraph};

/// A single predicate's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	Allow,
	Deny,
	/// No opinion; the chain moves to the next policy
	Defer,
}

/// The resolved outcome for one plan node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
	Allow,
	Deny {
		/// Name of the denying policy, `(default)` for default-deny
		policy: String,
	},
}

const DEFAULT_DENY: &str = "(default)";

/// Evaluates policy chains for one request.
///
/// Predicate results are memoized per (materializer, effect): within one
/// request the context is fixed, so lazy per-branch evaluation and eager
/// whole-plan evaluation produce identical grants.
pub struct PolicyEngine<'a> {
	tg: &'a Typegraph,
	dispatcher: &'a Dispatcher,
	ctx: &'a RequestContext,
	memo: Mutex<HashMap<(MaterializerId, Effect), Decision>>,
}

impl<'a> PolicyEngine<'a> {
	pub fn new(tg: &'a Typegraph, dispatcher: &'a Dispatcher, ctx: &'a RequestContext) -> Self {
		Self {
			tg,
			dispatcher,
			ctx,
			memo: Mutex::new(HashMap::new()),
		}
	}

	/// Resolve the verdict for a node carrying `chain`, inheriting
	/// `inherited` when the chain is empty.
	pub async fn check(
		&self,
		chain: &[PolicyId],
		effect: Effect,
		inherited: Option<&Verdict>,
	) -> Result<Verdict> {
		if chain.is_empty() {
			return Ok(inherited.cloned().unwrap_or(Verdict::Deny {
				policy: DEFAULT_DENY.to_string(),
			}));
		}
		for id in chain {
			let policy = self.tg.policy(*id)?;
			let decision = match policy.predicate_for(effect) {
				Some(materializer) => self.invoke(materializer, effect).await?,
				// An empty effect slot has no opinion.
				None => Decision::Defer,
			};
			match decision {
				Decision::Allow => return Ok(Verdict::Allow),
				Decision::Deny => {
					return Ok(Verdict::Deny {
						policy: policy.name.clone(),
					});
				}
				Decision::Defer => continue,
			}
		}
		// Every policy deferred.
		Ok(Verdict::Deny {
			policy: DEFAULT_DENY.to_string(),
		})
	}

	async fn invoke(&self, materializer: MaterializerId, effect: Effect) -> Result<Decision> {
		if let Some(decision) = self.memo.lock().await.get(&(materializer, effect)) {
			return Ok(*decision);
		}
		let mat = self.tg.materializer(materializer)?;
		let mut args = serde_json::Map::new();
		args.insert("context".to_string(), Value::Object(self.ctx.claims.clone()));
		args.insert("effect".to_string(), Value::String(effect.to_string()));
		let call = DispatchCall {
			materializer,
			op_name: mat.name.clone(),
			data: mat.data.clone(),
			effect: Effect::None,
			args,
			parent: None,
			selection: None,
		};
		let value = self.dispatcher.dispatch(mat.runtime, call, self.ctx).await?;
		let decision = match value {
			Value::Bool(true) => Decision::Allow,
			Value::Bool(false) => Decision::Deny,
			Value::Null => Decision::Defer,
			other => {
				return Err(anyhow::Error::new(Error::Runtime {
					runtime: "policy".to_string(),
					message: format!(
						"predicate '{}' must return true, false or null, got {other}",
						mat.name
					),
				}));
			}
		};
		trace!(materializer = %materializer, %effect, ?decision, "policy predicate evaluated");
		self.memo.lock().await.insert((materializer, effect), decision);
		Ok(decision)
	}
}
