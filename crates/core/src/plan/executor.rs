//! Executor: runs a plan as concurrent dispatch waves.
//!
//! Sibling fields of one level fan out together; calls landing on a batching
//! runtime collapse into one `dispatch_batch`. As parents resolve, their
//! children (including `FromParent`-dependent ones) become the next wave;
//! unlocking is scoped to the subtree, never the whole plan. Grouping is
//! re-evaluated at every level, including across the items of list-valued
//! parents, so N sibling lookups sharing a parent cost one round trip when
//! the runtime allows it.
//!
//! Failures are field-scoped: a denied or failed node surfaces as `null`
//! plus an error entry at its position while siblings proceed. Effectful
//! calls are dispatched at most once; nothing is retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use super::response::ResponseError;
use super::{ArgSource, DispatchSpec, Plan, PlanNode, value_fits};
use crate::ctx::RequestContext;
use crate::err::Error;
use crate::injection;
use crate::rate::RateGuard;
use crate::rt::{DispatchCall, Dispatcher, annotate};
use crate::typegraph::{RuntimeId, TypeId, TypeKind, Typegraph};

pub(crate) struct ExecEnv<'a> {
	tg: &'a Typegraph,
	dispatcher: &'a Dispatcher,
	ctx: &'a RequestContext,
	guard: Option<&'a RateGuard<'a>>,
	errors: Mutex<Vec<ResponseError>>,
}

/// One position a value is being produced for: the ancestor value chain
/// (nearest last) and the response path.
#[derive(Clone)]
struct Slot {
	ancestors: Vec<Arc<Value>>,
	path: Vec<Value>,
}

impl Slot {
	fn child_path(&self, alias: &str) -> Vec<Value> {
		let mut path = self.path.clone();
		path.push(Value::String(alias.to_string()));
		path
	}
}

/// Execute a plan, producing response data congruent with the selection set
/// plus the field-scoped errors collected along the way.
pub async fn execute(
	tg: &Typegraph,
	dispatcher: &Dispatcher,
	ctx: &RequestContext,
	guard: Option<&RateGuard<'_>>,
	plan: &Plan,
) -> (Value, Vec<ResponseError>) {
	let env = ExecEnv {
		tg,
		dispatcher,
		ctx,
		guard,
		errors: Mutex::new(Vec::new()),
	};
	let root = Slot {
		ancestors: Vec::new(),
		path: Vec::new(),
	};
	let mut maps = resolve_fields(&env, &plan.roots, vec![root]).await;
	let data = Value::Object(maps.pop().unwrap_or_default());
	let errors = env.errors.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
	(data, errors)
}

fn record(env: &ExecEnv<'_>, err: &anyhow::Error, path: Vec<Value>) {
	let mut errors = env.errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
	errors.push(ResponseError {
		message: err.to_string(),
		path,
	});
}

/// Resolve the final args of a call against its slot's ancestor chain.
fn build_call(node: &PlanNode, spec: &DispatchSpec, slot: &Slot) -> Result<DispatchCall> {
	let mut args = Map::new();
	for (name, source) in &spec.args {
		let value = match source {
			ArgSource::Const(value) => value.clone(),
			ArgSource::FromParent(field) => {
				injection::resolve_from_parent(field, &slot.ancestors).ok_or_else(|| {
					anyhow::Error::new(Error::UnknownParentField {
						child: node.field.clone(),
						field: field.clone(),
					})
				})?
			}
		};
		args.insert(name.clone(), value);
	}
	Ok(DispatchCall {
		materializer: spec.materializer,
		op_name: spec.op_name.clone(),
		data: spec.data.clone(),
		effect: spec.effect,
		args,
		parent: slot.ancestors.last().cloned(),
		selection: spec.selection.clone(),
	})
}

struct Job {
	node_idx: usize,
	slot_idx: usize,
	runtime: RuntimeId,
	batchable: bool,
	call: DispatchCall,
}

/// Resolve one selection level for a set of parent slots at once.
///
/// Returns one response object per slot, key order mirroring the selection.
fn resolve_fields<'a>(
	env: &'a ExecEnv<'a>,
	nodes: &'a [PlanNode],
	slots: Vec<Slot>,
) -> BoxFuture<'a, Vec<Map<String, Value>>> {
	Box::pin(async move {
		// Response objects start congruent with the selection: every alias
		// present, null until a value lands.
		let mut out: Vec<Map<String, Value>> = slots
			.iter()
			.map(|_| {
				let mut map = Map::new();
				for node in nodes {
					map.insert(node.alias.clone(), Value::Null);
				}
				map
			})
			.collect();

		// Wave preparation: projections resolve locally, dispatches queue.
		let mut grid: Vec<Vec<Option<Value>>> =
			nodes.iter().map(|_| vec![None; slots.len()]).collect();
		let mut jobs: Vec<Job> = Vec::new();
		for (node_idx, node) in nodes.iter().enumerate() {
			for (slot_idx, slot) in slots.iter().enumerate() {
				if let Some(policy) = &node.denied {
					let err = anyhow::Error::new(Error::PolicyDenied {
						field: node.field.clone(),
						policy: policy.clone(),
					});
					record(env, &err, slot.child_path(&node.alias));
					continue;
				}
				match &node.dispatch {
					Some(spec) => {
						// A cancelled request commits no further calls; what
						// was already dispatched is at-most-once regardless.
						if env.ctx.cancellation.is_cancelled() {
							let err = anyhow::Error::new(Error::Cancelled);
							record(env, &err, slot.child_path(&node.alias));
							continue;
						}
						match build_call(node, spec, slot) {
							Ok(call) => jobs.push(Job {
								node_idx,
								slot_idx,
								runtime: spec.runtime,
								batchable: spec.batchable,
								call,
							}),
							Err(err) => {
								record(env, &err, slot.child_path(&node.alias));
							}
						}
					}
					None => {
						let value = slot
							.ancestors
							.last()
							.and_then(|parent| parent.get(&node.field))
							.cloned()
							.unwrap_or(Value::Null);
						grid[node_idx][slot_idx] = Some(value);
					}
				}
			}
		}

		// Dispatch the wave: group batchable calls per runtime, fan the rest
		// out individually, run everything concurrently.
		let mut batch_map: HashMap<RuntimeId, Vec<Job>> = HashMap::new();
		let mut job_futures: Vec<BoxFuture<'_, Vec<(usize, usize, Result<Value>)>>> = Vec::new();
		for job in jobs {
			if job.batchable {
				batch_map.entry(job.runtime).or_default().push(job);
			} else {
				job_futures.push(Box::pin(async move {
					let result =
						env.dispatcher.dispatch(job.runtime, job.call, env.ctx).await;
					vec![(job.node_idx, job.slot_idx, result)]
				}));
			}
		}
		for (runtime, group) in batch_map {
			job_futures.push(Box::pin(async move {
				let ids: Vec<(usize, usize)> =
					group.iter().map(|job| (job.node_idx, job.slot_idx)).collect();
				let adapter = match env.dispatcher.adapter(runtime) {
					Ok(adapter) => adapter,
					Err(err) => {
						let message = err.to_string();
						return ids
							.into_iter()
							.map(|(ni, si)| (ni, si, Err(anyhow::anyhow!(message.clone()))))
							.collect();
					}
				};
				let calls: Vec<DispatchCall> = group.into_iter().map(|job| job.call).collect();
				let mut results = adapter.dispatch_batch(calls, env.ctx).await;
				// A short batch response fails the unanswered tail.
				while results.len() < ids.len() {
					results.push(Err(anyhow::anyhow!("batch returned too few results")));
				}
				ids.into_iter()
					.zip(results)
					.map(|((ni, si), result)| {
						(ni, si, result.map_err(|err| annotate(adapter.name(), err)))
					})
					.collect()
			}));
		}
		let outcomes: Vec<(usize, usize, Result<Value>)> =
			futures::future::join_all(job_futures).await.into_iter().flatten().collect();

		// Collect results, applying post-hoc result-count scoring.
		for (node_idx, slot_idx, result) in outcomes {
			let node = &nodes[node_idx];
			let path = slots[slot_idx].child_path(&node.alias);
			match result {
				Ok(value) => {
					if let Some(spec) = &node.dispatch {
						if spec.rate_by_result_count {
							let items =
								value.as_array().map(|a| a.len() as u32).unwrap_or(1);
							let extra = spec.rate_weight.saturating_mul(items.saturating_sub(1));
							if let Some(guard) = env.guard {
								if let Err(err) = guard.consume(extra).await {
									record(env, &err, path);
									continue;
								}
							}
						}
					}
					grid[node_idx][slot_idx] = Some(value);
				}
				Err(err) => record(env, &err, path),
			}
		}

		// Shape produced values, recursing into children with every slot of
		// a node at once so deeper waves regroup across parents.
		for (node_idx, node) in nodes.iter().enumerate() {
			let mut slot_indices = Vec::new();
			let mut inputs = Vec::new();
			for (slot_idx, value) in grid[node_idx].iter_mut().enumerate() {
				if let Some(value) = value.take() {
					slot_indices.push(slot_idx);
					inputs.push((
						Slot {
							ancestors: slots[slot_idx].ancestors.clone(),
							path: slots[slot_idx].child_path(&node.alias),
						},
						value,
					));
				}
			}
			let shaped = shape_many(env, node, node.output, inputs).await;
			for (slot_idx, value) in slot_indices.into_iter().zip(shaped) {
				out[slot_idx].insert(node.alias.clone(), value);
			}
		}

		out
	})
}

/// Shape a batch of produced values against a declared type, preserving
/// list/optional/union structure and recursing into the node's selection.
fn shape_many<'a>(
	env: &'a ExecEnv<'a>,
	node: &'a PlanNode,
	ty: TypeId,
	inputs: Vec<(Slot, Value)>,
) -> BoxFuture<'a, Vec<Value>> {
	Box::pin(async move {
		if inputs.is_empty() {
			return Vec::new();
		}
		let type_node = match env.tg.ty(ty) {
			Ok(type_node) => type_node,
			Err(err) => {
				for (slot, _) in &inputs {
					record(env, &err, slot.path.clone());
				}
				return vec![Value::Null; inputs.len()];
			}
		};
		match &type_node.kind {
			TypeKind::Optional {
				of,
			} => {
				let mut non_null_indices = Vec::new();
				let mut sub = Vec::new();
				let total = inputs.len();
				for (index, (slot, value)) in inputs.into_iter().enumerate() {
					if !value.is_null() {
						non_null_indices.push(index);
						sub.push((slot, value));
					}
				}
				let shaped = shape_many(env, node, *of, sub).await;
				let mut out = vec![Value::Null; total];
				for (index, value) in non_null_indices.into_iter().zip(shaped) {
					out[index] = value;
				}
				out
			}
			TypeKind::List {
				of,
			} => {
				// Flatten every slot's items into one combined wave.
				let mut layout = Vec::with_capacity(inputs.len());
				let mut flat = Vec::new();
				for (slot, value) in inputs {
					match value {
						Value::Array(items) => {
							layout.push(Some(items.len()));
							for (index, item) in items.into_iter().enumerate() {
								let mut path = slot.path.clone();
								path.push(Value::from(index));
								flat.push((
									Slot {
										ancestors: slot.ancestors.clone(),
										path,
									},
									item,
								));
							}
						}
						other => {
							let err = anyhow::Error::new(Error::OutputShape {
								ty: env.tg.type_label(ty),
								detail: format!("expected a list, got {other}"),
							});
							record(env, &err, slot.path.clone());
							layout.push(None);
						}
					}
				}
				let mut shaped = shape_many(env, node, *of, flat).await.into_iter();
				layout
					.into_iter()
					.map(|entry| match entry {
						Some(len) => Value::Array((0..len).filter_map(|_| shaped.next()).collect()),
						None => Value::Null,
					})
					.collect()
			}
			TypeKind::Struct {
				..
			} => {
				if node.children.is_empty() {
					// Validated plans always select into structs; stay total.
					return inputs.into_iter().map(|(_, value)| value).collect();
				}
				let total = inputs.len();
				let mut object_indices = Vec::new();
				let mut child_slots = Vec::new();
				for (index, (slot, value)) in inputs.into_iter().enumerate() {
					if value.is_object() {
						let mut ancestors = slot.ancestors.clone();
						ancestors.push(Arc::new(value));
						object_indices.push(index);
						child_slots.push(Slot {
							ancestors,
							path: slot.path,
						});
					} else {
						let err = anyhow::Error::new(Error::OutputShape {
							ty: env.tg.type_label(ty),
							detail: format!("expected an object, got {value}"),
						});
						record(env, &err, slot.path.clone());
					}
				}
				let maps = resolve_fields(env, &node.children, child_slots).await;
				let mut out = vec![Value::Null; total];
				for (index, map) in object_indices.into_iter().zip(maps) {
					out[index] = Value::Object(map);
				}
				out
			}
			TypeKind::Union {
				any_of: members,
			}
			| TypeKind::Either {
				one_of: members,
			} => {
				let exactly_one = matches!(
					type_node.kind,
					TypeKind::Either {
						..
					}
				);
				shape_variants(env, node, ty, members, exactly_one, inputs).await
			}
			// Scalars pass through as produced.
			_ => inputs.into_iter().map(|(_, value)| value).collect(),
		}
	})
}

/// Discriminate union/either values structurally and apply the matching
/// variant selection, grouping inputs per variant to keep batching.
async fn shape_variants(
	env: &ExecEnv<'_>,
	node: &PlanNode,
	ty: TypeId,
	members: &[TypeId],
	exactly_one: bool,
	inputs: Vec<(Slot, Value)>,
) -> Vec<Value> {
	let total = inputs.len();
	let mut out = vec![Value::Null; total];
	let mut groups: HashMap<usize, Vec<(usize, Slot, Value)>> = HashMap::new();
	for (index, (slot, value)) in inputs.into_iter().enumerate() {
		let matching: Vec<TypeId> =
			members.iter().copied().filter(|member| value_fits(env.tg, *member, &value)).collect();
		let member = match (exactly_one, matching.as_slice()) {
			(true, [single]) => *single,
			(false, [first, ..]) => *first,
			_ => {
				let err = anyhow::Error::new(Error::OutputShape {
					ty: env.tg.type_label(ty),
					detail: if matching.is_empty() {
						"no member matches the produced value".to_string()
					} else {
						"several members match the produced value".to_string()
					},
				});
				record(env, &err, slot.path.clone());
				continue;
			}
		};
		match node.variants.iter().position(|variant| variant.ty == member) {
			Some(position) => groups.entry(position).or_default().push((index, slot, value)),
			None => {
				// No fragment selected this member: structs render empty,
				// scalar members pass through.
				let is_struct = env
					.tg
					.ty(member)
					.map(|n| {
						matches!(
							n.kind,
							TypeKind::Struct {
								..
							}
						)
					})
					.unwrap_or(false);
				out[index] = if is_struct {
					Value::Object(Map::new())
				} else {
					value
				};
			}
		}
	}
	for (position, group) in groups {
		let variant = &node.variants[position];
		let mut indices = Vec::with_capacity(group.len());
		let mut child_slots = Vec::with_capacity(group.len());
		for (index, slot, value) in group {
			let mut ancestors = slot.ancestors.clone();
			ancestors.push(Arc::new(value));
			indices.push(index);
			child_slots.push(Slot {
				ancestors,
				path: slot.path,
			});
		}
		let maps = resolve_fields(env, &variant.children, child_slots).await;
		for (index, map) in indices.into_iter().zip(maps) {
			out[index] = Value::Object(map);
		}
	}
	out
}
