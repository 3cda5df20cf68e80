//! Planner: turns a parsed operation into a dependency-ordered dispatch
//! tree.
//!
//! Building a plan validates the selection set structurally against the
//! arena, classifies the operation's effect, evaluates the policy chain for
//! every touched field (a denial converts that subtree into an error leaf
//! without aborting its siblings), resolves order-independent injections and
//! computes the plan's rate score. Nothing is dispatched here; execution
//! lives in [`executor`].

pub mod executor;
pub mod response;
pub(crate) mod rest;

use async_graphql::parser::types as ast;
use async_graphql::{Name, Positioned};
pub use response::{Response, ResponseError};
use serde_json::Value;

use anyhow::Result;

use crate::cnf;
use crate::ctx::RequestContext;
use crate::err::Error;
use crate::injection::{self, Resolved};
use crate::policy::{PolicyEngine, Verdict};
use crate::rt::Dispatcher;
use crate::typegraph::{Effect, MaterializerId, RuntimeId, TypeId, TypeKind, Typegraph};

/// Where one resolved argument comes from.
#[derive(Debug, Clone)]
pub(crate) enum ArgSource {
	/// Known before execution: client value or order-independent injection
	Const(Value),
	/// Deferred until the named ancestor field has produced a value
	FromParent(String),
}

/// Everything the executor needs to dispatch one function field.
#[derive(Debug, Clone)]
pub(crate) struct DispatchSpec {
	pub materializer: MaterializerId,
	pub runtime: RuntimeId,
	/// The materializer's own effect; effectful calls are at-most-once
	pub effect: Effect,
	pub op_name: String,
	pub data: serde_json::Map<String, Value>,
	pub args: Vec<(String, ArgSource)>,
	pub rate_weight: u32,
	pub rate_by_result_count: bool,
	/// Whether the owning runtime collapses sibling calls
	pub batchable: bool,
	/// Rendered sub-selection for upstream GraphQL runtimes
	pub selection: Option<String>,
}

/// A selection on one member of a union/either output.
#[derive(Debug)]
pub struct VariantSelection {
	pub type_name: String,
	pub ty: TypeId,
	pub children: Vec<PlanNode>,
}

/// One node of the execution tree, mirroring the request's selection set.
#[derive(Debug)]
pub struct PlanNode {
	/// Response key (the alias, or the field name)
	pub alias: String,
	pub field: String,
	/// Type the produced or projected value is shaped against
	pub output: TypeId,
	pub(crate) dispatch: Option<DispatchSpec>,
	pub children: Vec<PlanNode>,
	pub variants: Vec<VariantSelection>,
	/// Set when the policy chain denied this subtree; name of the policy
	pub denied: Option<String>,
}

/// A validated, policy-checked, scored execution plan for one request.
#[derive(Debug)]
pub struct Plan {
	pub roots: Vec<PlanNode>,
	/// The operation's effect (queries are `None`; mutations take the root
	/// field's declared effect)
	pub effect: Effect,
	/// Whole-plan rate score, counted before any dispatch
	pub score: u32,
}

/// Build a plan for a GraphQL source text.
pub async fn build(
	tg: &Typegraph,
	dispatcher: &Dispatcher,
	ctx: &RequestContext,
	query: &str,
	operation_name: Option<&str>,
	variables: &serde_json::Map<String, Value>,
) -> Result<Plan> {
	let document = async_graphql::parser::parse_query(query)
		.map_err(|e| anyhow::Error::new(Error::InvalidQuery(e.to_string())))?;

	let operation = select_operation(&document, operation_name)?;
	let op_type = operation.node.ty;
	if op_type == ast::OperationType::Subscription {
		return Err(anyhow::Error::new(Error::UnsupportedOperation("subscription".to_string())));
	}

	let builder = PlanBuilder {
		tg,
		dispatcher,
		ctx,
		policies: PolicyEngine::new(tg, dispatcher, ctx),
		fragments: &document.fragments,
		variables,
	};
	builder.build_roots(op_type, &operation.node.selection_set.node).await
}

fn select_operation<'a>(
	document: &'a ast::ExecutableDocument,
	operation_name: Option<&str>,
) -> Result<&'a Positioned<ast::OperationDefinition>> {
	match (&document.operations, operation_name) {
		(ast::DocumentOperations::Single(operation), _) => Ok(operation),
		(ast::DocumentOperations::Multiple(operations), Some(name)) => {
			operations.get(name).ok_or_else(|| {
				anyhow::Error::new(Error::UnknownOperation(name.to_string()))
			})
		}
		(ast::DocumentOperations::Multiple(operations), None) => {
			if operations.len() == 1 {
				Ok(operations.values().next().expect("len checked"))
			} else {
				Err(anyhow::Error::new(Error::AmbiguousOperation))
			}
		}
	}
}

/// A flattened selection set: plain fields plus type-conditioned fragments.
struct FlatSelection<'a> {
	fields: Vec<&'a Positioned<ast::Field>>,
	variants: Vec<(String, &'a ast::SelectionSet)>,
}

/// Outcome of building the selection below a node.
enum BuiltSelection {
	Denied(String),
	Ok {
		children: Vec<PlanNode>,
		variants: Vec<VariantSelection>,
	},
}

struct PlanBuilder<'a> {
	tg: &'a Typegraph,
	dispatcher: &'a Dispatcher,
	ctx: &'a RequestContext,
	policies: PolicyEngine<'a>,
	fragments: &'a std::collections::HashMap<Name, Positioned<ast::FragmentDefinition>>,
	variables: &'a serde_json::Map<String, Value>,
}

impl<'a> PlanBuilder<'a> {
	async fn build_roots(&self, op_type: ast::OperationType, set: &ast::SelectionSet) -> Result<Plan> {
		let root_name = self.tg.ty(self.tg.meta.root)?.label().to_string();
		let root_fields = self.tg.root_fields()?;
		let selected = self.struct_fields(set, &root_name)?;
		if selected.is_empty() {
			return Err(anyhow::Error::new(Error::InvalidQuery(
				"the operation selects no fields".to_string(),
			)));
		}

		let mut roots = Vec::with_capacity(selected.len());
		let mut plan_effect = Effect::None;
		for field_ast in selected {
			let field_name = field_ast.node.name.node.as_str();
			let ty = *root_fields.get(field_name).ok_or_else(|| {
				anyhow::Error::new(Error::UnknownField {
					ty: root_name.clone(),
					field: field_name.to_string(),
				})
			})?;
			let TypeKind::Function {
				materializer,
				..
			} = &self.tg.ty(ty)?.kind
			else {
				return Err(anyhow::Error::new(Error::unreachable(
					"root fields are functions by construction",
				)));
			};
			let mat = self.tg.materializer(*materializer)?;

			// Classify the operation effect from the root materializer.
			let op_effect = match op_type {
				ast::OperationType::Query if !mat.effect.is_read() => {
					return Err(anyhow::Error::new(Error::EffectMismatch {
						operation: "query".to_string(),
						field: field_name.to_string(),
					}));
				}
				ast::OperationType::Query => Effect::None,
				ast::OperationType::Mutation if mat.effect.is_read() => {
					return Err(anyhow::Error::new(Error::EffectMismatch {
						operation: "mutation".to_string(),
						field: field_name.to_string(),
					}));
				}
				ast::OperationType::Mutation => mat.effect,
				ast::OperationType::Subscription => {
					return Err(anyhow::Error::new(Error::UnsupportedOperation(
						"subscription".to_string(),
					)));
				}
			};
			if roots.is_empty() {
				plan_effect = op_effect;
			}

			// Root fields with no chain of their own inherit the typegraph's
			// default policy chain.
			let inherited = if self.tg.meta.default_policy.is_empty() {
				None
			} else {
				Some(
					self.policies
						.check(&self.tg.meta.default_policy, op_effect, None)
						.await?,
				)
			};

			let node = self.build_node(field_ast, ty, op_effect, inherited, 0).await?;
			roots.push(node);
		}

		let score = roots.iter().map(score_node).sum();
		Ok(Plan {
			roots,
			effect: plan_effect,
			score,
		})
	}

	/// Build one plan node for a selected field of declared type `ty`.
	fn build_node<'b>(
		&'b self,
		field_ast: &'b Positioned<ast::Field>,
		ty: TypeId,
		op_effect: Effect,
		inherited: Option<Verdict>,
		depth: usize,
	) -> futures::future::BoxFuture<'b, Result<PlanNode>> {
		Box::pin(async move {
			if depth > *cnf::MAX_PLAN_DEPTH {
				return Err(anyhow::Error::new(Error::InvalidQuery(format!(
					"selection set exceeds the maximum depth of {}",
					*cnf::MAX_PLAN_DEPTH
				))));
			}
			let field = field_ast.node.name.node.to_string();
			let alias = field_ast
				.node
				.alias
				.as_ref()
				.map(|a| a.node.to_string())
				.unwrap_or_else(|| field.clone());

			let node_ty = self.tg.ty(ty)?;
			let verdict =
				self.policies.check(&node_ty.policies, op_effect, inherited.as_ref()).await?;
			if let Verdict::Deny {
				policy,
			} = verdict
			{
				trace!(%field, %policy, "policy denied a subtree");
				return Ok(PlanNode {
					alias,
					field,
					output: ty,
					dispatch: None,
					children: Vec::new(),
					variants: Vec::new(),
					denied: Some(policy),
				});
			}

			match &node_ty.kind {
				TypeKind::Function {
					input,
					output,
					materializer,
				} => {
					let mat = self.tg.materializer(*materializer)?;
					let adapter = self.dispatcher.adapter(mat.runtime)?;
					let args = self.build_args(field_ast, *input, &field)?;
					let built = self
						.build_selection(field_ast, *output, op_effect, verdict, depth, false)
						.await?;
					let (children, variants) = match built {
						BuiltSelection::Denied(policy) => {
							return Ok(PlanNode {
								alias,
								field,
								output: *output,
								dispatch: None,
								children: Vec::new(),
								variants: Vec::new(),
								denied: Some(policy),
							});
						}
						BuiltSelection::Ok {
							children,
							variants,
						} => (children, variants),
					};
					let selection = render_selection(&children, &variants);
					let dispatch = DispatchSpec {
						materializer: *materializer,
						runtime: mat.runtime,
						effect: mat.effect,
						op_name: mat.name.clone(),
						data: mat.data.clone(),
						args,
						rate_weight: mat.rate_weight,
						rate_by_result_count: mat.rate_by_result_count,
						batchable: adapter.supports_batching(),
						selection: if selection.is_empty() {
							None
						} else {
							Some(selection)
						},
					};
					Ok(PlanNode {
						alias,
						field,
						output: *output,
						dispatch: Some(dispatch),
						children,
						variants,
						denied: None,
					})
				}
				_ => {
					let built = self
						.build_selection(field_ast, ty, op_effect, verdict, depth, true)
						.await?;
					let (children, variants) = match built {
						BuiltSelection::Denied(policy) => {
							return Ok(PlanNode {
								alias,
								field,
								output: ty,
								dispatch: None,
								children: Vec::new(),
								variants: Vec::new(),
								denied: Some(policy),
							});
						}
						BuiltSelection::Ok {
							children,
							variants,
						} => (children, variants),
					};
					Ok(PlanNode {
						alias,
						field,
						output: ty,
						dispatch: None,
						children,
						variants,
						denied: None,
					})
				}
			}
		})
	}

	/// Walk wrappers down to the core type, folding in wrapper policy
	/// chains, then build the selection against the core.
	async fn build_selection(
		&self,
		field_ast: &Positioned<ast::Field>,
		ty: TypeId,
		op_effect: Effect,
		mut verdict: Verdict,
		depth: usize,
		mut chain_checked: bool,
	) -> Result<BuiltSelection> {
		let field = field_ast.node.name.node.as_str();
		let mut current = ty;
		loop {
			let node = self.tg.ty(current)?;
			if !chain_checked {
				verdict = self.policies.check(&node.policies, op_effect, Some(&verdict)).await?;
				if let Verdict::Deny {
					policy,
				} = verdict
				{
					return Ok(BuiltSelection::Denied(policy));
				}
			}
			chain_checked = false;
			match &node.kind {
				TypeKind::Optional {
					of,
				}
				| TypeKind::List {
					of,
				} => current = *of,
				_ => break,
			}
		}

		let core = self.tg.ty(current)?;
		let selection = &field_ast.node.selection_set.node;
		match &core.kind {
			kind if kind.is_scalar() => {
				if !selection.items.is_empty() {
					return Err(anyhow::Error::new(Error::UnexpectedSelection {
						ty: core.label().to_string(),
						field: field.to_string(),
					}));
				}
				Ok(BuiltSelection::Ok {
					children: Vec::new(),
					variants: Vec::new(),
				})
			}
			TypeKind::Struct {
				fields,
			} => {
				let selected = self.struct_fields(selection, core.label())?;
				if selected.is_empty() {
					return Err(anyhow::Error::new(Error::MissingSelection {
						ty: core.label().to_string(),
						field: field.to_string(),
					}));
				}
				let mut children = Vec::with_capacity(selected.len());
				for child_ast in selected {
					let child_name = child_ast.node.name.node.as_str();
					let child_ty = *fields.get(child_name).ok_or_else(|| {
						anyhow::Error::new(Error::UnknownField {
							ty: core.label().to_string(),
							field: child_name.to_string(),
						})
					})?;
					let child = self
						.build_node(child_ast, child_ty, op_effect, Some(verdict.clone()), depth + 1)
						.await?;
					children.push(child);
				}
				Ok(BuiltSelection::Ok {
					children,
					variants: Vec::new(),
				})
			}
			TypeKind::Union {
				any_of: members,
			}
			| TypeKind::Either {
				one_of: members,
			} => {
				let flat = self.collect_selection(selection)?;
				if !flat.fields.is_empty() || flat.variants.is_empty() {
					return Err(anyhow::Error::new(Error::UndiscriminatedUnion {
						ty: core.label().to_string(),
					}));
				}
				let mut variants = Vec::with_capacity(flat.variants.len());
				for (type_name, sub_selection) in flat.variants {
					let member = members
						.iter()
						.copied()
						.find(|m| {
							self.tg
								.ty(*m)
								.map(|node| node.label() == type_name)
								.unwrap_or(false)
						})
						.ok_or_else(|| {
							anyhow::Error::new(Error::UnknownUnionMember {
								ty: core.label().to_string(),
								variant: type_name.clone(),
							})
						})?;
					let member_node = self.tg.ty(member)?;
					let TypeKind::Struct {
						fields,
					} = &member_node.kind
					else {
						return Err(anyhow::Error::new(Error::InvalidQuery(format!(
							"member '{type_name}' cannot carry a selection set"
						))));
					};
					let selected = self.struct_fields(sub_selection, member_node.label())?;
					let mut children = Vec::with_capacity(selected.len());
					for child_ast in selected {
						let child_name = child_ast.node.name.node.as_str();
						let child_ty = *fields.get(child_name).ok_or_else(|| {
							anyhow::Error::new(Error::UnknownField {
								ty: type_name.clone(),
								field: child_name.to_string(),
							})
						})?;
						let child = self
							.build_node(
								child_ast,
								child_ty,
								op_effect,
								Some(verdict.clone()),
								depth + 1,
							)
							.await?;
						children.push(child);
					}
					variants.push(VariantSelection {
						type_name,
						ty: member,
						children,
					});
				}
				Ok(BuiltSelection::Ok {
					children: Vec::new(),
					variants,
				})
			}
			TypeKind::Function {
				..
			} => Err(anyhow::Error::new(Error::unreachable(
				"a function output cannot itself be a bare function",
			))),
			_ => Err(anyhow::Error::new(Error::unreachable("unhandled core type"))),
		}
	}

	/// Resolve argument sources for a function field.
	fn build_args(
		&self,
		field_ast: &Positioned<ast::Field>,
		input: TypeId,
		field: &str,
	) -> Result<Vec<(String, ArgSource)>> {
		let TypeKind::Struct {
			fields: input_fields,
		} = &self.tg.ty(input)?.kind
		else {
			return Err(anyhow::Error::new(Error::unreachable(
				"function inputs are structs by construction",
			)));
		};

		// Evaluate client-supplied literals with variables substituted.
		let mut provided = indexmap::IndexMap::new();
		for (name, value) in &field_ast.node.arguments {
			let const_value = value
				.node
				.clone()
				.into_const_with(|variable: Name| -> Result<async_graphql::Value> {
					let json = self.variables.get(variable.as_str()).ok_or_else(|| {
						anyhow::Error::new(Error::UndefinedVariable(variable.to_string()))
					})?;
					async_graphql::Value::from_json(json.clone()).map_err(|e| {
						anyhow::Error::new(Error::InvalidQuery(e.to_string()))
					})
				})?;
			let json = const_value
				.into_json()
				.map_err(|e| anyhow::Error::new(Error::InvalidQuery(e.to_string())))?;
			provided.insert(name.node.to_string(), json);
		}

		let mut args = Vec::with_capacity(input_fields.len());
		for (arg_name, arg_ty) in input_fields {
			let arg_node = self.tg.ty(*arg_ty)?;
			let optional = matches!(
				arg_node.kind,
				TypeKind::Optional {
					..
				}
			);
			if let Some(injection) = &arg_node.injection {
				// Injected arguments never come from the client.
				if provided.shift_remove(arg_name).is_some() {
					return Err(anyhow::Error::new(Error::InjectedArgument {
						field: field.to_string(),
						name: arg_name.clone(),
					}));
				}
				match injection::resolve(injection, self.ctx, optional)? {
					Resolved::Value(value) => {
						args.push((arg_name.clone(), ArgSource::Const(value)));
					}
					Resolved::Pending {
						field: parent_field,
					} => {
						args.push((arg_name.clone(), ArgSource::FromParent(parent_field)));
					}
				}
				continue;
			}
			match provided.shift_remove(arg_name) {
				Some(value) => {
					if !value_fits(self.tg, *arg_ty, &value) {
						return Err(anyhow::Error::new(Error::InvalidArgument {
							field: field.to_string(),
							name: arg_name.clone(),
							expected: self.tg.type_label(*arg_ty),
						}));
					}
					args.push((arg_name.clone(), ArgSource::Const(value)));
				}
				None if optional => {}
				None => {
					return Err(anyhow::Error::new(Error::MissingArgument {
						field: field.to_string(),
						name: arg_name.clone(),
					}));
				}
			}
		}
		if let Some(extra) = provided.keys().next() {
			return Err(anyhow::Error::new(Error::UnexpectedArgument {
				field: field.to_string(),
				name: extra.clone(),
			}));
		}
		Ok(args)
	}

	/// Flatten one selection set level: fields, plus type-conditioned
	/// fragments (inline or spread).
	fn collect_selection<'s>(&'s self, set: &'s ast::SelectionSet) -> Result<FlatSelection<'s>> {
		let mut flat = FlatSelection {
			fields: Vec::new(),
			variants: Vec::new(),
		};
		for item in &set.items {
			match &item.node {
				ast::Selection::Field(field) => flat.fields.push(field),
				ast::Selection::FragmentSpread(spread) => {
					let definition = self
						.fragments
						.get(&spread.node.fragment_name.node)
						.ok_or_else(|| {
							anyhow::Error::new(Error::InvalidQuery(format!(
								"unknown fragment '{}'",
								spread.node.fragment_name.node
							)))
						})?;
					flat.variants.push((
						definition.node.type_condition.node.on.node.to_string(),
						&definition.node.selection_set.node,
					));
				}
				ast::Selection::InlineFragment(fragment) => {
					match &fragment.node.type_condition {
						Some(condition) => flat.variants.push((
							condition.node.on.node.to_string(),
							&fragment.node.selection_set.node,
						)),
						None => {
							let nested =
								self.collect_selection(&fragment.node.selection_set.node)?;
							flat.fields.extend(nested.fields);
							flat.variants.extend(nested.variants);
						}
					}
				}
			}
		}
		Ok(flat)
	}

	/// Flatten a struct selection, merging fragments conditioned on the
	/// struct itself; fragments on other types are rejected.
	fn struct_fields<'s>(
		&'s self,
		set: &'s ast::SelectionSet,
		struct_name: &str,
	) -> Result<Vec<&'s Positioned<ast::Field>>> {
		let mut fields = Vec::new();
		let mut queue = vec![set];
		while let Some(set) = queue.pop() {
			let flat = self.collect_selection(set)?;
			fields.extend(flat.fields);
			for (condition, sub) in flat.variants {
				if condition == struct_name {
					queue.push(sub);
				} else {
					return Err(anyhow::Error::new(Error::UnknownUnionMember {
						ty: struct_name.to_string(),
						variant: condition,
					}));
				}
			}
		}
		Ok(fields)
	}
}

/// Structural check of a JSON value against an arena type.
///
/// Also used to discriminate union members at merge time, so it must stay
/// total: malformed ids simply fail the check.
pub(crate) fn value_fits(tg: &Typegraph, ty: TypeId, value: &Value) -> bool {
	let Ok(node) = tg.ty(ty) else {
		return false;
	};
	match &node.kind {
		TypeKind::Boolean => value.is_boolean(),
		TypeKind::Integer => value.is_i64() || value.is_u64(),
		TypeKind::Float => value.is_number(),
		TypeKind::String => value.is_string(),
		TypeKind::Optional {
			of,
		} => value.is_null() || value_fits(tg, *of, value),
		TypeKind::List {
			of,
		} => match value.as_array() {
			Some(items) => items.iter().all(|item| value_fits(tg, *of, item)),
			None => false,
		},
		TypeKind::Struct {
			fields,
		} => match value.as_object() {
			Some(map) => {
				map.keys().all(|k| fields.contains_key(k))
					&& fields.iter().all(|(name, id)| match map.get(name) {
						Some(v) => value_fits(tg, *id, v),
						None => {
							let Ok(field_node) = tg.ty(*id) else {
								return false;
							};
							field_node.injection.is_some()
								|| matches!(
									field_node.kind,
									TypeKind::Optional {
										..
									}
								)
						}
					})
			}
			None => false,
		},
		TypeKind::Union {
			any_of,
		} => any_of.iter().any(|member| value_fits(tg, *member, value)),
		TypeKind::Either {
			one_of,
		} => one_of.iter().filter(|member| value_fits(tg, **member, value)).count() == 1,
		TypeKind::Function {
			..
		} => false,
	}
}

/// Render the projection part of a node's selection as upstream GraphQL.
///
/// Function children dispatch separately, so only their parent dependencies
/// surface here as bare fields.
pub(crate) fn render_selection(children: &[PlanNode], variants: &[VariantSelection]) -> String {
	let mut parts: Vec<String> = Vec::new();
	for child in children {
		match &child.dispatch {
			Some(spec) => {
				for (_, source) in &spec.args {
					if let ArgSource::FromParent(field) = source {
						if !parts.contains(field) {
							parts.push(field.clone());
						}
					}
				}
			}
			None => {
				let mut token = if child.alias != child.field {
					format!("{}: {}", child.alias, child.field)
				} else {
					child.field.clone()
				};
				let sub = render_selection(&child.children, &child.variants);
				if !sub.is_empty() {
					token.push(' ');
					token.push_str(&sub);
				}
				if !parts.contains(&token) {
					parts.push(token);
				}
			}
		}
	}
	for variant in variants {
		let sub = render_selection(&variant.children, &[]);
		parts.push(format!("... on {} {sub}", variant.type_name));
	}
	if parts.is_empty() {
		String::new()
	} else {
		format!("{{ {} }}", parts.join(" "))
	}
}

fn score_node(node: &PlanNode) -> u32 {
	let own = node.dispatch.as_ref().map(|d| d.rate_weight).unwrap_or(0);
	own + node.children.iter().map(score_node).sum::<u32>()
		+ node
			.variants
			.iter()
			.flat_map(|v| v.children.iter())
			.map(score_node)
			.sum::<u32>()
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::ctx::SecretStore;
	use crate::rt::value::ValueAdapter;
	use crate::typegraph::TypegraphDoc;

	/// user: { id: integer, name: string }, findUser(id): user,
	/// dropUser(id): boolean (delete effect), all public.
	fn fixture() -> (Typegraph, Dispatcher) {
		let doc: TypegraphDoc = serde_json::from_value(serde_json::json!({
			"version": "0.3",
			"name": "plans",
			"types": [
				{"name": "Query", "type": "struct", "fields": {"findUser": 1, "dropUser": 8}},
				{"name": "findUser", "type": "function", "input": 2, "output": 4, "materializer": 1},
				{"type": "struct", "fields": {"id": 3}},
				{"type": "integer"},
				{"name": "user", "type": "struct", "fields": {"id": 3, "name": 5}},
				{"type": "string"},
				{"type": "optional", "of": 5},
				{"type": "struct", "fields": {"id": 3, "note": 6}},
				{"name": "dropUser", "type": "function", "input": 7, "output": 9, "materializer": 2},
				{"type": "boolean"},
			],
			"materializers": [
				{"name": "value", "runtime": 0, "data": {"value": true}},
				{"name": "value", "runtime": 0, "data": {"value": {"id": 1, "name": "ada"}}, "rate_weight": 2},
				{"name": "value", "runtime": 0, "data": {"value": true}, "effect": "delete"},
			],
			"runtimes": [{"name": "main", "kind": "value"}],
			"policies": [{"name": "public", "single": 0}],
			"meta": {"root": 0, "default_policy": [0]},
		}))
		.unwrap();
		let tg = Typegraph::compile(doc).unwrap();
		let dispatcher = Dispatcher::from_adapters(vec![Arc::new(ValueAdapter::new("main"))]);
		(tg, dispatcher)
	}

	fn ctx() -> RequestContext {
		RequestContext::anonymous(Arc::new(SecretStore::default()))
	}

	async fn plan_for(query: &str) -> Result<Plan> {
		let (tg, dispatcher) = fixture();
		let ctx = ctx();
		build(&tg, &dispatcher, &ctx, query, None, &serde_json::Map::new()).await
	}

	#[tokio::test]
	async fn builds_aliased_plan_with_score() {
		let plan = plan_for("{ u: findUser(id: 1) { id name } }").await.unwrap();
		assert_eq!(plan.roots.len(), 1);
		assert_eq!(plan.roots[0].alias, "u");
		assert_eq!(plan.roots[0].field, "findUser");
		assert_eq!(plan.roots[0].children.len(), 2);
		assert_eq!(plan.score, 2);
		assert_eq!(plan.effect, Effect::None);
	}

	#[tokio::test]
	async fn unknown_field_is_rejected() {
		let err = plan_for("{ findUser(id: 1) { id nope } }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::UnknownField {
				..
			})
		));
	}

	#[tokio::test]
	async fn scalar_selection_is_rejected() {
		let err = plan_for("{ findUser(id: 1) { id { x } } }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::UnexpectedSelection {
				..
			})
		));
	}

	#[tokio::test]
	async fn struct_needs_a_selection() {
		let err = plan_for("{ findUser(id: 1) }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::MissingSelection {
				..
			})
		));
	}

	#[tokio::test]
	async fn missing_argument_is_rejected() {
		let err = plan_for("{ findUser { id } }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::MissingArgument {
				..
			})
		));
	}

	#[tokio::test]
	async fn wrong_argument_type_is_rejected() {
		let err = plan_for("{ findUser(id: \"one\") { id } }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::InvalidArgument {
				..
			})
		));
	}

	#[tokio::test]
	async fn unexpected_argument_is_rejected() {
		let err = plan_for("{ findUser(id: 1, extra: true) { id } }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::UnexpectedArgument {
				..
			})
		));
	}

	#[tokio::test]
	async fn optional_arguments_may_be_omitted() {
		let plan = plan_for("mutation { dropUser(id: 3) }").await.unwrap();
		assert_eq!(plan.effect, Effect::Delete);
		let spec = plan.roots[0].dispatch.as_ref().unwrap();
		assert_eq!(spec.args.len(), 1);
	}

	#[tokio::test]
	async fn queries_cannot_select_effectful_fields() {
		let err = plan_for("{ dropUser(id: 3) }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::EffectMismatch {
				..
			})
		));
	}

	#[tokio::test]
	async fn mutations_cannot_select_pure_fields() {
		let err = plan_for("mutation { findUser(id: 1) { id } }").await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::EffectMismatch {
				..
			})
		));
	}

	#[tokio::test]
	async fn variables_substitute_into_arguments() {
		let (tg, dispatcher) = fixture();
		let ctx = ctx();
		let variables = serde_json::json!({"uid": 7});
		let plan = build(
			&tg,
			&dispatcher,
			&ctx,
			"query find($uid: Int!) { findUser(id: $uid) { id } }",
			None,
			variables.as_object().unwrap(),
		)
		.await
		.unwrap();
		let spec = plan.roots[0].dispatch.as_ref().unwrap();
		match &spec.args[0].1 {
			ArgSource::Const(v) => assert_eq!(v, &serde_json::json!(7)),
			other => panic!("unexpected arg source: {other:?}"),
		}
	}

	#[tokio::test]
	async fn undefined_variable_is_rejected() {
		let err = plan_for("query find($uid: Int!) { findUser(id: $missing) { id } }")
			.await
			.unwrap_err();
		// The parser itself rejects undeclared variables; either way the
		// request fails validation before any dispatch.
		assert!(err.downcast_ref::<Error>().is_some());
	}

	#[test]
	fn value_fits_covers_wrappers() {
		let (tg, _) = fixture();
		assert!(value_fits(&tg, TypeId(3), &serde_json::json!(5)));
		assert!(!value_fits(&tg, TypeId(3), &serde_json::json!("5")));
		// Optional string.
		assert!(value_fits(&tg, TypeId(6), &serde_json::json!(null)));
		assert!(value_fits(&tg, TypeId(6), &serde_json::json!("x")));
		// Struct with optional member.
		assert!(value_fits(&tg, TypeId(7), &serde_json::json!({"id": 1})));
		assert!(!value_fits(&tg, TypeId(7), &serde_json::json!({"id": 1, "bogus": 2})));
	}

	#[test]
	fn selection_rendering_includes_parent_dependencies() {
		let child = PlanNode {
			alias: "remote".to_string(),
			field: "remote".to_string(),
			output: TypeId(3),
			dispatch: Some(DispatchSpec {
				materializer: MaterializerId(0),
				runtime: RuntimeId(0),
				effect: Effect::None,
				op_name: "value".to_string(),
				data: serde_json::Map::new(),
				args: vec![("id".to_string(), ArgSource::FromParent("id".to_string()))],
				rate_weight: 1,
				rate_by_result_count: false,
				batchable: true,
				selection: None,
			}),
			children: Vec::new(),
			variants: Vec::new(),
			denied: None,
		};
		let plain = PlanNode {
			alias: "display".to_string(),
			field: "name".to_string(),
			output: TypeId(5),
			dispatch: None,
			children: Vec::new(),
			variants: Vec::new(),
			denied: None,
		};
		let rendered = render_selection(&[plain, child], &[]);
		assert_eq!(rendered, "{ display: name id }");
	}
}
