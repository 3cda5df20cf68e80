//! REST mapping onto the typegraph: a root field addressed by URL, args from
//! query params or the JSON body, and an automatic scalar selection over the
//! output. The generated query resolves through the exact same planner as
//! GraphQL requests.

use anyhow::Result;
use serde_json::Value;

use crate::cnf;
use crate::err::Error;
use crate::rt::graphql::render_value;
use crate::typegraph::{TypeId, TypeKind, Typegraph};

/// Build the GraphQL source for a REST call against a root field.
pub fn build_query(
	tg: &Typegraph,
	field: &str,
	args: &serde_json::Map<String, Value>,
	mutation: bool,
) -> Result<String> {
	let root_fields = tg.root_fields()?;
	let ty = *root_fields.get(field).ok_or_else(|| {
		anyhow::Error::new(Error::UnknownField {
			ty: tg.type_label(tg.meta.root),
			field: field.to_string(),
		})
	})?;
	let TypeKind::Function {
		output,
		..
	} = &tg.ty(ty)?.kind
	else {
		return Err(anyhow::Error::new(Error::unreachable("root fields are functions")));
	};
	let selection = auto_selection(tg, *output, *cnf::REST_AUTO_SELECT_DEPTH)?;
	let rendered_args = if args.is_empty() {
		String::new()
	} else {
		let parts: Vec<String> =
			args.iter().map(|(k, v)| format!("{k}: {}", render_value(v))).collect();
		format!("({})", parts.join(", "))
	};
	let operation = if mutation {
		"mutation"
	} else {
		"query"
	};
	let space = if selection.is_empty() {
		""
	} else {
		" "
	};
	Ok(format!("{operation} {{ {field}{rendered_args}{space}{selection} }}"))
}

/// Coerce string-valued query params into the scalar kinds the input type
/// declares; everything else passes through for the planner to validate.
pub fn coerce_args(
	tg: &Typegraph,
	field: &str,
	mut args: serde_json::Map<String, Value>,
) -> Result<serde_json::Map<String, Value>> {
	let root_fields = tg.root_fields()?;
	let Some(ty) = root_fields.get(field) else {
		return Ok(args);
	};
	let TypeKind::Function {
		input,
		..
	} = &tg.ty(*ty)?.kind
	else {
		return Ok(args);
	};
	let TypeKind::Struct {
		fields,
	} = &tg.ty(*input)?.kind
	else {
		return Ok(args);
	};
	for (name, value) in args.iter_mut() {
		let Some(expected) = fields.get(name) else {
			continue;
		};
		let Some(text) = value.as_str() else {
			continue;
		};
		if let Some(coerced) = coerce_scalar(tg, *expected, text) {
			*value = coerced;
		}
	}
	Ok(args)
}

fn coerce_scalar(tg: &Typegraph, ty: TypeId, text: &str) -> Option<Value> {
	let node = tg.ty(ty).ok()?;
	match &node.kind {
		TypeKind::Integer => text.parse::<i64>().ok().map(Value::from),
		TypeKind::Float => text.parse::<f64>().ok().map(Value::from),
		TypeKind::Boolean => text.parse::<bool>().ok().map(Value::from),
		TypeKind::Optional {
			of,
		} => coerce_scalar(tg, *of, text),
		_ => None,
	}
}

/// Automatic selection: every scalar field, recursing into structs down to
/// the depth cap. Functions and unions are never auto-selected.
fn auto_selection(tg: &Typegraph, ty: TypeId, depth: usize) -> Result<String> {
	let mut current = ty;
	loop {
		match &tg.ty(current)?.kind {
			TypeKind::Optional {
				of,
			}
			| TypeKind::List {
				of,
			} => current = *of,
			_ => break,
		}
	}
	let node = tg.ty(current)?;
	match &node.kind {
		kind if kind.is_scalar() => Ok(String::new()),
		TypeKind::Struct {
			fields,
		} => {
			let mut parts = Vec::new();
			for (name, field_ty) in fields {
				let mut field_core = *field_ty;
				loop {
					match &tg.ty(field_core)?.kind {
						TypeKind::Optional {
							of,
						}
						| TypeKind::List {
							of,
						} => field_core = *of,
						_ => break,
					}
				}
				match &tg.ty(field_core)?.kind {
					kind if kind.is_scalar() => parts.push(name.clone()),
					TypeKind::Struct {
						..
					} if depth > 0 => {
						let sub = auto_selection(tg, field_core, depth - 1)?;
						if !sub.is_empty() {
							parts.push(format!("{name} {sub}"));
						}
					}
					_ => {}
				}
			}
			if parts.is_empty() {
				return Err(anyhow::Error::new(Error::InvalidQuery(format!(
					"no auto-selectable fields on type '{}'",
					node.label()
				))));
			}
			Ok(format!("{{ {} }}", parts.join(" ")))
		}
		_ => Err(anyhow::Error::new(Error::InvalidQuery(format!(
			"type '{}' cannot be auto-selected for REST",
			node.label()
		)))),
	}
}
