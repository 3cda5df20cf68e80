//! The gateway: one compiled typegraph generation bound to its runtime
//! adapters, rate limiter and secrets.
//!
//! A gateway is immutable once built. Redeploys construct a new gateway and
//! swap it in wholesale; requests holding the old `Arc` drain against the
//! generation they were planned on, and dropping the old gateway disposes
//! its wire instances deterministically.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use crate::ctx::{RequestContext, SecretStore};
use crate::plan::{self, Response};
use crate::rate::{RateLimiter, SharedCounter};
use crate::rt::{Dispatcher, NativeServices};
use crate::typegraph::{Typegraph, TypegraphDoc};

/// The standard GraphQL-over-HTTP request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRequest {
	pub query: String,
	#[serde(default, rename = "operationName")]
	pub operation_name: Option<String>,
	#[serde(default, deserialize_with = "nullable_variables")]
	pub variables: serde_json::Map<String, Value>,
}

fn nullable_variables<'de, D>(
	deserializer: D,
) -> Result<serde_json::Map<String, Value>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let value = Option::<serde_json::Map<String, Value>>::deserialize(deserializer)?;
	Ok(value.unwrap_or_default())
}

pub struct Gateway {
	typegraph: Arc<Typegraph>,
	dispatcher: Dispatcher,
	limiter: Option<Arc<RateLimiter>>,
	secrets: Arc<SecretStore>,
}

impl Gateway {
	/// Compile a typegraph document and build its runtime adapters.
	pub async fn new(
		doc: TypegraphDoc,
		services: &NativeServices,
		wire_host: Arc<witwire::WireHost>,
	) -> Result<Self> {
		let tg = Typegraph::compile(doc)?;
		let secrets = Arc::new(SecretStore::from_env(&tg.name));
		let dispatcher = Dispatcher::build(&tg, services, wire_host).await?;
		let limiter = tg.meta.rate.clone().map(|cfg| Arc::new(RateLimiter::new(cfg)));
		info!(typegraph = %tg.name, "gateway generation ready");
		Ok(Self {
			typegraph: Arc::new(tg),
			dispatcher,
			limiter,
			secrets,
		})
	}

	/// Assemble a gateway from pre-built parts; used by embedders and tests
	/// that bring their own adapters.
	pub fn from_parts(
		typegraph: Arc<Typegraph>,
		dispatcher: Dispatcher,
		limiter: Option<Arc<RateLimiter>>,
		secrets: Arc<SecretStore>,
	) -> Self {
		Self {
			typegraph,
			dispatcher,
			limiter,
			secrets,
		}
	}

	/// Back the rate limiter with a replica-shared counter.
	pub fn with_shared_counter(mut self, shared: Arc<dyn SharedCounter>) -> Self {
		if let Some(cfg) = self.typegraph.meta.rate.clone() {
			self.limiter = Some(Arc::new(RateLimiter::with_shared(cfg, shared)));
		}
		self
	}

	pub fn typegraph(&self) -> &Arc<Typegraph> {
		&self.typegraph
	}

	pub fn secrets(&self) -> &Arc<SecretStore> {
		&self.secrets
	}

	/// Resolve one GraphQL request end to end.
	///
	/// Whole-request failures (validation, rate limiting) return an envelope
	/// with no data; field-scoped failures surface inside the data shape.
	pub async fn handle(&self, request: GatewayRequest, ctx: &RequestContext) -> Response {
		match self.try_handle(&request, ctx).await {
			Ok(response) => response,
			Err(err) => {
				debug!(request_id = %ctx.request_id, error = %err, "request rejected");
				Response::request_error(&err)
			}
		}
	}

	async fn try_handle(&self, request: &GatewayRequest, ctx: &RequestContext) -> Result<Response> {
		let plan = plan::build(
			&self.typegraph,
			&self.dispatcher,
			ctx,
			&request.query,
			request.operation_name.as_deref(),
			&request.variables,
		)
		.await?;

		// Score the whole plan before any dispatch.
		let guard = match &self.limiter {
			Some(limiter) => {
				let identity = ctx.identity(limiter.config().context_identifier.as_deref());
				Some(limiter.check_and_score(&identity, plan.score).await?)
			}
			None => None,
		};

		let (data, errors) = plan::executor::execute(
			&self.typegraph,
			&self.dispatcher,
			ctx,
			guard.as_ref(),
			&plan,
		)
		.await;
		Ok(Response::new(data, errors))
	}

	/// REST mapping: resolve a root field addressed by URL through the same
	/// planner as GraphQL requests.
	pub async fn handle_rest(
		&self,
		field: &str,
		raw_args: serde_json::Map<String, Value>,
		mutation: bool,
		ctx: &RequestContext,
	) -> Response {
		let request = match self.rest_request(field, raw_args, mutation) {
			Ok(request) => request,
			Err(err) => return Response::request_error(&err),
		};
		self.handle(request, ctx).await
	}

	fn rest_request(
		&self,
		field: &str,
		raw_args: serde_json::Map<String, Value>,
		mutation: bool,
	) -> Result<GatewayRequest> {
		let args = plan::rest::coerce_args(&self.typegraph, field, raw_args)?;
		let query = plan::rest::build_query(&self.typegraph, field, &args, mutation)?;
		trace!(%field, %query, "rest request mapped onto the typegraph");
		Ok(GatewayRequest {
			query,
			operation_name: None,
			variables: serde_json::Map::new(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_envelope_accepts_null_variables() {
		let request: GatewayRequest =
			serde_json::from_str(r#"{"query": "{ ping }", "variables": null}"#).unwrap();
		assert!(request.variables.is_empty());
		assert!(request.operation_name.is_none());
	}

	#[test]
	fn request_envelope_reads_operation_name() {
		let request: GatewayRequest = serde_json::from_str(
			r#"{"query": "query A { a } query B { b }", "operationName": "B", "variables": {"x": 1}}"#,
		)
		.unwrap();
		assert_eq!(request.operation_name.as_deref(), Some("B"));
		assert_eq!(request.variables["x"], 1);
	}
}
