//! GraphQL-over-HTTP: the standard query/variables/operationName envelope,
//! POSTed as JSON or passed as GET query parameters.

use axum::extract::Query;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use typewire_core::GatewayRequest;
use typewire_core::plan::Response;

use crate::{AppState, auth};

pub fn router<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
{
	Router::new().route("/graphql", get(handle_get).post(handle_post))
}

async fn handle_post(
	Extension(state): Extension<AppState>,
	headers: HeaderMap,
	Json(request): Json<GatewayRequest>,
) -> impl IntoResponse {
	Json(resolve(&state, &headers, request).await)
}

/// GET envelope: `variables` travels as a JSON-encoded string.
#[derive(Deserialize)]
struct GetParams {
	query: String,
	#[serde(rename = "operationName")]
	operation_name: Option<String>,
	variables: Option<String>,
}

async fn handle_get(
	Extension(state): Extension<AppState>,
	headers: HeaderMap,
	Query(params): Query<GetParams>,
) -> impl IntoResponse {
	let variables = match params.variables.as_deref() {
		Some(text) => match serde_json::from_str(text) {
			Ok(map) => map,
			Err(err) => {
				let err = anyhow::anyhow!("invalid 'variables' parameter: {err}");
				return Json(Response::request_error(&err));
			}
		},
		None => serde_json::Map::new(),
	};
	let request = GatewayRequest {
		query: params.query,
		operation_name: params.operation_name,
		variables,
	};
	Json(resolve(&state, &headers, request).await)
}

async fn resolve(state: &AppState, headers: &HeaderMap, request: GatewayRequest) -> Response {
	let ctx = auth::request_context(state, headers);
	// Keep this generation alive for the whole request even if a deploy
	// swaps in a new one mid-flight.
	let gateway = state.gateway.load_full();
	gateway.handle(request, &ctx).await
}
