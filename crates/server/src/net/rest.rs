//! REST mapping onto the active typegraph: GET resolves query fields with
//! query-parameter arguments, POST resolves mutation fields with a JSON
//! body. Both run through the same planner as GraphQL requests.

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::Value;
use typewire_core::plan::Response;

use crate::{AppState, auth};

pub fn router<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
{
	Router::new().route("/rest/{field}", get(handle_get).post(handle_post))
}

async fn handle_get(
	Extension(state): Extension<AppState>,
	headers: HeaderMap,
	Path(field): Path<String>,
	Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
	let args = params.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
	let ctx = auth::request_context(&state, &headers);
	let gateway = state.gateway.load_full();
	Json(gateway.handle_rest(&field, args, false, &ctx).await)
}

async fn handle_post(
	Extension(state): Extension<AppState>,
	headers: HeaderMap,
	Path(field): Path<String>,
	body: axum::body::Bytes,
) -> impl IntoResponse {
	let args = if body.is_empty() {
		serde_json::Map::new()
	} else {
		match serde_json::from_slice::<Value>(&body) {
			Ok(Value::Object(map)) => map,
			Ok(Value::Null) => serde_json::Map::new(),
			Ok(_) => {
				let err = anyhow::anyhow!("the request body must be a JSON object");
				return Json(Response::request_error(&err));
			}
			Err(err) => {
				let err = anyhow::anyhow!("invalid JSON body: {err}");
				return Json(Response::request_error(&err));
			}
		}
	};
	let ctx = auth::request_context(&state, &headers);
	let gateway = state.gateway.load_full();
	Json(gateway.handle_rest(&field, args, true, &ctx).await)
}
