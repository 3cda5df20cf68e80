//! Liveness probe.

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::AppState;

pub fn router<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
{
	Router::new().route("/health", get(handle))
}

async fn handle(Extension(state): Extension<AppState>) -> impl IntoResponse {
	let gateway = state.gateway.load();
	Json(serde_json::json!({
		"status": "ok",
		"typegraph": gateway.typegraph().name.clone(),
	}))
}
