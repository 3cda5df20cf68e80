//! Typegraph deployment: compile an uploaded document into a fresh gateway
//! generation and swap it in atomically. In-flight requests finish against
//! the generation they were planned on; the replaced generation's wire
//! instances are disposed when its last reference drains.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::IntoResponse;
use axum::routing::put;
use axum::{Extension, Json, Router};
use typewire_core::Gateway;
use typewire_core::typegraph::TypegraphDoc;

use crate::{AppState, cnf};

pub fn router<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
{
	Router::new().route("/typegraph", put(handle_put))
}

async fn handle_put(
	Extension(state): Extension<AppState>,
	headers: HeaderMap,
	Json(doc): Json<TypegraphDoc>,
) -> impl IntoResponse {
	// Deploys are guarded by the admin token when one is configured.
	if let Some(expected) = cnf::admin_token() {
		let presented = headers
			.get(AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.strip_prefix("Bearer "));
		if presented != Some(expected.as_str()) {
			return (
				StatusCode::UNAUTHORIZED,
				Json(serde_json::json!({"error": "deploys require the admin token"})),
			);
		}
	}

	let name = doc.name.clone();
	match Gateway::new(doc, &state.services, Arc::clone(&state.wire)).await {
		Ok(gateway) => {
			state.gateway.store(Arc::new(gateway));
			info!(typegraph = %name, "typegraph generation deployed");
			(StatusCode::OK, Json(serde_json::json!({"deployed": name})))
		}
		Err(err) => {
			// Configuration errors are fatal to the deployment, never to
			// the generation already serving traffic.
			warn!(typegraph = %name, error = %err, "typegraph deploy rejected");
			(
				StatusCode::UNPROCESSABLE_ENTITY,
				Json(serde_json::json!({"error": err.to_string()})),
			)
		}
	}
}
