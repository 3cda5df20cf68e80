//! Request-context extraction: the `Authorization` header populates the
//! claims consumed by context injections and policy predicates. This is the
//! authenticated-context shape only, not provider UX.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use typewire_core::Gateway;
use typewire_core::ctx::RequestContext;

use crate::AppState;

/// Build the per-request context from the active generation and headers.
pub(crate) fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
	let gateway = state.gateway.load();
	let claims = bearer_claims(&gateway, headers);
	let peer = headers
		.get("x-forwarded-for")
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.split(',').next())
		.map(|value| value.trim().to_string());
	RequestContext::new(claims, peer, gateway.secrets().clone())
}

/// Decode bearer claims with the typegraph's configured HS256 secret.
///
/// Anything short of a valid token resolves to the anonymous context;
/// default-deny policies take it from there.
fn bearer_claims(
	gateway: &Gateway,
	headers: &HeaderMap,
) -> serde_json::Map<String, serde_json::Value> {
	let anonymous = serde_json::Map::new;
	let Some(header) = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) else {
		return anonymous();
	};
	let Some(token) = header.strip_prefix("Bearer ") else {
		return anonymous();
	};
	let Some(secret_name) = gateway.typegraph().meta.auth.secret_name.as_deref() else {
		debug!("bearer token presented but the typegraph configures no auth secret");
		return anonymous();
	};
	let Some(key) = gateway.secrets().get(secret_name) else {
		warn!(secret_name, "auth secret is not present in the secrets store");
		return anonymous();
	};
	let mut validation = Validation::new(Algorithm::HS256);
	validation.validate_exp = false;
	validation.required_spec_claims.clear();
	match decode::<serde_json::Map<String, serde_json::Value>>(
		token,
		&DecodingKey::from_secret(key.as_bytes()),
		&validation,
	) {
		Ok(data) => data.claims,
		Err(err) => {
			warn!(error = %err, "rejecting an invalid bearer token");
			anonymous()
		}
	}
}
