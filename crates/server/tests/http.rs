//! HTTP surface tests: envelopes, REST mapping, hot deploys and the
//! authenticated context.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use typewire_core::Gateway;
use typewire_core::rt::NativeServices;
use typewire_core::typegraph::TypegraphDoc;
use typewire_server::AppState;
use witwire::WireHost;

/// A value-runtime typegraph greeting with a fixed message.
fn greeting_doc(name: &str, message: &str) -> TypegraphDoc {
	serde_json::from_value(serde_json::json!({
		"version": "0.3",
		"name": name,
		"types": [
			{"name": "Query", "type": "struct", "fields": {"hello": 1}},
			{"name": "hello", "type": "function", "input": 2, "output": 3, "materializer": 0},
			{"type": "struct", "fields": {}},
			{"type": "string"},
		],
		"materializers": [
			{"name": "value", "runtime": 0, "data": {"value": message}},
			{"name": "value", "runtime": 0, "data": {"value": true}},
		],
		"runtimes": [{"name": "main", "kind": "value"}],
		"policies": [{"name": "public", "single": 1}],
		"meta": {"root": 0, "default_policy": [0]},
	}))
	.unwrap()
}

async fn state_for(doc: TypegraphDoc) -> AppState {
	let services = NativeServices::in_memory();
	let wire = Arc::new(WireHost::new().unwrap());
	let gateway = Gateway::new(doc, &services, Arc::clone(&wire)).await.unwrap();
	AppState::new(gateway, services, wire)
}

async fn body_json(response: axum::response::Response) -> Value {
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
	serde_json::from_slice(&bytes).unwrap()
}

fn post_graphql(query: &str) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri("/graphql")
		.header("content-type", "application/json")
		.body(Body::from(
			serde_json::json!({"query": query}).to_string(),
		))
		.unwrap()
}

#[tokio::test]
async fn health_reports_the_active_typegraph() {
	let state = state_for(greeting_doc("demo", "hi")).await;
	let response = typewire_server::router(state)
		.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let json = body_json(response).await;
	assert_eq!(json["status"], "ok");
	assert_eq!(json["typegraph"], "demo");
}

#[tokio::test]
async fn graphql_post_resolves() {
	let state = state_for(greeting_doc("demo", "hello world")).await;
	let response =
		typewire_server::router(state).oneshot(post_graphql("{ hello }")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let json = body_json(response).await;
	assert_eq!(json["data"]["hello"], "hello world");
	assert!(json.get("errors").is_none());
}

#[tokio::test]
async fn graphql_get_resolves_with_query_params() {
	let state = state_for(greeting_doc("demo", "hello world")).await;
	let response = typewire_server::router(state)
		.oneshot(
			Request::builder()
				.uri("/graphql?query=%7B%20hello%20%7D")
				.body(Body::empty())
				.unwrap(),
		)
		.await
		.unwrap();
	let json = body_json(response).await;
	assert_eq!(json["data"]["hello"], "hello world");
}

#[tokio::test]
async fn rest_resolves_the_same_plan_as_graphql() {
	let state = state_for(greeting_doc("demo", "hello world")).await;
	let app = typewire_server::router(state);

	let graphql = body_json(app.clone().oneshot(post_graphql("{ hello }")).await.unwrap()).await;
	let rest = body_json(
		app.oneshot(Request::builder().uri("/rest/hello").body(Body::empty()).unwrap())
			.await
			.unwrap(),
	)
	.await;
	assert_eq!(graphql["data"]["hello"], rest["data"]["hello"]);
}

#[tokio::test]
async fn deploy_swaps_generations_while_old_requests_drain() {
	let state = state_for(greeting_doc("demo", "one")).await;
	let app = typewire_server::router(state.clone());

	// A request planned against the old generation keeps its reference.
	let old_generation = state.gateway.load_full();

	let deploy = Request::builder()
		.method("PUT")
		.uri("/typegraph")
		.header("content-type", "application/json")
		.body(Body::from(
			serde_json::to_string(&greeting_doc("demo", "two")).unwrap(),
		))
		.unwrap();
	let response = app.clone().oneshot(deploy).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	// New traffic sees the new generation.
	let json = body_json(app.oneshot(post_graphql("{ hello }")).await.unwrap()).await;
	assert_eq!(json["data"]["hello"], "two");

	// The drained reference still resolves against the old generation.
	let ctx = typewire_core::ctx::RequestContext::anonymous(old_generation.secrets().clone());
	let request: typewire_core::GatewayRequest =
		serde_json::from_value(serde_json::json!({"query": "{ hello }"})).unwrap();
	let old = old_generation.handle(request, &ctx).await;
	assert_eq!(serde_json::to_value(&old).unwrap()["data"]["hello"], "one");
}

#[tokio::test]
async fn invalid_typegraph_deploy_is_rejected_and_old_generation_serves() {
	let state = state_for(greeting_doc("demo", "one")).await;
	let app = typewire_server::router(state);

	// A dangling type reference must be rejected at deploy time.
	let mut doc = serde_json::to_value(&greeting_doc("demo", "broken")).unwrap();
	doc["types"][0]["fields"]["hello"] = serde_json::json!(99);
	let deploy = Request::builder()
		.method("PUT")
		.uri("/typegraph")
		.header("content-type", "application/json")
		.body(Body::from(doc.to_string()))
		.unwrap();
	let response = app.clone().oneshot(deploy).await.unwrap();
	assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

	let json = body_json(app.oneshot(post_graphql("{ hello }")).await.unwrap()).await;
	assert_eq!(json["data"]["hello"], "one");
}

#[tokio::test]
async fn bearer_claims_feed_context_injections() {
	// The typegraph echoes the `sub` claim injected from the context.
	let doc: TypegraphDoc = serde_json::from_value(serde_json::json!({
		"version": "0.3",
		"name": "authy",
		"types": [
			{"name": "Query", "type": "struct", "fields": {"whoami": 1}},
			{"name": "whoami", "type": "function", "input": 2, "output": 4, "materializer": 0},
			{"type": "struct", "fields": {"sub": 3}},
			{"type": "string", "injection": {"source": "context", "key": "sub"}},
			{"name": "identity", "type": "struct", "fields": {"sub": 5}},
			{"type": "string"},
		],
		"materializers": [
			{"name": "echo", "runtime": 0},
			{"name": "value", "runtime": 0, "data": {"value": true}},
		],
		"runtimes": [{"name": "main", "kind": "value"}],
		"policies": [{"name": "public", "single": 1}],
		"meta": {"root": 0, "default_policy": [0], "auth": {"secret_name": "JWT_KEY"}},
	}))
	.unwrap();

	unsafe { std::env::set_var("TYPEWIRE_SECRET_AUTHY_JWT_KEY", "test-signing-key") };
	let state = state_for(doc).await;
	let app = typewire_server::router(state);

	let claims = serde_json::json!({"sub": "user-42"});
	let token = jsonwebtoken::encode(
		&jsonwebtoken::Header::default(),
		&claims,
		&jsonwebtoken::EncodingKey::from_secret(b"test-signing-key"),
	)
	.unwrap();

	let request = Request::builder()
		.method("POST")
		.uri("/graphql")
		.header("content-type", "application/json")
		.header("authorization", format!("Bearer {token}"))
		.body(Body::from(
			serde_json::json!({"query": "{ whoami { sub } }"}).to_string(),
		))
		.unwrap();
	let json = body_json(app.clone().oneshot(request).await.unwrap()).await;
	assert_eq!(json["data"]["whoami"]["sub"], "user-42");

	// Without a token the context claim is absent and planning fails the
	// injection, not the whole process.
	let json = body_json(app.oneshot(post_graphql("{ whoami { sub } }")).await.unwrap()).await;
	assert!(json.get("data").is_none());
	unsafe { std::env::remove_var("TYPEWIRE_SECRET_AUTHY_JWT_KEY") };
}
