//! HTTP surface of the typewire gateway.
//!
//! One [`AppState`] owns the hot-swappable gateway generation: deploys build
//! a fresh [`Gateway`] and swap it in atomically while in-flight requests
//! drain against the generation they started on.

#[macro_use]
extern crate tracing;

mod auth;
pub mod cnf;
pub mod net;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use arc_swap::ArcSwap;
use axum::{Extension, Router};
use typewire_core::Gateway;
use typewire_core::rt::NativeServices;
use witwire::WireHost;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
	/// The active typegraph generation; replaced wholesale on deploy
	pub gateway: Arc<ArcSwap<Gateway>>,
	/// Capabilities handed to runtime adapters on every deploy
	pub services: NativeServices,
	/// The function host shared across generations
	pub wire: Arc<WireHost>,
}

impl AppState {
	pub fn new(gateway: Gateway, services: NativeServices, wire: Arc<WireHost>) -> Self {
		Self {
			gateway: Arc::new(ArcSwap::from_pointee(gateway)),
			services,
			wire,
		}
	}
}

/// Assemble the full router.
pub fn router(state: AppState) -> Router {
	Router::new()
		.merge(net::graphql::router())
		.merge(net::rest::router())
		.merge(net::deploy::router())
		.merge(net::health::router())
		.layer(Extension(state))
}

/// Bind and serve until the process is signalled to stop.
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
	let listener = tokio::net::TcpListener::bind(bind)
		.await
		.with_context(|| format!("failed to bind {bind}"))?;
	info!(%bind, "typewire listening");
	axum::serve(listener, router(state))
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("server error")
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!("shutdown signal received");
}
