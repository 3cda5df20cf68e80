use std::sync::LazyLock;

/// Default bind address for the gateway
pub static BIND: LazyLock<String> =
	LazyLock::new(|| std::env::var("TYPEWIRE_BIND").unwrap_or_else(|_| "0.0.0.0:7891".to_string()));

/// Bearer token required by the deploy endpoint; unset means deploys are open
/// (development mode only)
pub fn admin_token() -> Option<String> {
	std::env::var("TYPEWIRE_ADMIN_TOKEN").ok()
}
