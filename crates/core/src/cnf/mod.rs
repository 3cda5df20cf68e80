use std::str::FromStr;
use std::sync::LazyLock;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
	std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Maximum selection-set nesting accepted by the planner (defaults to 32)
pub static MAX_PLAN_DEPTH: LazyLock<usize> =
	LazyLock::new(|| env_parse("TYPEWIRE_MAX_PLAN_DEPTH", 32));

/// Depth of the automatic scalar selection built for REST requests (defaults to 3)
pub static REST_AUTO_SELECT_DEPTH: LazyLock<usize> =
	LazyLock::new(|| env_parse("TYPEWIRE_REST_AUTO_SELECT_DEPTH", 3));

/// Upstream HTTP/GraphQL request timeout (defaults to 30 seconds)
pub static UPSTREAM_TIMEOUT_MS: LazyLock<u64> =
	LazyLock::new(|| env_parse("TYPEWIRE_UPSTREAM_TIMEOUT_MS", 30_000));

/// Prefix for secrets looked up in the process environment
pub const SECRET_ENV_PREFIX: &str = "TYPEWIRE_SECRET";
