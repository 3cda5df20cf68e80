use std::str::FromStr;
use std::sync::LazyLock;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
	std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Hard wall-clock deadline for a single guest call (defaults to 5 seconds)
pub static WIRE_CALL_TIMEOUT_MS: LazyLock<u64> =
	LazyLock::new(|| env_parse("TYPEWIRE_WIRE_CALL_TIMEOUT_MS", 5_000));

/// Hard wall-clock deadline for guest instantiation and init (defaults to 30 seconds)
pub static WIRE_INIT_TIMEOUT_MS: LazyLock<u64> =
	LazyLock::new(|| env_parse("TYPEWIRE_WIRE_INIT_TIMEOUT_MS", 30_000));

/// Granularity of the epoch ticker used for preemption (defaults to 1ms)
pub static WIRE_EPOCH_TICK_MS: LazyLock<u64> =
	LazyLock::new(|| env_parse("TYPEWIRE_WIRE_EPOCH_TICK_MS", 1));

/// Maximum accepted guest response size (defaults to 32 MiB)
pub static WIRE_MAX_RESPONSE_SIZE: LazyLock<usize> =
	LazyLock::new(|| env_parse("TYPEWIRE_WIRE_MAX_RESPONSE_SIZE", 32 << 20));
