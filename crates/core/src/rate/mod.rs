//! Per-identity sliding-window rate limiting.
//!
//! Every function field contributes its materializer's `rate_weight` to the
//! plan score, once per call or once per returned item when
//! `rate_by_result_count` is set. A request whose whole-plan score exceeds
//! `query_limit` is rejected before any dispatch. Admitted scores accumulate
//! in a per-identity window of `window_sec` seconds bounded by
//! `window_limit`.
//!
//! In a multi-replica deployment each replica may accumulate up to
//! `local_excess` score before synchronizing with the shared counter. This
//! trades short-term over-admission, bounded by `local_excess *
//! replica_count`, for fewer synchronization round trips; it is a deliberate
//! approximation, not drift.

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::err::Error;

/// Rate limiting configuration carried by the typegraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
	/// Window length in seconds
	pub window_sec: u64,
	/// Maximum accumulated score per identity and window
	pub window_limit: u32,
	/// Maximum score of a single query
	pub query_limit: u32,
	/// Context claim used as the identity; peer address when absent
	#[serde(default)]
	pub context_identifier: Option<String>,
	/// Score a replica may accumulate before syncing the shared counter
	#[serde(default)]
	pub local_excess: u32,
}

/// Replica-shared window counter, e.g. a distributed store.
#[async_trait]
pub trait SharedCounter: Send + Sync {
	/// Add a delta to the identity's counter for the current window and
	/// return the post-add total across all replicas.
	async fn add_and_fetch(&self, identity: &str, delta: u64, window: Duration) -> Result<u64>;
}

/// Single-process counter, used for single-replica deployments and tests.
#[derive(Default)]
pub struct InMemorySharedCounter {
	counters: DashMap<String, (Instant, u64)>,
}

#[async_trait]
impl SharedCounter for InMemorySharedCounter {
	async fn add_and_fetch(&self, identity: &str, delta: u64, window: Duration) -> Result<u64> {
		let mut entry = self.counters.entry(identity.to_string()).or_insert((Instant::now(), 0));
		if entry.0.elapsed() >= window {
			*entry = (Instant::now(), 0);
		}
		entry.1 += delta;
		Ok(entry.1)
	}
}

struct Bucket {
	window_start: Instant,
	score: u64,
	unsynced: u64,
}

impl Bucket {
	fn new() -> Self {
		Self {
			window_start: Instant::now(),
			score: 0,
			unsynced: 0,
		}
	}
}

/// The per-replica rate limiter.
pub struct RateLimiter {
	cfg: RateConfig,
	buckets: DashMap<String, Bucket>,
	shared: Option<Arc<dyn SharedCounter>>,
}

impl RateLimiter {
	pub fn new(cfg: RateConfig) -> Self {
		Self {
			cfg,
			buckets: DashMap::new(),
			shared: None,
		}
	}

	pub fn with_shared(cfg: RateConfig, shared: Arc<dyn SharedCounter>) -> Self {
		Self {
			cfg,
			buckets: DashMap::new(),
			shared: Some(shared),
		}
	}

	pub fn config(&self) -> &RateConfig {
		&self.cfg
	}

	/// Admit a plan for an identity, or reject the whole request.
	///
	/// Rejection happens strictly before any dispatch: either the single
	/// query exceeds `query_limit`, or the identity's window is exhausted.
	pub async fn check_and_score(&self, identity: &str, plan_score: u32) -> Result<RateGuard<'_>> {
		if plan_score > self.cfg.query_limit {
			return Err(anyhow::Error::new(Error::QueryBudgetExceeded {
				score: plan_score,
				limit: self.cfg.query_limit,
			}));
		}
		let window = Duration::from_secs(self.cfg.window_sec);
		{
			let mut bucket =
				self.buckets.entry(identity.to_string()).or_insert_with(Bucket::new);
			if bucket.window_start.elapsed() >= window {
				*bucket = Bucket::new();
			}
			if bucket.score + plan_score as u64 > self.cfg.window_limit as u64 {
				trace!(identity, plan_score, window_score = bucket.score, "window exhausted");
				return Err(anyhow::Error::new(Error::RateLimitExceeded));
			}
			bucket.score += plan_score as u64;
			bucket.unsynced += plan_score as u64;
		}
		self.flush_if_needed(identity).await?;
		Ok(RateGuard {
			limiter: self,
			identity: identity.to_string(),
		})
	}

	/// Push locally accumulated score to the shared counter once it passes
	/// the local excess threshold, adopting the replica-wide total.
	async fn flush_if_needed(&self, identity: &str) -> Result<()> {
		let Some(shared) = &self.shared else {
			return Ok(());
		};
		let window = Duration::from_secs(self.cfg.window_sec);
		let delta = {
			let Some(mut bucket) = self.buckets.get_mut(identity) else {
				return Ok(());
			};
			if bucket.unsynced < self.cfg.local_excess.max(1) as u64 {
				return Ok(());
			}
			let delta = bucket.unsynced;
			bucket.unsynced = 0;
			delta
		};
		let total = shared.add_and_fetch(identity, delta, window).await?;
		if let Some(mut bucket) = self.buckets.get_mut(identity) {
			if total > bucket.score {
				bucket.score = total;
			}
		}
		Ok(())
	}
}

/// Handle for post-admission scoring of `rate_by_result_count` fields.
pub struct RateGuard<'a> {
	limiter: &'a RateLimiter,
	identity: String,
}

impl std::fmt::Debug for RateGuard<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RateGuard")
			.field("identity", &self.identity)
			.finish_non_exhaustive()
	}
}

impl RateGuard<'_> {
	/// Add per-item score discovered during execution.
	///
	/// Exceeding the window mid-flight fails the consuming field; the
	/// accumulated tally stays so subsequent requests see the exhausted
	/// window.
	pub async fn consume(&self, extra: u32) -> Result<()> {
		if extra == 0 {
			return Ok(());
		}
		let exceeded = {
			let mut bucket = self
				.limiter
				.buckets
				.entry(self.identity.clone())
				.or_insert_with(Bucket::new);
			bucket.score += extra as u64;
			bucket.unsynced += extra as u64;
			bucket.score > self.limiter.cfg.window_limit as u64
		};
		self.limiter.flush_if_needed(&self.identity).await?;
		if exceeded {
			return Err(anyhow::Error::new(Error::RateLimitExceeded));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cfg() -> RateConfig {
		RateConfig {
			window_sec: 15,
			window_limit: 35,
			query_limit: 25,
			context_identifier: None,
			local_excess: 0,
		}
	}

	#[tokio::test]
	async fn single_query_over_budget_is_rejected_outright() {
		let limiter = Arc::new(RateLimiter::new(cfg()));
		let err = limiter.check_and_score("alice", 26).await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<Error>(),
			Some(Error::QueryBudgetExceeded {
				score: 26,
				limit: 25,
			})
		));
	}

	#[tokio::test]
	async fn window_admits_then_rejects_on_limit() {
		let limiter = Arc::new(RateLimiter::new(cfg()));
		for _ in 0..3 {
			limiter.check_and_score("alice", 10).await.unwrap();
		}
		// Total would reach 40 > 35.
		let err = limiter.check_and_score("alice", 10).await.unwrap_err();
		assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RateLimitExceeded)));
	}

	#[tokio::test]
	async fn identities_have_independent_windows() {
		let limiter = Arc::new(RateLimiter::new(cfg()));
		for _ in 0..3 {
			limiter.check_and_score("alice", 10).await.unwrap();
		}
		limiter.check_and_score("bob", 10).await.unwrap();
	}

	#[tokio::test]
	async fn window_resets_after_expiry() {
		let mut config = cfg();
		config.window_sec = 1;
		let limiter = Arc::new(RateLimiter::new(config));
		for _ in 0..3 {
			limiter.check_and_score("alice", 10).await.unwrap();
		}
		assert!(limiter.check_and_score("alice", 10).await.is_err());
		tokio::time::sleep(Duration::from_millis(1100)).await;
		limiter.check_and_score("alice", 10).await.unwrap();
	}

	#[tokio::test]
	async fn result_count_scoring_can_exhaust_the_window() {
		let limiter = Arc::new(RateLimiter::new(cfg()));
		let guard = limiter.check_and_score("alice", 10).await.unwrap();
		guard.consume(20).await.unwrap();
		let err = guard.consume(20).await.unwrap_err();
		assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RateLimitExceeded)));
		// The tally stays: a fresh request in the same window is rejected.
		assert!(limiter.check_and_score("alice", 10).await.is_err());
	}

	#[tokio::test]
	async fn replicas_sync_through_the_shared_counter() {
		let mut config = cfg();
		config.local_excess = 5;
		let shared: Arc<dyn SharedCounter> = Arc::new(InMemorySharedCounter::default());
		let a = Arc::new(RateLimiter::with_shared(config.clone(), Arc::clone(&shared)));
		let b = Arc::new(RateLimiter::with_shared(config, Arc::clone(&shared)));

		// Each admission passes local_excess, so every one syncs.
		a.check_and_score("alice", 10).await.unwrap();
		b.check_and_score("alice", 10).await.unwrap();
		b.check_and_score("alice", 10).await.unwrap();
		// Replica B has adopted the shared total of 30; 10 more breaks 35.
		assert!(b.check_and_score("alice", 10).await.is_err());
		// Replica A last saw a total of 10 and may over-admit briefly; this
		// is the documented local-excess trade-off.
		a.check_and_score("alice", 10).await.unwrap();
	}
}
