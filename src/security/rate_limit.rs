//! Fixed-window rate limiting.
//!
//! # Algorithm
//! ```text
//! key = "{prefix}:{identity}"
//! no record, or now >= reset_at  → new window {count: 1}, allowed
//! count >= max_requests          → denied, record untouched
//! otherwise                      → count += 1, allowed
//! ```
//!
//! # Design Decisions
//! - Fixed windows, not sliding: bursts up to 2x the limit are possible across
//!   a boundary, and a request arriving exactly at `reset_at` opens a new window
//! - Limits are per process; a restart silently resets every counter
//! - Several policies compose with AND semantics, first rejection wins

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::observability::metrics;
use crate::security::clock::{Clock, SystemClock};
use crate::security::store::{CounterStore, InMemoryCounterStore, RateLimitRecord};

/// Store size above which expired records are swept before a check.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// The store size is only measured on every Nth check.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 256;

/// Rejected policy parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,
    #[error("rate limit max_requests must be greater than zero")]
    ZeroMaxRequests,
    #[error("rate limit key prefix must not be empty")]
    EmptyKeyPrefix,
}

/// Immutable limit for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    window: Duration,
    max_requests: u32,
    key_prefix: String,
}

impl RateLimitPolicy {
    pub fn new(
        window: Duration,
        max_requests: u32,
        key_prefix: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        let key_prefix = key_prefix.into();
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        if max_requests == 0 {
            return Err(PolicyError::ZeroMaxRequests);
        }
        if key_prefix.trim().is_empty() {
            return Err(PolicyError::EmptyKeyPrefix);
        }
        Ok(Self {
            window,
            max_requests,
            key_prefix,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Full store key for an identity.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}:{}", self.key_prefix, identity)
    }
}

/// Result of a single policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Window end as Unix seconds, rounded up.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }

    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}

/// The policy that denied a multi-policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub key_prefix: String,
    pub identity: String,
    pub decision: RateLimitDecision,
}

/// Fixed-window limiter over an injected counter store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    sweep_threshold: usize,
    sweep_interval: u64,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            checks: AtomicU64::new(0),
        }
    }

    /// In-process store on the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()), Arc::new(SystemClock))
    }

    pub fn with_sweep_threshold(mut self, sweep_threshold: usize) -> Self {
        self.sweep_threshold = sweep_threshold;
        self
    }

    /// Measure the store every `interval` checks. Zero is treated as one.
    pub fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval.max(1);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Admit or deny one request for `identity` under `policy`.
    pub fn check(&self, policy: &RateLimitPolicy, identity: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        self.maybe_sweep(now);

        let key = policy.key_for(identity);
        let max = policy.max_requests;
        let window_ms = policy.window.as_millis() as u64;
        let mut decision = RateLimitDecision {
            allowed: false,
            limit: max,
            remaining: 0,
            reset_at_ms: now,
        };

        self.store.update(&key, &mut |slot| {
            let live = (*slot).filter(|record| !record.is_expired(now));
            match live {
                Some(record) if record.count >= max => {
                    decision.reset_at_ms = record.reset_at_ms;
                }
                Some(mut record) => {
                    record.count += 1;
                    *slot = Some(record);
                    decision.allowed = true;
                    decision.remaining = max - record.count;
                    decision.reset_at_ms = record.reset_at_ms;
                }
                None => {
                    let record = RateLimitRecord {
                        count: 1,
                        reset_at_ms: now.saturating_add(window_ms),
                    };
                    *slot = Some(record);
                    decision.allowed = true;
                    decision.remaining = max - 1;
                    decision.reset_at_ms = record.reset_at_ms;
                }
            }
        });

        decision
    }

    /// Check several `(policy, identity)` pairs in order.
    ///
    /// Stops at the first denial; policies after it are not consumed. When all
    /// pass, returns the decision with the least remaining quota.
    pub fn check_all<'a, I>(&self, checks: I) -> Result<Option<RateLimitDecision>, RateLimitRejection>
    where
        I: IntoIterator<Item = (&'a RateLimitPolicy, &'a str)>,
    {
        let mut tightest: Option<RateLimitDecision> = None;
        for (policy, identity) in checks {
            let decision = self.check(policy, identity);
            if !decision.allowed {
                return Err(RateLimitRejection {
                    key_prefix: policy.key_prefix.clone(),
                    identity: identity.to_string(),
                    decision,
                });
            }
            tightest = match tightest {
                Some(current) if current.remaining <= decision.remaining => Some(current),
                _ => Some(decision),
            };
        }
        Ok(tightest)
    }

    fn maybe_sweep(&self, now: u64) {
        // Store::len walks every shard; keep it off most checks.
        if self.checks.fetch_add(1, Ordering::Relaxed) % self.sweep_interval != 0 {
            return;
        }
        let size = self.store.len();
        if size <= self.sweep_threshold {
            return;
        }
        let removed = self.store.sweep_expired(now);
        metrics::record_counter_store_size(self.store.len());
        tracing::debug!(size, removed, "Swept expired rate limit records");
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("records", &self.store.len())
            .field("sweep_threshold", &self.sweep_threshold)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
