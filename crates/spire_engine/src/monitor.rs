//! Run metrics.
//!
//! Counters are updated concurrently by rule tasks, so they are atomics;
//! [`RunMetrics::snapshot`] produces a plain serializable copy.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Live counters for one run
#[derive(Debug, Default)]
pub struct RunMetrics {
    rules_started: AtomicU64,
    rules_completed: AtomicU64,
    rules_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    union_dispatches: AtomicU64,
    cycles_detected: AtomicU64,
    invocations: Mutex<IndexMap<String, u64>>,
}

impl RunMetrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rule invocation starting
    pub fn record_start(&self, rule: &str) {
        self.rules_started.fetch_add(1, Ordering::Relaxed);
        let mut invocations = self
            .invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *invocations.entry(rule.to_string()).or_insert(0) += 1;
    }

    /// Record a rule invocation succeeding
    pub fn record_completion(&self) {
        self.rules_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rule invocation failing
    pub fn record_failure(&self) {
        self.rules_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request served by an existing computation
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that had to start a computation
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request dispatched through a union
    pub fn record_union_dispatch(&self) {
        self.union_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused wait
    pub fn record_cycle(&self) {
        self.cycles_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// How many times the rule named `rule` was invoked
    #[must_use]
    pub fn invocations(&self, rule: &str) -> u64 {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rule)
            .copied()
            .unwrap_or(0)
    }

    /// Copy the counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rules_started: self.rules_started.load(Ordering::Relaxed),
            rules_completed: self.rules_completed.load(Ordering::Relaxed),
            rules_failed: self.rules_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            union_dispatches: self.union_dispatches.load(Ordering::Relaxed),
            cycles_detected: self.cycles_detected.load(Ordering::Relaxed),
            invocations: self
                .invocations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Point-in-time copy of [`RunMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Rule invocations started
    pub rules_started: u64,
    /// Rule invocations that produced a value
    pub rules_completed: u64,
    /// Rule invocations that failed
    pub rules_failed: u64,
    /// Requests served from a finished or in-flight computation
    pub cache_hits: u64,
    /// Requests that started a computation
    pub cache_misses: u64,
    /// Computations selected through a union
    pub union_dispatches: u64,
    /// Waits refused as dependency cycles
    pub cycles_detected: u64,
    /// Invocations per rule name, in first-invocation order
    pub invocations: IndexMap<String, u64>,
}

impl MetricsSnapshot {
    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.rules_started == 0 {
            return 1.0;
        }
        self.rules_completed as f64 / self.rules_started as f64
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.rules_started == 0 {
            return 0.0;
        }
        self.rules_failed as f64 / self.rules_started as f64
    }

    /// Get cache hit rate (0.0 - 1.0)
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let requests = self.cache_hits + self.cache_misses;
        if requests == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / requests as f64
    }
}
