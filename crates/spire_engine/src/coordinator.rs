//! Coordinator for rule execution.
//!
//! The coordinator is the single resolution path of a run. For each request
//! it consults the result cache, and if the key is new it selects a rule
//! through the catalog and spawns the rule body as its own task. Rule bodies
//! suspend at every `.await` on a request; a parked body holds no lock.
//!
//! Claiming a key, recording the requester's wait edge, and cycle detection
//! all happen under one lock, so two concurrent requests for the same key
//! can never both start it.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use spire_core::{EngineError, EngineResult, Key, RunId, Value, ValueType};
use spire_rules::{Catalog, Get, Resolve, Rule, RuleContext};
use tracing::{Instrument, debug, debug_span, info, trace, warn};

use crate::cache::{Claim, ResultCache, SharedResult};
use crate::monitor::{MetricsSnapshot, RunMetrics};
use crate::tracker::InProgressTracker;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Refuse new work once a structural error has been observed
    pub abort_on_structural_error: bool,
    /// Fail requests a rule did not declare
    pub enforce_declared_requests: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            abort_on_structural_error: true,
            enforce_declared_requests: true,
        }
    }
}

impl EngineConfig {
    /// Set whether structural errors abort the run
    #[must_use]
    pub const fn with_abort_on_structural_error(mut self, abort: bool) -> Self {
        self.abort_on_structural_error = abort;
        self
    }

    /// Set whether undeclared requests are rejected
    #[must_use]
    pub const fn with_enforce_declared_requests(mut self, enforce: bool) -> Self {
        self.enforce_declared_requests = enforce;
        self
    }
}

#[derive(Default)]
struct Ledger {
    cache: ResultCache,
    tracker: InProgressTracker,
    /// Bumped by `finish`; completions from an earlier run are discarded
    epoch: u64,
}

struct Inner {
    run_id: RunId,
    catalog: Arc<Catalog>,
    config: EngineConfig,
    ledger: Mutex<Ledger>,
    metrics: RunMetrics,
    aborted: AtomicBool,
}

enum Resolution {
    Ready(EngineResult<Value>),
    Wait(SharedResult, Option<WaitGuard>),
}

/// Releases a wait edge when the waiting request finishes or is dropped
struct WaitGuard {
    coordinator: Coordinator,
    waiter: Key,
    target: Key,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.coordinator
            .ledger()
            .tracker
            .release(&self.waiter, &self.target);
    }
}

/// Memoizing coordinator for one run
///
/// Cheap to clone; clones share the same cache and metrics.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator with an empty cache
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        let run_id = RunId::new();
        debug!(run = %run_id, rules = catalog.len(), "coordinator created");
        Self {
            inner: Arc::new(Inner {
                run_id,
                catalog,
                config,
                ledger: Mutex::new(Ledger::default()),
                metrics: RunMetrics::new(),
                aborted: AtomicBool::new(false),
            }),
        }
    }

    /// Run identifier
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    /// Rule catalog
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Live metrics
    #[must_use]
    pub fn metrics(&self) -> &RunMetrics {
        &self.inner.metrics
    }

    /// Context for requests issued from outside any rule
    #[must_use]
    pub fn context(&self) -> RuleContext {
        RuleContext::root(self.resolver())
    }

    /// Resolve a root request
    ///
    /// # Errors
    ///
    /// Returns the cached failure of the key, or the structural error that
    /// prevented computing it
    pub async fn request(&self, get: Get) -> EngineResult<Value> {
        self.resolve(None, get).await
    }

    /// Resolve a root request and downcast the product
    ///
    /// # Errors
    ///
    /// As [`Coordinator::request`], plus a type mismatch
    pub async fn get<P: ValueType>(&self, get: Get) -> EngineResult<P> {
        self.request(get).await?.cloned::<P>()
    }

    /// Stop starting new computations; in-flight ones still finish
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            warn!(run = %self.inner.run_id, "run aborted");
        }
    }

    /// Check whether the run was aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Finished outcome for `key`, if it has one
    #[must_use]
    pub fn cached(&self, key: &Key) -> Option<EngineResult<Value>> {
        self.ledger().cache.get(key)
    }

    /// Number of keys claimed so far
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.ledger().cache.len()
    }

    /// End the run: drop every cached result, lift an abort, and return the
    /// metrics accumulated so far
    ///
    /// Computations still in flight finish, but their outcomes are not cached.
    pub fn finish(&self) -> MetricsSnapshot {
        let snapshot = self.inner.metrics.snapshot();
        {
            let mut ledger = self.ledger();
            ledger.cache.clear();
            ledger.tracker.clear();
            ledger.epoch += 1;
            self.inner.aborted.store(false, Ordering::SeqCst);
        }
        info!(
            run = %self.inner.run_id,
            rules_started = snapshot.rules_started,
            rules_failed = snapshot.rules_failed,
            cache_hits = snapshot.cache_hits,
            "run finished"
        );
        snapshot
    }

    fn resolver(&self) -> Arc<dyn Resolve> {
        Arc::new(self.clone())
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn claim_key(&self, requester: Option<&Key>, get: &Get, key: &Key) -> Resolution {
        let mut ledger = self.ledger();
        if !ledger.cache.contains(key) && self.is_aborted() {
            return Resolution::Ready(Err(EngineError::Aborted));
        }

        let epoch = ledger.epoch;
        let shared = match ledger.cache.claim(key, || self.start(get, key, epoch)) {
            Claim::Cached(result) => {
                self.inner.metrics.record_cache_hit();
                trace!(key = %key, "cache hit");
                return Resolution::Ready(result);
            }
            Claim::Failed(err) => {
                debug!(key = %key, error = %err, "no computation for key");
                return Resolution::Ready(Err(err));
            }
            Claim::Joined(shared) => {
                self.inner.metrics.record_cache_hit();
                trace!(key = %key, "joined in-flight computation");
                shared
            }
            Claim::Started(shared) => {
                self.inner.metrics.record_cache_miss();
                shared
            }
        };

        let Some(waiter) = requester else {
            return Resolution::Wait(shared, None);
        };
        if let Err(cycle) = ledger.tracker.add_wait(waiter, key) {
            self.inner.metrics.record_cycle();
            warn!(error = %cycle, "refusing wait");
            return Resolution::Ready(Err(cycle));
        }
        drop(ledger);

        let guard = WaitGuard {
            coordinator: self.clone(),
            waiter: waiter.clone(),
            target: key.clone(),
        };
        Resolution::Wait(shared, Some(guard))
    }

    fn start(&self, get: &Get, key: &Key, epoch: u64) -> EngineResult<SharedResult> {
        let rule = self.inner.catalog.select(get)?.clone();
        if rule.is_union_member() {
            self.inner.metrics.record_union_dispatch();
            debug!(key = %key, rule = rule.name(), "union dispatch");
        }
        Ok(self.spawn(rule, key.clone(), epoch))
    }

    fn spawn(&self, rule: Rule, key: Key, epoch: u64) -> SharedResult {
        let ctx = RuleContext::for_rule(
            self.resolver(),
            &rule,
            key.clone(),
            self.inner.config.enforce_declared_requests,
        );
        let span = debug_span!("rule", rule = rule.name(), key = %key);
        let coordinator = self.clone();

        let task = async move {
            coordinator.inner.metrics.record_start(rule.name());
            trace!("rule started");
            let subject = key.subject().clone();
            let outcome = AssertUnwindSafe(rule.invoke(ctx, subject))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(value)) if value.type_tag() == rule.product() => Ok(value),
                Ok(Ok(value)) => Err(EngineError::type_mismatch(rule.product(), value.type_tag())),
                Ok(Err(err)) => Err(err.attributed(rule.name(), &key)),
                Err(_) => Err(EngineError::Internal {
                    message: format!("rule {} panicked computing {}", rule.name(), key),
                }),
            };
            coordinator.complete(key, &result, epoch);
            result
        }
        .instrument(span);

        let handle = tokio::spawn(task);
        async move {
            handle.await.unwrap_or_else(|err| {
                Err(EngineError::Internal {
                    message: format!("rule task did not finish: {err}"),
                })
            })
        }
        .boxed()
        .shared()
    }

    fn complete(&self, key: Key, result: &EngineResult<Value>, epoch: u64) {
        match result {
            Ok(_) => {
                self.inner.metrics.record_completion();
                trace!("rule completed");
            }
            Err(err) => {
                self.inner.metrics.record_failure();
                debug!(error = %err, "rule failed");
            }
        }
        let mut ledger = self.ledger();
        if ledger.epoch != epoch {
            trace!("run already finished; outcome dropped");
            return;
        }
        ledger.tracker.finish(&key);
        ledger.cache.complete(key, result.clone());
    }

    fn observe(&self, result: &EngineResult<Value>) {
        if let Err(err) = result
            && err.is_structural()
            && self.inner.config.abort_on_structural_error
            && !self.is_aborted()
        {
            warn!(error = %err, "structural error");
            self.abort();
        }
    }
}

impl Resolve for Coordinator {
    fn claim(&self, requester: Option<Key>, get: Get) -> BoxFuture<'static, EngineResult<Value>> {
        let key = get.key();
        match self.claim_key(requester.as_ref(), &get, &key) {
            Resolution::Ready(result) => {
                self.observe(&result);
                future::ready(result).boxed()
            }
            Resolution::Wait(shared, guard) => {
                let coordinator = self.clone();
                async move {
                    let result = shared.await;
                    drop(guard);
                    coordinator.observe(&result);
                    result
                }
                .boxed()
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("run_id", &self.inner.run_id)
            .field("config", &self.inner.config)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}
