//! Per-run result cache.
//!
//! Maps each key to its single computation: either the shared future of the
//! invocation still computing it, or the finished outcome. Failures are
//! cached exactly like successes. The cache is not synchronized on its own;
//! the coordinator owns it behind the same lock as the wait graph so that
//! check-and-insert is one step.

use std::collections::HashMap;

use futures::future::{BoxFuture, Shared};
use spire_core::{EngineError, EngineResult, Key, Value};

/// Future every requester of an in-flight key joins
pub type SharedResult = Shared<BoxFuture<'static, EngineResult<Value>>>;

enum Slot {
    Pending(SharedResult),
    Done(EngineResult<Value>),
}

/// Outcome of [`ResultCache::claim`]
pub enum Claim {
    /// The key already finished
    Cached(EngineResult<Value>),
    /// The key is in flight; join its computation
    Joined(SharedResult),
    /// This call started the computation
    Started(SharedResult),
    /// The computation could not be started; the failure is now cached
    Failed(EngineError),
}

/// Key -> computation map for one run
#[derive(Default)]
pub struct ResultCache {
    slots: HashMap<Key, Slot>,
}

impl ResultCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached computation for `key`, starting it with `start` if absent
    ///
    /// `start` runs at most once per key for the lifetime of the cache. If it
    /// fails, the failure becomes the key's cached outcome.
    pub fn claim<F>(&mut self, key: &Key, start: F) -> Claim
    where
        F: FnOnce() -> EngineResult<SharedResult>,
    {
        match self.slots.get(key) {
            Some(Slot::Done(result)) => return Claim::Cached(result.clone()),
            Some(Slot::Pending(shared)) => return Claim::Joined(shared.clone()),
            None => {}
        }
        match start() {
            Ok(shared) => {
                self.slots.insert(key.clone(), Slot::Pending(shared.clone()));
                Claim::Started(shared)
            }
            Err(err) => {
                self.slots.insert(key.clone(), Slot::Done(Err(err.clone())));
                Claim::Failed(err)
            }
        }
    }

    /// Record the final outcome of `key`
    pub fn complete(&mut self, key: Key, result: EngineResult<Value>) {
        self.slots.insert(key, Slot::Done(result));
    }

    /// Finished outcome of `key`, if any
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<EngineResult<Value>> {
        match self.slots.get(key)? {
            Slot::Done(result) => Some(result.clone()),
            Slot::Pending(_) => None,
        }
    }

    /// Check whether `key` was ever claimed
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.slots.contains_key(key)
    }

    /// Check whether `key` is still being computed
    #[must_use]
    pub fn is_pending(&self, key: &Key) -> bool {
        matches!(self.slots.get(key), Some(Slot::Pending(_)))
    }

    /// Number of claimed keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if nothing was claimed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of finished keys
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Done(_)))
            .count()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("claimed", &self.len())
            .field("completed", &self.completed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use spire_core::TypeTag;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Address(&'static str);

    fn key(name: &'static str) -> Key {
        Key::new(TypeTag::of::<Address>(), Value::new(Address(name)))
    }

    fn ready(name: &'static str) -> SharedResult {
        futures::future::ready(Ok(Value::new(Address(name)))).boxed().shared()
    }

    #[test]
    fn test_claim_starts_once() {
        let mut cache = ResultCache::new();
        let mut starts = 0;

        let first = cache.claim(&key("a"), || {
            starts += 1;
            Ok(ready("a"))
        });
        assert!(matches!(first, Claim::Started(_)));
        assert!(cache.is_pending(&key("a")));

        let second = cache.claim(&key("a"), || {
            starts += 1;
            Ok(ready("a"))
        });
        assert!(matches!(second, Claim::Joined(_)));
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_complete_then_cached() {
        let mut cache = ResultCache::new();
        let _ = cache.claim(&key("a"), || Ok(ready("a")));
        cache.complete(key("a"), Ok(Value::new(Address("done"))));

        match cache.claim(&key("a"), || panic!("must not restart")) {
            Claim::Cached(Ok(value)) => {
                assert_eq!(value.downcast_ref::<Address>(), Some(&Address("done")));
            }
            _ => panic!("expected cached value"),
        }
        assert_eq!(cache.completed_count(), 1);
    }

    #[test]
    fn test_failed_start_is_cached() {
        let mut cache = ResultCache::new();
        let err = EngineError::failed("no rule");

        let claim = cache.claim(&key("a"), || Err(err.clone()));
        assert!(matches!(claim, Claim::Failed(ref e) if *e == err));
        assert_eq!(cache.get(&key("a")), Some(Err(err)));
        assert!(!cache.is_pending(&key("a")));
    }

    #[test]
    fn test_clear() {
        let mut cache = ResultCache::new();
        let _ = cache.claim(&key("a"), || Ok(ready("a")));
        let _ = cache.claim(&key("b"), || Ok(ready("b")));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&key("a")));
    }
}
