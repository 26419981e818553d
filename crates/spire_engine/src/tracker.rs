//! In-progress wait graph.
//!
//! Records which in-flight keys are waiting on which other in-flight keys.
//! A new wait edge that would close a loop is refused and reported as a
//! dependency cycle instead of being allowed to deadlock.

use std::collections::{HashMap, HashSet, VecDeque};

use spire_core::{EngineError, EngineResult, Key};

/// Wait edges between in-flight keys
///
/// Edges are counted: the same invocation may wait on the same key through
/// several concurrent requests, and each request releases its own edge.
#[derive(Debug, Default)]
pub struct InProgressTracker {
    waits: HashMap<Key, HashMap<Key, usize>>,
}

impl InProgressTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the invocation computing `waiter` waits on `target`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DependencyCycle`] without recording the edge if
    /// `target` already (transitively) waits on `waiter`
    pub fn add_wait(&mut self, waiter: &Key, target: &Key) -> EngineResult<()> {
        if let Some(path) = self.path(target, waiter) {
            let chain = std::iter::once(waiter)
                .chain(path)
                .map(ToString::to_string)
                .collect();
            return Err(EngineError::DependencyCycle { chain });
        }
        *self
            .waits
            .entry(waiter.clone())
            .or_default()
            .entry(target.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    /// Drop one wait edge from `waiter` to `target`
    pub fn release(&mut self, waiter: &Key, target: &Key) {
        let Some(targets) = self.waits.get_mut(waiter) else {
            return;
        };
        if let Some(count) = targets.get_mut(target) {
            *count -= 1;
            if *count == 0 {
                targets.remove(target);
            }
        }
        if targets.is_empty() {
            self.waits.remove(waiter);
        }
    }

    /// Forget every wait edge out of a finished key
    pub fn finish(&mut self, key: &Key) {
        self.waits.remove(key);
    }

    /// Check whether `waiter` currently waits on `target` directly
    #[must_use]
    pub fn is_waiting(&self, waiter: &Key, target: &Key) -> bool {
        self.waits
            .get(waiter)
            .is_some_and(|targets| targets.contains_key(target))
    }

    /// Number of keys with at least one outstanding wait
    #[must_use]
    pub fn len(&self) -> usize {
        self.waits.len()
    }

    /// Check if nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    /// Drop all edges
    pub fn clear(&mut self) {
        self.waits.clear();
    }

    /// Shortest chain of waits leading from `from` to `to`, both included
    #[must_use]
    pub fn path<'a>(&'a self, from: &'a Key, to: &Key) -> Option<Vec<&'a Key>> {
        let mut parents: HashMap<&Key, &Key> = HashMap::new();
        let mut seen: HashSet<&Key> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current];
                let mut node = current;
                while let Some(parent) = parents.get(node) {
                    path.push(*parent);
                    node = *parent;
                }
                path.reverse();
                return Some(path);
            }
            let next = self.waits.get(current).into_iter().flat_map(HashMap::keys);
            for target in next {
                if seen.insert(target) {
                    parents.insert(target, current);
                    queue.push_back(target);
                }
            }
        }
        None
    }
}
