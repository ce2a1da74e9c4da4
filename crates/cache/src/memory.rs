use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{Cache, CacheError, CacheKey, CacheStats, CachedGeneration};

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, CachedGeneration>,
    hits: u64,
    misses: u64,
}

/// A process-local cache backed by a hash map.
#[derive(Default)]
pub struct InMemoryCache {
    state: Mutex<State>,
}

impl InMemoryCache {
    /// Creates an empty cache.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Cache for InMemoryCache {
    fn lookup(&self, key: &CacheKey) -> Result<Option<CachedGeneration>, CacheError> {
        let mut state = self.lock();
        let found = state.entries.get(key).cloned();
        if found.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        Ok(found)
    }

    fn update(
        &self,
        key: &CacheKey,
        generation: CachedGeneration,
    ) -> Result<(), CacheError> {
        self.lock().entries.insert(key.clone(), generation);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock().entries.clear();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}
