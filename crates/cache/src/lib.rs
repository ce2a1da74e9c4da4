//! Caching of LLM responses.
//!
//! A cache maps a [`CacheKey`] (the request plus the provider fingerprint)
//! to the complete event stream of a successful response. Backends are
//! swappable behind the [`Cache`] trait:
//!
//! - [`InMemoryCache`] lives as long as the process.
//! - [`FileCache`] persists to a JSON file, with optional TTL and LRU
//!   eviction.
//!
//! [`CachedProvider`] plugs any backend in front of any
//! [`ModelProvider`](chainlet_model::ModelProvider).

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod file;
mod key;
mod memory;
mod provider;

use std::io;
use std::path::PathBuf;

use chainlet_model::ModelResponseEvent;
use serde::{Deserialize, Serialize};

pub use file::{DEFAULT_MAX_ENTRIES, FileCache};
pub use key::CacheKey;
pub use memory::InMemoryCache;
pub use provider::{CachedProvider, CachedResponse};

/// The recorded events of one complete, successful model response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedGeneration {
    /// Events in the order the provider produced them.
    pub events: Vec<ModelResponseEvent>,
}

impl CachedGeneration {
    /// Returns the concatenated text of all message deltas.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::MessageDelta(delta) => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Counters describing a cache's usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored entries.
    pub entries: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry).
    pub misses: u64,
}

/// Errors reported by cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing the backing file failed.
    #[error("cannot access cache file `{}`: {source}", .path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// The cache contents could not be encoded.
    #[error("cannot encode cache contents: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A key-value store for LLM responses.
///
/// Implementations must be safe to share between concurrent requests.
pub trait Cache: Send + Sync {
    /// Looks up the generation stored under `key`.
    fn lookup(&self, key: &CacheKey) -> Result<Option<CachedGeneration>, CacheError>;

    /// Stores `generation` under `key`, replacing any previous entry.
    fn update(
        &self,
        key: &CacheKey,
        generation: CachedGeneration,
    ) -> Result<(), CacheError>;

    /// Removes every entry.
    fn clear(&self) -> Result<(), CacheError>;

    /// Returns usage counters.
    fn stats(&self) -> CacheStats;
}
