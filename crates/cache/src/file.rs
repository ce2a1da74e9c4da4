use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{Cache, CacheError, CacheKey, CacheStats, CachedGeneration};

/// The entry cap of a [`FileCache`] unless [`FileCache::with_max_entries`]
/// says otherwise.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    generation: CachedGeneration,
    /// Unix milliseconds.
    created_at: u64,
    /// Unix milliseconds.
    accessed_at: u64,
    hit_count: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Store {
    entries: HashMap<CacheKey, Entry>,
}

#[derive(Default)]
struct State {
    store: Store,
    hits: u64,
    misses: u64,
}

/// A cache persisted as a JSON file.
///
/// The whole store is loaded on open and rewritten on every update or
/// clear. Hits only touch the in-memory bookkeeping, which reaches the disk
/// with the next write. Entries older than the TTL (if any) are treated as
/// absent, and the least recently accessed entry is evicted when the store
/// is full.
pub struct FileCache {
    path: PathBuf,
    ttl: Option<Duration>,
    max_entries: usize,
    state: Mutex<State>,
}

impl FileCache {
    /// Opens the cache stored at `path`.
    ///
    /// A missing file yields an empty cache. So does an unreadable or corrupt
    /// one, after logging a warning; it is overwritten by the next write.
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let store = load_store(&path);
        debug!("opened {} with {} entries", path.display(), store.entries.len());
        Self {
            path,
            ttl: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            state: Mutex::new(State {
                store,
                ..Default::default()
            }),
        }
    }

    /// Opens the cache at [`FileCache::default_path`].
    #[inline]
    pub fn open_default() -> Self {
        Self::open(Self::default_path())
    }

    /// Returns `<user cache dir>/chainlet/llm_cache.json`, falling back to
    /// the working directory when the platform has no cache dir.
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chainlet")
            .join("llm_cache.json")
    }

    /// Expires entries once they are older than `ttl`.
    #[inline]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Caps the number of entries (at least one is always kept).
    #[inline]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Returns the backing file path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &Entry, now: u64) -> bool {
        self.ttl.is_some_and(|ttl| {
            u128::from(now.saturating_sub(entry.created_at)) > ttl.as_millis()
        })
    }

    fn save(&self, store: &Store) -> Result<(), CacheError> {
        let io_err = |source: io::Error| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let data = serde_json::to_vec(store)?;
        // Write-then-rename, so a crash never leaves a truncated store.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(io_err)
    }
}

impl Cache for FileCache {
    fn lookup(&self, key: &CacheKey) -> Result<Option<CachedGeneration>, CacheError> {
        let now = now_millis();
        let mut state = self.lock();
        let State {
            store,
            hits,
            misses,
        } = &mut *state;

        let Some(entry) = store.entries.get_mut(key) else {
            *misses += 1;
            return Ok(None);
        };
        if self.is_expired(entry, now) {
            trace!("entry {} expired", &key.as_str()[..8]);
            store.entries.remove(key);
            *misses += 1;
            return Ok(None);
        }
        entry.accessed_at = now;
        entry.hit_count = entry.hit_count.saturating_add(1);
        *hits += 1;
        Ok(Some(entry.generation.clone()))
    }

    fn update(
        &self,
        key: &CacheKey,
        generation: CachedGeneration,
    ) -> Result<(), CacheError> {
        let now = now_millis();
        let mut state = self.lock();
        let entries = &mut state.store.entries;

        entries.retain(|_, entry| !self.is_expired(entry, now));
        entries.remove(key);
        while entries.len() >= self.max_entries {
            let Some(lru_key) = entries
                .iter()
                .min_by_key(|(key, entry)| (entry.accessed_at, entry.created_at, *key))
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            debug!("evicting entry {}", &lru_key.as_str()[..8]);
            entries.remove(&lru_key);
        }
        entries.insert(
            key.clone(),
            Entry {
                generation,
                created_at: now,
                accessed_at: now,
                hit_count: 0,
            },
        );
        self.save(&state.store)
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.lock();
        state.store.entries.clear();
        self.save(&state.store)
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.store.entries.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

fn load_store(path: &Path) -> Store {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Store::default();
        }
        Err(err) => {
            warn!("cannot read {}, starting empty: {err}", path.display());
            return Store::default();
        }
    };
    serde_json::from_slice(&data).unwrap_or_else(|err| {
        warn!("{} is corrupt, starting empty: {err}", path.display());
        Store::default()
    })
}

fn now_millis() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
}
