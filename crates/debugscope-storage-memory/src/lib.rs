//! Bounded in-process storage backend
//!
//! Entries live in an [`LruCache`] used purely as an insertion-ordered bounded map:
//! reads use `peek` so they never promote, and the oldest inserted entry is evicted
//! once `max_entries` is reached. Batch and type indexes sit behind the same lock as
//! the primary map so they can never disagree with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use tokio::sync::RwLock;

use debugscope_core::{
    Entry, EntryType, Error, ListOptions, PaginatedResult, Result, StorageAdapter, StorageStats,
};

pub const DEFAULT_MAX_ENTRIES: usize = 1000;

struct Stored {
    entry: Entry,
    content_json: String,
    /// Insertion sequence, used as the ordering tie-break
    seq: u64,
}

struct Inner {
    entries: LruCache<String, Stored>,
    by_batch: HashMap<String, HashSet<String>>,
    by_type: HashMap<EntryType, HashSet<String>>,
    next_seq: u64,
}

impl Inner {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            by_batch: HashMap::new(),
            by_type: HashMap::new(),
            next_seq: 0,
        }
    }

    fn unindex(&mut self, entry: &Entry) {
        if let Some(ids) = self.by_batch.get_mut(&entry.batch_id) {
            ids.remove(&entry.id);
            if ids.is_empty() {
                self.by_batch.remove(&entry.batch_id);
            }
        }
        if let Some(ids) = self.by_type.get_mut(&entry.entry_type) {
            ids.remove(&entry.id);
            if ids.is_empty() {
                self.by_type.remove(&entry.entry_type);
            }
        }
    }

    fn upsert(&mut self, entry: &Entry) {
        if let Some(existing) = self.entries.peek_mut(&entry.id) {
            existing.entry.content = entry.content.clone();
            existing.entry.tags = entry.tags.clone();
            existing.entry.duration = entry.duration;
            existing.entry.memory_usage = entry.memory_usage;
            existing.content_json = entry.content_json();
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let stored = Stored {
            entry: entry.clone(),
            content_json: entry.content_json(),
            seq,
        };

        if let Some((_, evicted)) = self.entries.push(entry.id.clone(), stored) {
            tracing::trace!(id = %evicted.entry.id, "Evicted oldest entry at capacity");
            self.unindex(&evicted.entry);
        }

        self.by_batch
            .entry(entry.batch_id.clone())
            .or_default()
            .insert(entry.id.clone());
        self.by_type
            .entry(entry.entry_type)
            .or_default()
            .insert(entry.id.clone());
    }

    /// Candidates narrowed by the cheapest available index
    fn candidates(&self, options: &ListOptions) -> Vec<&Stored> {
        let ids = match (&options.batch_id, options.entry_type) {
            (Some(batch_id), _) => self.by_batch.get(batch_id),
            (None, Some(entry_type)) => self.by_type.get(&entry_type),
            (None, None) => return self.entries.iter().map(|(_, stored)| stored).collect(),
        };

        ids.map(|ids| ids.iter().filter_map(|id| self.entries.peek(id)).collect())
            .unwrap_or_default()
    }
}

/// In-process storage with a fixed entry ceiling
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    max_entries: usize,
}

impl MemoryStorage {
    /// Create a store holding at most `max_entries` entries
    ///
    /// # Errors
    /// - `Error::Config` if `max_entries` is zero
    pub fn new(max_entries: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_entries)
            .ok_or_else(|| Error::Config("Memory storage max_entries must be > 0".to_string()))?;
        Ok(Self {
            inner: RwLock::new(Inner::new(capacity)),
            max_entries,
        })
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(Inner::new(capacity)),
            max_entries: capacity.get(),
        }
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        tracing::debug!(max_entries = self.max_entries, "Memory storage ready");
        Ok(())
    }

    async fn save(&self, entry: &Entry) -> Result<()> {
        self.inner.write().await.upsert(entry);
        Ok(())
    }

    /// Applied one entry at a time under a single write lock; cannot fail part-way
    async fn save_batch(&self, entries: &[Entry]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for entry in entries {
            inner.upsert(entry);
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Entry>> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .peek(id)
            .map(|stored| stored.entry.clone()))
    }

    async fn list(&self, options: &ListOptions) -> Result<PaginatedResult<Entry>> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&Stored> = inner
            .candidates(options)
            .into_iter()
            .filter(|stored| options.matches(&stored.entry, &stored.content_json))
            .collect();

        matched.sort_by(|a, b| {
            b.entry
                .created_at
                .cmp(&a.entry.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        Ok(options.paginate(matched.into_iter().map(|s| s.entry.clone()).collect()))
    }

    async fn find_by_batch(&self, batch_id: &str) -> Result<Vec<Entry>> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_batch.get(batch_id) else {
            return Ok(Vec::new());
        };

        let mut stored: Vec<&Stored> = ids.iter().filter_map(|id| inner.entries.peek(id)).collect();
        stored.sort_by(|a, b| {
            a.entry
                .created_at
                .cmp(&b.entry.created_at)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        Ok(stored.into_iter().map(|s| s.entry.clone()).collect())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, stored)| stored.entry.created_at < before)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(stored) = inner.entries.pop(id) {
                inner.unindex(&stored.entry);
            }
        }

        Ok(expired.len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.by_batch.clear();
        inner.by_type.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let inner = self.inner.read().await;
        let mut stats = StorageStats::empty();
        for (_, stored) in inner.entries.iter() {
            stats.add(stored.entry.entry_type, 1);
            stats.observe(stored.entry.created_at);
        }
        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
