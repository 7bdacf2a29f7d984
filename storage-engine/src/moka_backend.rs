use async_trait::async_trait;
use data_server::ports::CacheBackend;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use shared::{Error, Result, TtlSecs};
use std::fmt::Debug;
use std::future::ready;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct StoredEntry {
    payload: Arc<str>,
    /// `None` keeps whatever lifetime the entry already has.
    ttl: Option<Duration>,
}

impl StoredEntry {
    fn new(payload: String, ttl: TtlSecs) -> Self {
        Self {
            payload: payload.into(),
            ttl: Some(ttl.as_duration()),
        }
    }

    fn keeping_ttl(payload: String) -> Self {
        Self {
            payload: payload.into(),
            ttl: None,
        }
    }

    fn with_ttl(self, ttl: TtlSecs) -> Self {
        Self {
            payload: self.payload,
            ttl: Some(ttl.as_duration()),
        }
    }

    fn counter(&self) -> Option<u64> {
        self.payload.parse::<u64>().ok()
    }
}

/// Per-entry expiry: every write carries its own TTL, counter updates keep
/// the remaining one.
struct EntryExpiry;

impl Expiry<String, StoredEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl.or(duration_until_expiry)
    }
}

/// Moka-based backend with per-entry TTL.
/// Lock-free and concurrent; atomicity of create-if-absent and of counter
/// updates comes from moka's per-key entry API.
pub struct MokaBackend {
    cache: Cache<String, StoredEntry>,
}

impl MokaBackend {
    /// Create a new unbounded Moka backend
    pub fn new_unbounded() -> Self {
        Self::new("data-server", None)
    }

    /// Create a new bounded Moka backend with max entries
    pub fn new_bounded(max_entries: u64) -> Self {
        Self::new("data-server", Some(max_entries))
    }

    pub fn new(name: &str, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name(name).expire_after(EntryExpiry);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    /// Drop every entry, locks included.
    pub fn flush(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    async fn adjust(&self, key: &str, apply: impl FnOnce(u64) -> Option<u64>) -> Result<u64> {
        let outcome = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) => match entry.value().counter().and_then(apply) {
                        Some(next) => Op::Put(StoredEntry::keeping_ttl(next.to_string())),
                        None => Op::Nop,
                    },
                    None => Op::Nop,
                };
                ready(op)
            })
            .await;

        match outcome {
            CompResult::ReplacedWith(entry) => entry
                .value()
                .counter()
                .ok_or_else(|| Error::Internal("counter update stored a non-number".into())),
            CompResult::StillNone(_) => Err(Error::NotFound),
            CompResult::Unchanged(entry) if entry.value().counter().is_some() => {
                Err(Error::Overflow)
            }
            CompResult::Unchanged(_) => Err(Error::NotNumeric),
            CompResult::Inserted(_) | CompResult::Removed(_) => Err(Error::Internal(
                "counter update changed entry presence".into(),
            )),
        }
    }
}

impl Default for MokaBackend {
    fn default() -> Self {
        Self::new_unbounded()
    }
}

#[async_trait]
impl CacheBackend for MokaBackend {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        // Expired entries are reported as absent
        Ok(self.cache.get(key).await.map(|entry| entry.payload.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()> {
        self.cache
            .insert(key.to_string(), StoredEntry::new(value, ttl))
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn create_if_absent(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()> {
        let entry = self
            .cache
            .entry_by_ref(key)
            .or_insert_with(async move { StoredEntry::new(value, ttl) })
            .await;

        if entry.is_fresh() {
            Ok(())
        } else {
            Err(Error::AlreadyExists)
        }
    }

    async fn increment(&self, key: &str, amount: u64) -> Result<u64> {
        self.adjust(key, |current| current.checked_add(amount)).await
    }

    async fn decrement(&self, key: &str, amount: u64) -> Result<u64> {
        self.adjust(key, |current| Some(current.saturating_sub(amount)))
            .await
    }

    async fn touch(&self, key: &str, ttl: TtlSecs) -> Result<bool> {
        let outcome = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) => Op::Put(entry.into_value().with_ttl(ttl)),
                    None => Op::Nop,
                };
                ready(op)
            })
            .await;

        Ok(matches!(outcome, CompResult::ReplacedWith(_)))
    }

    async fn shutdown(&self) -> Result<()> {
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

impl Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
