use crate::ports::CacheBackend;
use async_trait::async_trait;
use shared::{Error, Result, TtlSecs};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Backend double that records traffic and can be switched into a failing state.
#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    entries: Mutex<HashMap<String, String>>,
    ttls: Mutex<HashMap<String, TtlSecs>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    // When set, connect is slow and data calls before it completes fail
    connect_delay: Option<Duration>,
    connects: AtomicUsize,
    connected: AtomicBool,
}

impl RecordingBackend {
    pub(crate) fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn ttl_of(&self, key: &str) -> Option<TtlSecs> {
        self.ttls.lock().unwrap().get(key).copied()
    }

    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn record(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Connection("backend unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn enter(&self) -> Result<()> {
        self.record()?;
        if self.connect_delay.is_some() && !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    fn adjust(&self, key: &str, apply: impl FnOnce(u64) -> Option<u64>) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let stored = entries.get_mut(key).ok_or(Error::NotFound)?;
        let current = stored.parse::<u64>().map_err(|_| Error::NotNumeric)?;
        let next = apply(current).ok_or(Error::Overflow)?;
        *stored = next.to_string();
        Ok(next)
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.record()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.enter()?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()> {
        self.enter()?;
        self.entries.lock().unwrap().insert(key.to_string(), value);
        self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter()?;
        self.ttls.lock().unwrap().remove(key);
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn create_if_absent(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()> {
        self.enter()?;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Err(Error::AlreadyExists);
        }
        entries.insert(key.to_string(), value);
        self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        Ok(())
    }

    async fn increment(&self, key: &str, amount: u64) -> Result<u64> {
        self.enter()?;
        self.adjust(key, |current| current.checked_add(amount))
    }

    async fn decrement(&self, key: &str, amount: u64) -> Result<u64> {
        self.enter()?;
        self.adjust(key, |current| Some(current.saturating_sub(amount)))
    }

    async fn touch(&self, key: &str, ttl: TtlSecs) -> Result<bool> {
        self.enter()?;
        if !self.entries.lock().unwrap().contains_key(key) {
            return Ok(false);
        }
        self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        Ok(true)
    }

    async fn shutdown(&self) -> Result<()> {
        self.record()?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
