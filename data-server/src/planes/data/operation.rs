use crate::domain::{SetOptions, TouchOptions};
use async_trait::async_trait;
use serde_json::Value;
use shared::{Result, Ttl};

/// Key/value operations of the data server contract.
///
/// Expected failures come back as `None`/`false`. `Err` only carries backend
/// failures on writes, where callers must tell "not written" from "absent".
#[async_trait]
pub trait DataOperations: Send + Sync + 'static {
    /// `None` for empty keys, missing entries, locked keys and backend errors.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Returns the stored value, or `Ok(None)` when the input is rejected.
    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Ttl,
        options: SetOptions,
    ) -> Result<Option<Value>>;

    /// `Ok(true)` for any non-empty key, whether or not it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn increment(&self, key: &str, amount: u64) -> Option<u64>;

    /// Floors at zero.
    async fn decrement(&self, key: &str, amount: u64) -> Option<u64>;

    /// `Ok(false)` for empty or missing keys.
    async fn touch(&self, key: &str, ttl: Ttl, options: TouchOptions) -> Result<bool>;
}

/// Distributed mutual exclusion over the same key space.
#[async_trait]
pub trait LockOperations: Send + Sync + 'static {
    /// `true` only for the single caller that created the lock.
    async fn lock(&self, key: &str) -> bool;

    /// Always `true`, also when nothing was locked.
    async fn unlock(&self, key: &str) -> bool;
}
