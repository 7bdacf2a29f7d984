#![deny(clippy::all)]

use async_trait::async_trait;
use shared::{Result, TtlSecs};

// Ports are the pluggable extension points for underlying cache backends

/// Atomic primitives a backend must provide to sit behind the data server.
///
/// Values are opaque text at this boundary; the contract owns serialization.
/// Every method is a single atomic operation at the backend. In particular
/// `create_if_absent` must be native to the backend: adapters that would have
/// to emulate it with a read followed by a write must not implement this trait.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Establish connections. Errors here are fatal for the caller of `start`.
    async fn connect(&self) -> Result<()>;

    /// `Ok(None)` for a missing or expired key, never `Err(NotFound)`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Writes only if no live entry exists.
    /// Fails with `Error::AlreadyExists` when the key is taken.
    async fn create_if_absent(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()>;

    /// Adds `amount` to a stored non-negative integer, keeping its TTL.
    /// Fails with `NotFound`, `NotNumeric` or `Overflow`.
    async fn increment(&self, key: &str, amount: u64) -> Result<u64>;

    /// Subtracts `amount`, flooring at zero. Same failures as `increment`.
    async fn decrement(&self, key: &str, amount: u64) -> Result<u64>;

    /// Resets the TTL of a live entry. `Ok(false)` if the key is missing.
    async fn touch(&self, key: &str, ttl: TtlSecs) -> Result<bool>;

    /// Release connections.
    async fn shutdown(&self) -> Result<()>;
}
