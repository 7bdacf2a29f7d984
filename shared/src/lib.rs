// shared/src/lib.rs

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("key already exists")]
    AlreadyExists,
    #[error("stored value is not a non-negative integer")]
    NotNumeric,
    #[error("counter would overflow")]
    Overflow,
    #[error("backend is not connected")]
    NotConnected,
    #[error("connection: {0}")]
    Connection(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("backend: {0}")]
    Backend(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that describe the state of a key rather than a broken backend.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::AlreadyExists | Error::NotNumeric | Error::Overflow
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
pub mod ttl;

pub use ttl::{Ttl, TtlSecs};
