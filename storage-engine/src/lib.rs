//! Backend adapters for the data server.
//!
//! [`RedisBackend`] shares one key space between processes. [`MokaBackend`]
//! keeps everything in the current process.

pub mod moka_backend;
pub mod redis_backend;

pub use moka_backend::MokaBackend;
pub use redis_backend::{RedisBackend, RedisConfig};

use data_server::DataServer;
use shared::Result;
use shared::config::DataServerConfig;
use std::sync::Arc;

/// Data server over a Redis deployment described by `config`.
pub fn redis_data_server(config: &DataServerConfig) -> Result<DataServer> {
    DataServer::new(Arc::new(RedisBackend::from_data_server_config(config)), config)
}

/// Data server over a fresh in-process cache.
pub fn memory_data_server(config: &DataServerConfig) -> Result<DataServer> {
    DataServer::new(Arc::new(MokaBackend::default()), config)
}
