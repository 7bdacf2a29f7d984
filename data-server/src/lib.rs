//! The data server contract: validated, TTL-normalized, event-emitting
//! key/value operations and a distributed lock, layered over any backend
//! that implements [`ports::CacheBackend`].

pub mod domain;
pub mod events;
pub mod planes;
pub mod ports;
pub mod ttl;

pub use domain::{LockSentinel, SetOptions, TouchOptions};
pub use events::{DataServerEvent, EventBus, Operation};
pub use planes::control::lifecycle::Lifecycle;
pub use planes::data::data_server::DataServer;
pub use planes::data::operation::{DataOperations, LockOperations};
pub use ports::CacheBackend;
pub use ttl::TtlPolicy;
