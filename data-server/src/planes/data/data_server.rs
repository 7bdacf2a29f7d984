use crate::domain::{LockSentinel, SetOptions, TouchOptions};
use crate::events::{DataServerEvent, EventBus, Operation};
use crate::planes::data::operation::DataOperations;
use crate::ports::CacheBackend;
use crate::ttl::TtlPolicy;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::config::DataServerConfig;
use shared::{Result, Ttl};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, trace, warn};

/// Application service implementing the data server contract over a backend.
///
/// Holds no client-side locks: every operation validates, normalizes, makes
/// one backend call and publishes an event. Share it behind an `Arc`.
pub struct DataServer {
    pub(crate) backend: Arc<dyn CacheBackend>,
    pub(crate) ttl_policy: TtlPolicy,
    pub(crate) lock_sentinel: LockSentinel,
    pub(crate) events: EventBus,
    pub(crate) started: AtomicBool,
    /// Held across `connect`/`shutdown` only, never on the data path.
    pub(crate) lifecycle: Mutex<()>,
}

impl DataServer {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &DataServerConfig) -> Result<Self> {
        Self::with_event_bus(backend, config, EventBus::new(config.event_capacity))
    }

    /// Publishes into an existing bus, e.g. one shared by several servers.
    pub fn with_event_bus(
        backend: Arc<dyn CacheBackend>,
        config: &DataServerConfig,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            ttl_policy: TtlPolicy::from_config(config),
            lock_sentinel: LockSentinel::from_config(config)?,
            events,
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataServerEvent> {
        self.events.subscribe()
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl_policy
    }

    pub fn lock_sentinel(&self) -> &LockSentinel {
        &self.lock_sentinel
    }

    /// Typed `get`. Values that do not deserialize into `T` read as `None`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                debug!("Value under key '{}' has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Typed `set`. A value that cannot be represented as JSON is rejected
    /// like any other invalid input.
    pub async fn set_as<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
        options: SetOptions,
    ) -> Result<Option<Value>> {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl, options).await,
            Err(e) => {
                debug!("Rejected set on key '{}': {}", key, e);
                Ok(None)
            }
        }
    }
}

pub(crate) fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
}

impl std::fmt::Debug for DataServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServer")
            .field("ttl_policy", &self.ttl_policy)
            .field("subscribers", &self.events.subscriber_count())
            .field("started", &self.started)
            .finish()
    }
}

#[async_trait]
impl DataOperations for DataServer {
    async fn get(&self, key: &str) -> Option<Value> {
        if !is_valid_key(key) {
            return None;
        }

        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("get on key '{}' failed: {}", key, e);
                return None;
            }
        };

        if self.lock_sentinel.matches(&raw) {
            return None;
        }

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.events.publish(Operation::Get, key);
                Some(value)
            }
            Err(e) => {
                warn!("Key '{}' holds a value that is not JSON: {}", key, e);
                None
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Ttl,
        options: SetOptions,
    ) -> Result<Option<Value>> {
        if !is_valid_key(key) || value.is_null() {
            debug!("Rejected set on key '{}'", key);
            return Ok(None);
        }

        let payload = match serde_json::to_string(&value) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Rejected set on key '{}': {}", key, e);
                return Ok(None);
            }
        };

        let ttl = self.ttl_policy.normalize(ttl);
        trace!("set '{}' ttl={} persist={}", key, ttl, options.persist);

        self.backend.set(key, payload, ttl).await?;
        self.events.publish(Operation::Set, key);

        Ok(Some(value))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if !is_valid_key(key) {
            return Ok(false);
        }

        let existed = self.backend.delete(key).await?;
        trace!("delete '{}' existed={}", key, existed);
        self.events.publish(Operation::Delete, key);

        Ok(true)
    }

    async fn increment(&self, key: &str, amount: u64) -> Option<u64> {
        if !is_valid_key(key) {
            return None;
        }

        let result = self.backend.increment(key, amount).await;
        counter_outcome(self, Operation::Increment, key, result)
    }

    async fn decrement(&self, key: &str, amount: u64) -> Option<u64> {
        if !is_valid_key(key) {
            return None;
        }

        let result = self.backend.decrement(key, amount).await;
        counter_outcome(self, Operation::Decrement, key, result)
    }

    async fn touch(&self, key: &str, ttl: Ttl, options: TouchOptions) -> Result<bool> {
        if !is_valid_key(key) {
            return Ok(false);
        }

        let ttl = self.ttl_policy.normalize(ttl);
        trace!("touch '{}' ttl={} persist={}", key, ttl, options.persist);

        if !self.backend.touch(key, ttl).await? {
            return Ok(false);
        }

        self.events.publish(Operation::Touch, key);
        Ok(true)
    }
}

fn counter_outcome(
    server: &DataServer,
    operation: Operation,
    key: &str,
    result: Result<u64>,
) -> Option<u64> {
    match result {
        Ok(value) => {
            server.events.publish(operation, key);
            Some(value)
        }
        Err(e) if e.is_expected() => {
            debug!("{} on key '{}' rejected: {}", operation, key, e);
            None
        }
        Err(e) => {
            warn!("{} on key '{}' failed: {}", operation, key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planes::data::test_backend::RecordingBackend;
    use serde_json::json;
    use shared::Error;

    fn server() -> (DataServer, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let server = DataServer::new(backend.clone(), &DataServerConfig::default()).unwrap();
        (server, backend)
    }

    fn drain(receiver: &mut broadcast::Receiver<DataServerEvent>) -> Vec<Operation> {
        let mut operations = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            operations.push(event.operation);
        }
        operations
    }

    #[tokio::test]
    async fn test_set_serializes_and_normalizes_ttl() {
        let (server, backend) = server();

        let stored = server
            .set("user", json!({"name": "ada"}), Ttl::Unlimited, SetOptions::default())
            .await
            .unwrap();

        assert_eq!(stored, Some(json!({"name": "ada"})));
        assert_eq!(backend.raw("user").unwrap(), r#"{"name":"ada"}"#);
        assert_eq!(
            backend.ttl_of("user").unwrap().as_secs(),
            DataServerConfig::MAX_TTL_SECS
        );

        server
            .set("other", json!(1), Ttl::Default, SetOptions::default())
            .await
            .unwrap();
        assert_eq!(
            backend.ttl_of("other").unwrap().as_secs(),
            DataServerConfig::DEFAULT_TTL_SECS
        );
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_backend() {
        let (server, backend) = server();
        let mut events = server.subscribe();

        assert_eq!(
            server.set("", json!("v"), Ttl::Seconds(100), SetOptions::default()).await.unwrap(),
            None
        );
        assert_eq!(
            server.set("key", Value::Null, Ttl::Seconds(100), SetOptions::default()).await.unwrap(),
            None
        );
        assert_eq!(server.get("").await, None);
        assert!(!server.delete("").await.unwrap());
        assert_eq!(server.increment("", 1).await, None);
        assert_eq!(server.decrement("", 1).await, None);
        assert!(!server.touch("", Ttl::Seconds(5), TouchOptions::default()).await.unwrap());

        assert_eq!(backend.calls(), 0);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_get_soft_fails_on_backend_error() {
        let (server, backend) = server();
        server.set("k", json!("v"), Ttl::Default, SetOptions::default()).await.unwrap();

        backend.set_failing(true);
        assert_eq!(server.get("k").await, None);
        assert_eq!(server.increment("k", 1).await, None);
        assert_eq!(server.decrement("k", 1).await, None);
    }

    #[tokio::test]
    async fn test_writes_propagate_backend_errors() {
        let (server, backend) = server();
        backend.set_failing(true);

        let result = server.set("k", json!("v"), Ttl::Default, SetOptions::default()).await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert!(server.delete("k").await.is_err());
        assert!(server.touch("k", Ttl::Seconds(1), TouchOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_get_ignores_non_json_and_lock_values() {
        let (server, backend) = server();
        backend
            .set("garbage", "not json".to_string(), shared::TtlSecs::new(10))
            .await
            .unwrap();

        assert_eq!(server.get("garbage").await, None);

        backend
            .set(
                "locked",
                server.lock_sentinel().as_str().to_string(),
                shared::TtlSecs::new(10),
            )
            .await
            .unwrap();
        assert_eq!(server.get("locked").await, None);
    }

    #[tokio::test]
    async fn test_events_follow_outcomes() {
        let (server, _) = server();
        let mut events = server.subscribe();

        server.set("n", json!(5), Ttl::Default, SetOptions::default()).await.unwrap();
        assert_eq!(server.get("n").await, Some(json!(5)));
        assert_eq!(server.get("missing").await, None);
        assert_eq!(server.increment("n", 2).await, Some(7));
        assert_eq!(server.increment("missing", 2).await, None);
        assert_eq!(server.decrement("n", 10).await, Some(0));
        assert!(server.touch("n", Ttl::Seconds(9), TouchOptions::default()).await.unwrap());
        assert!(!server.touch("missing", Ttl::Seconds(9), TouchOptions::default()).await.unwrap());
        assert!(server.delete("missing").await.unwrap());

        assert_eq!(
            drain(&mut events),
            vec![
                Operation::Set,
                Operation::Get,
                Operation::Increment,
                Operation::Decrement,
                Operation::Touch,
                Operation::Delete,
            ]
        );
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Session {
            user: String,
            visits: u32,
        }

        let (server, _) = server();
        let session = Session { user: "ada".into(), visits: 3 };

        server
            .set_as("session", &session, Ttl::Seconds(60), SetOptions::persist())
            .await
            .unwrap();

        assert_eq!(server.get_as::<Session>("session").await, Some(session));
        assert_eq!(server.get_as::<u64>("session").await, None);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = DataServerConfig::default();
        config.lock_value = "1".to_string();

        let result = DataServer::new(Arc::new(RecordingBackend::default()), &config);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
