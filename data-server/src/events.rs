use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Get,
    Set,
    Delete,
    Increment,
    Decrement,
    Touch,
    Lock,
    Unlock,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Delete => "delete",
            Operation::Increment => "increment",
            Operation::Decrement => "decrement",
            Operation::Touch => "touch",
            Operation::Lock => "lock",
            Operation::Unlock => "unlock",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataServerEvent {
    pub operation: Operation,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out of `{operation, key}` notifications.
///
/// The bus is independent of any data server: clone it into several servers
/// or hand receivers to metrics and tests. Publishing never blocks; a
/// receiver that falls more than `capacity` events behind observes
/// `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DataServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataServerEvent> {
        self.sender.subscribe()
    }

    /// Same as [`subscribe`](Self::subscribe), as a `Stream`.
    pub fn stream(&self) -> BroadcastStream<DataServerEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, operation: Operation, key: &str) {
        let event = DataServerEvent {
            operation,
            key: key.to_string(),
            timestamp: Utc::now(),
        };

        match self.sender.send(event) {
            Ok(subscriber_count) => {
                tracing::debug!(
                    "Broadcasted {} event for key '{}' to {} subscriber(s)",
                    operation,
                    key,
                    subscriber_count
                );
            }
            Err(_) => {
                tracing::trace!("No subscribers for {} event on key '{}'", operation, key);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(shared::config::DataServerConfig::DEFAULT_EVENT_CAPACITY)
    }
}
