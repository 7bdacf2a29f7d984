use crate::events::Operation;
use crate::planes::data::data_server::{DataServer, is_valid_key};
use crate::planes::data::operation::LockOperations;
use async_trait::async_trait;
use shared::Error;
use tracing::{debug, warn};

// Mutual exclusion comes only from the backend's create-if-absent.
#[async_trait]
impl LockOperations for DataServer {
    async fn lock(&self, key: &str) -> bool {
        if !is_valid_key(key) {
            return false;
        }

        let result = self
            .backend
            .create_if_absent(
                key,
                self.lock_sentinel.as_str().to_string(),
                self.ttl_policy.ceiling(),
            )
            .await;

        // Published for failed attempts too
        self.events.publish(Operation::Lock, key);

        match result {
            Ok(()) => true,
            Err(Error::AlreadyExists) => {
                debug!("Lock '{}' is already held", key);
                false
            }
            Err(e) => {
                warn!("Lock '{}' could not be acquired: {}", key, e);
                false
            }
        }
    }

    async fn unlock(&self, key: &str) -> bool {
        if !is_valid_key(key) {
            return true;
        }

        if let Err(e) = self.backend.delete(key).await {
            warn!("Unlock of '{}' failed at the backend: {}", key, e);
        }

        self.events.publish(Operation::Unlock, key);
        true
    }
}
