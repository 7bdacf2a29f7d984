use crate::planes::data::data_server::DataServer;
use async_trait::async_trait;
use shared::Result;
use std::sync::atomic::Ordering;
use tracing::info;

/// Connection lifecycle. Both calls are idempotent.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Connect to the backend. Connection errors propagate; there is no
    /// fallback to a no-op cache.
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_started(&self) -> bool;
}

#[async_trait]
impl Lifecycle for DataServer {
    async fn start(&self) -> Result<()> {
        // Concurrent callers wait here until the first connect has settled
        let _transition = self.lifecycle.lock().await;
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        self.backend.connect().await?;
        self.started.store(true, Ordering::Release);

        info!("Data server started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _transition = self.lifecycle.lock().await;
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        self.started.store(false, Ordering::Release);
        self.backend.shutdown().await?;
        info!("Data server stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}
