use anyhow::{Context, ensure};
use data_server::{DataOperations, DataServer, Lifecycle, LockOperations, SetOptions};
use futures::StreamExt;
use futures::future::join_all;
use serde_json::json;
use shared::Ttl;
use shared::config::DataServerConfig;
use std::sync::Arc;
use storage_engine::{memory_data_server, redis_data_server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONTENDERS: usize = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = DataServerConfig::from_env();
    config.validate().context("invalid data server configuration")?;

    let backend = std::env::var("DATA_SERVER_BACKEND").unwrap_or_else(|_| "redis".to_string());
    let server = match backend.as_str() {
        "redis" => redis_data_server(&config)?,
        "memory" => memory_data_server(&config)?,
        other => anyhow::bail!("unknown DATA_SERVER_BACKEND '{other}', expected redis or memory"),
    };
    let server = Arc::new(server);

    info!(
        "Probing {} backend at {:?}",
        backend, config.server_locations
    );

    let mut events = server.events().stream();
    let event_log = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    seen += 1;
                    info!("event {} '{}'", event.operation, event.key);
                }
                Err(e) => warn!("event stream lagged: {}", e),
            }
        }
        seen
    });

    server
        .start()
        .await
        .context("could not connect to the backend")?;

    let outcome = probe(&server).await;

    server.stop().await?;
    drop(server);
    let seen = event_log.await?;
    info!("Observed {} event(s)", seen);

    outcome
}

async fn probe(server: &Arc<DataServer>) -> anyhow::Result<()> {
    let prefix = format!("probe:{}", uuid::Uuid::new_v4());
    let value_key = format!("{prefix}:value");
    let counter_key = format!("{prefix}:counter");
    let lock_key = format!("{prefix}:lock");

    let stored = server
        .set(&value_key, json!({"probe": true}), Ttl::Seconds(60), SetOptions::default())
        .await?;
    ensure!(stored.is_some(), "set was rejected");
    ensure!(
        server.get(&value_key).await == Some(json!({"probe": true})),
        "get did not return the stored value"
    );

    server
        .set(&counter_key, json!(0), Ttl::Seconds(60), SetOptions::default())
        .await?;
    ensure!(server.increment(&counter_key, 5).await == Some(5), "increment failed");
    ensure!(server.decrement(&counter_key, 10).await == Some(0), "decrement did not floor");

    let attempts: Vec<_> = (0..CONTENDERS)
        .map(|_| {
            let server = server.clone();
            let key = lock_key.clone();
            tokio::spawn(async move { server.lock(&key).await })
        })
        .collect();
    let winners = join_all(attempts)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|won| *won)
        .count();
    ensure!(winners == 1, "{winners} of {CONTENDERS} lock attempts succeeded");
    info!("Lock contention check passed: 1 of {} acquired", CONTENDERS);

    ensure!(server.unlock(&lock_key).await, "unlock failed");
    for key in [&value_key, &counter_key] {
        server.delete(key).await?;
    }

    info!("Probe succeeded");
    Ok(())
}
