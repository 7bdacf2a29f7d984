use async_trait::async_trait;
use data_server::ports::CacheBackend;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, RedisResult, Script};
use shared::config::DataServerConfig;
use shared::{Error, Result, TtlSecs};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

/// Error code raised by the counter scripts for values that are not counters.
const NOT_NUMERIC_CODE: &str = "NOTNUMERIC";

// Both scripts run atomically on the server. They only touch counters whose
// stored text is all digits, so negative numbers and JSON strings are refused.
const INCREMENT_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then return false end
if not string.match(current, '^%d+$') then
  return redis.error_reply('NOTNUMERIC stored value is not a counter')
end
return redis.call('INCRBY', KEYS[1], ARGV[1])
";

const DECREMENT_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then return false end
if not string.match(current, '^%d+$') then
  return redis.error_reply('NOTNUMERIC stored value is not a counter')
end
local next = redis.call('DECRBY', KEYS[1], ARGV[1])
if next < 0 then
  redis.call('SET', KEYS[1], '0', 'KEEPTTL')
  return 0
end
return next
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    pub locations: Vec<String>,
    pub pool_size: usize,
    pub response_timeout: Duration,
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn from_data_server_config(config: &DataServerConfig) -> Self {
        Self {
            locations: config.server_locations.clone(),
            pool_size: config.server_options.pool_size.max(1),
            response_timeout: Duration::from_millis(config.server_options.response_timeout_ms),
            key_prefix: config.server_options.key_prefix.clone(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::from_data_server_config(&DataServerConfig::default())
    }
}

/// One server location with lazily connected, round-robin connection slots.
struct Node {
    client: redis::Client,
    slots: Vec<OnceCell<ConnectionManager>>,
    next: AtomicUsize,
}

impl Node {
    fn open(location: &str, pool_size: usize) -> Result<Self> {
        let client = redis::Client::open(connection_url(location)).map_err(translate_error)?;
        Ok(Self {
            client,
            slots: (0..pool_size).map(|_| OnceCell::new()).collect(),
            next: AtomicUsize::new(0),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.slot(index).await
    }

    async fn slot(&self, index: usize) -> Result<ConnectionManager> {
        let manager = self.slots[index]
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(translate_error)
            })
            .await?;
        Ok(manager.clone())
    }
}

/// Redis-backed data server backend.
///
/// Suitable for many processes sharing one key space: locking uses
/// `SET NX EX`, counters run as server-side scripts. With several locations
/// keys are sharded by a stable hash, so every process picks the same node
/// for a key.
pub struct RedisBackend {
    config: RedisConfig,
    nodes: RwLock<Option<Arc<Vec<Node>>>>,
    increment_script: Script,
    decrement_script: Script,
}

impl RedisBackend {
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            nodes: RwLock::new(None),
            increment_script: Script::new(INCREMENT_SCRIPT),
            decrement_script: Script::new(DECREMENT_SCRIPT),
        }
    }

    pub fn from_data_server_config(config: &DataServerConfig) -> Self {
        Self::new(RedisConfig::from_data_server_config(config))
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn connection(&self, key: &str) -> Result<ConnectionManager> {
        let nodes = self.nodes.read().await.clone().ok_or(Error::NotConnected)?;
        let node = &nodes[shard_index(key, nodes.len())];
        node.connection().await
    }

    /// Picks the connection for `key` and runs `command` on it. The response
    /// timeout covers both, so a slot that still has to connect cannot hang.
    async fn run<T, F, Fut>(&self, operation: &str, key: &str, command: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let attempt = async {
            let conn = self.connection(key).await?;
            command(conn).await.map_err(translate_error)
        };

        match tokio::time::timeout(self.config.response_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} exceeded {:?}",
                operation, self.config.response_timeout
            ))),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn connect(&self) -> Result<()> {
        if self.nodes.read().await.is_some() {
            return Ok(());
        }

        let nodes = self
            .config
            .locations
            .iter()
            .map(|location| Node::open(location, self.config.pool_size))
            .collect::<Result<Vec<_>>>()?;

        // Connect the first slot of every node so an unreachable server fails here
        for (node, location) in nodes.iter().zip(&self.config.locations) {
            let ping = async {
                let mut conn = node.slot(0).await?;
                let _: String = redis::cmd("PING")
                    .query_async(&mut conn)
                    .await
                    .map_err(translate_error)?;
                Ok::<_, Error>(())
            };
            tokio::time::timeout(self.config.response_timeout, ping)
                .await
                .map_err(|_| Error::Timeout(format!("connecting to {location}")))??;
            info!("Connected to redis at {}", location);
        }

        let mut slot = self.nodes.write().await;
        if slot.is_none() {
            *slot = Some(Arc::new(nodes));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.namespaced(key);
        let k = key.as_str();
        let value: Option<String> = self
            .run("get", k, move |mut conn| async move { conn.get(k).await })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()> {
        let key = self.namespaced(key);
        let k = key.as_str();
        let _: () = self
            .run("set", k, move |mut conn| async move {
                redis::cmd("SET")
                    .arg(k)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = self.namespaced(key);
        let k = key.as_str();
        let removed: u64 = self
            .run("delete", k, move |mut conn| async move { conn.del(k).await })
            .await?;
        Ok(removed > 0)
    }

    async fn create_if_absent(&self, key: &str, value: String, ttl: TtlSecs) -> Result<()> {
        let key = self.namespaced(key);
        let k = key.as_str();
        let reply: Option<String> = self
            .run("create_if_absent", k, move |mut conn| async move {
                redis::cmd("SET")
                    .arg(k)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        match reply {
            Some(_) => Ok(()),
            None => {
                debug!("create_if_absent on '{}' lost to an existing entry", key);
                Err(Error::AlreadyExists)
            }
        }
    }

    async fn increment(&self, key: &str, amount: u64) -> Result<u64> {
        let amount = redis_amount(amount)?;
        let key = self.namespaced(key);
        let k = key.as_str();
        let script = &self.increment_script;
        let reply: Option<u64> = self
            .run("increment", k, move |mut conn| async move {
                script.key(k).arg(amount).invoke_async(&mut conn).await
            })
            .await?;
        reply.ok_or(Error::NotFound)
    }

    async fn decrement(&self, key: &str, amount: u64) -> Result<u64> {
        // DECRBY only takes signed amounts; anything larger floors to zero anyway
        let amount = amount.min(i64::MAX as u64) as i64;
        let key = self.namespaced(key);
        let k = key.as_str();
        let script = &self.decrement_script;
        let reply: Option<u64> = self
            .run("decrement", k, move |mut conn| async move {
                script.key(k).arg(amount).invoke_async(&mut conn).await
            })
            .await?;
        reply.ok_or(Error::NotFound)
    }

    async fn touch(&self, key: &str, ttl: TtlSecs) -> Result<bool> {
        let key = self.namespaced(key);
        let k = key.as_str();
        let updated: bool = self
            .run("touch", k, move |mut conn| async move {
                redis::cmd("EXPIRE")
                    .arg(k)
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(updated)
    }

    async fn shutdown(&self) -> Result<()> {
        // Dropping the managers closes their connections
        if self.nodes.write().await.take().is_some() {
            info!("Disconnected from redis");
        }
        Ok(())
    }
}

impl Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("config", &self.config)
            .finish()
    }
}

fn connection_url(location: &str) -> String {
    if location.contains("://") {
        location.to_string()
    } else {
        format!("redis://{location}")
    }
}

/// FNV-1a, stable across processes and builds.
fn shard_index(key: &str, nodes: usize) -> usize {
    if nodes <= 1 {
        return 0;
    }

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % nodes as u64) as usize
}

fn redis_amount(amount: u64) -> Result<i64> {
    i64::try_from(amount).map_err(|_| Error::Overflow)
}

fn translate_error(err: RedisError) -> Error {
    if err.is_timeout() {
        return Error::Timeout(err.to_string());
    }
    if err.kind() == redis::ErrorKind::IoError
        || err.is_connection_refusal()
        || err.is_connection_dropped()
    {
        return Error::Connection(err.to_string());
    }

    reply_error(err.code(), err.to_string())
}

/// Maps an error reply from the server by its code, then by its message.
fn reply_error(code: Option<&str>, message: String) -> Error {
    if code == Some(NOT_NUMERIC_CODE) || message.contains("not an integer") {
        Error::NotNumeric
    } else if message.contains("overflow") {
        Error::Overflow
    } else {
        Error::Backend(message)
    }
}
