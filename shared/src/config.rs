use crate::{Error, Result, Ttl};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Options recognized by a data server instance.
///
/// Deserializes from the camelCase option objects hosts pass around
/// (`serverLocations`, `serverOptions`, `ttl`, ...). Missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataServerConfig {
    #[serde(deserialize_with = "one_or_many")]
    pub server_locations: Vec<String>,
    pub server_options: ServerOptions,
    /// Default TTL applied when a caller passes [`Ttl::Default`].
    pub ttl: Ttl,
    /// Ceiling for every TTL handed to the backend.
    pub max_ttl: u64,
    /// Reserved value written under a key while it is locked.
    pub lock_value: String,
    /// Buffer size of the event channel.
    pub event_capacity: usize,
}

/// Backend connection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerOptions {
    pub pool_size: usize,
    pub response_timeout_ms: u64,
    pub key_prefix: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            pool_size: DataServerConfig::DEFAULT_POOL_SIZE,
            response_timeout_ms: DataServerConfig::DEFAULT_RESPONSE_TIMEOUT_MS,
            key_prefix: String::new(),
        }
    }
}

impl Default for DataServerConfig {
    fn default() -> Self {
        Self {
            server_locations: vec![Self::DEFAULT_SERVER_LOCATION.to_string()],
            server_options: ServerOptions::default(),
            ttl: Ttl::Seconds(Self::DEFAULT_TTL_SECS),
            max_ttl: Self::MAX_TTL_SECS,
            lock_value: Self::DEFAULT_LOCK_VALUE.to_string(),
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DataServerConfig {
    pub const DEFAULT_SERVER_LOCATION: &str = "127.0.0.1:6379";
    pub const DEFAULT_POOL_SIZE: usize = 100;
    pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;
    pub const DEFAULT_TTL_SECS: u64 = 300;
    /// 30 days, the largest relative expiry remote caches accept.
    pub const MAX_TTL_SECS: u64 = 2_592_000;
    /// Contains a NUL byte, so it can never be the JSON encoding of a value.
    pub const DEFAULT_LOCK_VALUE: &str = "\u{0}data-server:lock";
    pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

    pub fn from_env() -> Self {
        let defaults = Self::default();

        let server_locations = std::env::var("DATA_SERVER_LOCATIONS")
            .ok()
            .map(|raw| split_locations(&raw))
            .filter(|locations| !locations.is_empty())
            .unwrap_or(defaults.server_locations);

        let ttl = match std::env::var("DATA_SERVER_TTL") {
            Ok(raw) => match raw.trim().parse::<i64>().ok().and_then(Ttl::from_secs_i64) {
                Some(ttl) => ttl,
                None => {
                    warn!("DATA_SERVER_TTL={} is not a valid ttl, using default", raw);
                    defaults.ttl
                }
            },
            Err(_) => defaults.ttl,
        };

        Self {
            server_locations,
            server_options: ServerOptions {
                pool_size: env_parse("DATA_SERVER_POOL_SIZE", defaults.server_options.pool_size),
                response_timeout_ms: env_parse(
                    "DATA_SERVER_RESPONSE_TIMEOUT_MS",
                    defaults.server_options.response_timeout_ms,
                ),
                key_prefix: std::env::var("DATA_SERVER_KEY_PREFIX")
                    .unwrap_or(defaults.server_options.key_prefix),
            },
            ttl,
            max_ttl: env_parse("DATA_SERVER_MAX_TTL", defaults.max_ttl),
            lock_value: defaults.lock_value,
            event_capacity: env_parse("DATA_SERVER_EVENT_CAPACITY", defaults.event_capacity),
        }
    }

    /// Parses a JSON option object, then validates it.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_locations.is_empty() {
            return Err(Error::Config("serverLocations must not be empty".into()));
        }
        if self.server_options.pool_size == 0 {
            return Err(Error::Config("serverOptions.poolSize must be at least 1".into()));
        }
        if self.server_options.response_timeout_ms == 0 {
            return Err(Error::Config(
                "serverOptions.responseTimeoutMs must be at least 1".into(),
            ));
        }
        if self.ttl == Ttl::Seconds(0) {
            return Err(Error::Config(
                "ttl must be at least 1 second, use Ttl::Default for the built-in default".into(),
            ));
        }
        if self.max_ttl == 0 {
            return Err(Error::Config("maxTtl must be at least 1 second".into()));
        }
        if self.lock_value.is_empty() {
            return Err(Error::Config("lockValue must not be empty".into()));
        }
        if serde_json::from_str::<serde_json::Value>(&self.lock_value).is_ok() {
            return Err(Error::Config(
                "lockValue must not be valid JSON, it would collide with cached values".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("eventCapacity must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn split_locations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `serverLocations` may be a single comma separated string or a list.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Locations {
        One(String),
        Many(Vec<String>),
    }

    let locations = match Locations::deserialize(deserializer)? {
        Locations::One(raw) => split_locations(&raw),
        Locations::Many(list) => list
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    };

    if locations.is_empty() {
        Ok(vec![DataServerConfig::DEFAULT_SERVER_LOCATION.to_string()])
    } else {
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = DataServerConfig::default();
        assert_eq!(config.server_locations, vec!["127.0.0.1:6379".to_string()]);
        assert_eq!(config.server_options.pool_size, 100);
        assert_eq!(config.ttl, Ttl::Seconds(300));
        assert_eq!(config.max_ttl, 2_592_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_camel_case() {
        let config = DataServerConfig::from_json(json!({
            "serverLocations": "10.0.0.1:6379, 10.0.0.2:6379",
            "serverOptions": { "poolSize": 8, "keyPrefix": "app:" },
            "ttl": -1
        }))
        .unwrap();

        assert_eq!(
            config.server_locations,
            vec!["10.0.0.1:6379".to_string(), "10.0.0.2:6379".to_string()]
        );
        assert_eq!(config.server_options.pool_size, 8);
        assert_eq!(config.server_options.key_prefix, "app:");
        assert_eq!(
            config.server_options.response_timeout_ms,
            DataServerConfig::DEFAULT_RESPONSE_TIMEOUT_MS
        );
        assert_eq!(config.ttl, Ttl::Unlimited);
    }

    #[test]
    fn test_empty_locations_fall_back_to_default() {
        let config = DataServerConfig::from_json(json!({ "serverLocations": "" })).unwrap();
        assert_eq!(config.server_locations, vec!["127.0.0.1:6379".to_string()]);

        let config = DataServerConfig::from_json(json!({ "serverLocations": ["a:1", "b:2"] })).unwrap();
        assert_eq!(config.server_locations.len(), 2);
    }

    #[test]
    fn test_invalid_ttl_rejected() {
        assert!(DataServerConfig::from_json(json!({ "ttl": -7 })).is_err());
        assert!(DataServerConfig::from_json(json!({ "ttl": "300" })).is_err());
    }

    #[test]
    fn test_lock_value_must_not_be_json() {
        let mut config = DataServerConfig::default();
        config.lock_value = "\"locked\"".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.lock_value = "42".to_string();
        assert!(config.validate().is_err());

        config.lock_value = "<locked>".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = DataServerConfig::default();
        config.server_options.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = DataServerConfig::default();
        config.max_ttl = 0;
        assert!(config.validate().is_err());

        let mut config = DataServerConfig::default();
        config.ttl = Ttl::Seconds(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.ttl = Ttl::Default;
        assert!(config.validate().is_ok());
    }
}
