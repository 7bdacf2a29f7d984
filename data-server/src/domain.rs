use serde::{Deserialize, Serialize};
use shared::config::DataServerConfig;
use shared::{Error, Result};

/// Per-call options for `set`.
///
/// `persist` is a hint from callers such as session stores. Backends apply
/// their own retention, so it is carried through without changing storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetOptions {
    pub persist: bool,
}

impl SetOptions {
    pub fn persist() -> Self {
        Self { persist: true }
    }
}

/// Per-call options for `touch`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchOptions {
    pub persist: bool,
}

/// The reserved value stored under a locked key.
///
/// Cached values always reach the backend as JSON text. A sentinel that is not
/// valid JSON therefore cannot equal any cached value, which is checked here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockSentinel(String);

impl LockSentinel {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::Config("lock sentinel must not be empty".into()));
        }
        if serde_json::from_str::<serde_json::Value>(&value).is_ok() {
            return Err(Error::Config(format!(
                "lock sentinel {value:?} is valid JSON and could collide with a cached value"
            )));
        }
        Ok(Self(value))
    }

    pub fn from_config(config: &DataServerConfig) -> Result<Self> {
        Self::new(config.lock_value.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, raw: &str) -> bool {
        self.0 == raw
    }
}

impl Default for LockSentinel {
    fn default() -> Self {
        Self(DataServerConfig::DEFAULT_LOCK_VALUE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sentinel_is_not_json() {
        let sentinel = LockSentinel::default();
        assert!(serde_json::from_str::<serde_json::Value>(sentinel.as_str()).is_err());
        assert!(LockSentinel::new(sentinel.as_str()).is_ok());
    }

    #[test]
    fn test_json_sentinels_rejected() {
        for value in ["1", "\"lock\"", "true", "null", "{}", ""] {
            assert!(LockSentinel::new(value).is_err(), "{value:?} should be rejected");
        }
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: SetOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.persist);

        let options: SetOptions = serde_json::from_str(r#"{"persist": true}"#).unwrap();
        assert_eq!(options, SetOptions::persist());
    }
}
