use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Requested lifetime of an entry, before normalization.
///
/// Hosts historically encoded TTLs as plain integers where `0` meant "use the
/// default" and `-1` meant "never expire". Those encodings are accepted at the
/// edges (`from_secs_i64`, `TryFrom<&serde_json::Value>`, serde) and turned
/// into explicit variants here, so no magic number travels further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Ttl {
    /// Fall back to the server's configured default.
    #[default]
    Default,
    /// No expiry requested; backends cap this at their TTL ceiling.
    Unlimited,
    /// Expire after this many seconds. Never zero.
    Seconds(u64),
}

impl Ttl {
    /// Legacy integer spelling of [`Ttl::Unlimited`].
    pub const UNLIMITED_SENTINEL: i64 = -1;

    /// Interprets a legacy integer TTL. Negative values other than `-1` are rejected.
    pub fn from_secs_i64(secs: i64) -> Option<Self> {
        match secs {
            0 => Some(Ttl::Default),
            Self::UNLIMITED_SENTINEL => Some(Ttl::Unlimited),
            secs if secs > 0 => Some(Ttl::Seconds(secs as u64)),
            _ => None,
        }
    }

    pub fn secs(secs: u64) -> Self {
        if secs == 0 {
            Ttl::Default
        } else {
            Ttl::Seconds(secs)
        }
    }
}

impl From<u64> for Ttl {
    fn from(secs: u64) -> Self {
        Ttl::secs(secs)
    }
}

/// Partial seconds round up; only a zero duration means [`Ttl::Default`].
impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        let partial = u64::from(duration.subsec_nanos() > 0);
        Ttl::secs(duration.as_secs().saturating_add(partial))
    }
}

impl TryFrom<i64> for Ttl {
    type Error = Error;

    fn try_from(secs: i64) -> Result<Self, Self::Error> {
        Ttl::from_secs_i64(secs).ok_or_else(|| Error::Config(format!("invalid ttl: {secs}")))
    }
}

impl From<Ttl> for i64 {
    fn from(ttl: Ttl) -> Self {
        match ttl {
            Ttl::Default => 0,
            Ttl::Unlimited => Ttl::UNLIMITED_SENTINEL,
            Ttl::Seconds(secs) => i64::try_from(secs).unwrap_or(i64::MAX),
        }
    }
}

/// Accepts only integral JSON numbers. `null`, strings, booleans, arrays and
/// objects are rejected rather than coerced.
impl TryFrom<&serde_json::Value> for Ttl {
    type Error = Error;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        let secs = value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|secs| secs.fract() == 0.0)
                .map(|secs| secs as i64)
        });

        match secs {
            Some(secs) => Ttl::try_from(secs),
            None => Err(Error::Config(format!("ttl is not a number: {value}"))),
        }
    }
}

/// A normalized TTL: bounded, non-negative whole seconds. This is the only TTL
/// shape backends accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TtlSecs(u64);

impl TtlSecs {
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    pub const fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl fmt::Display for TtlSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
