use shared::config::DataServerConfig;
use shared::{Ttl, TtlSecs};

/// Turns a requested [`Ttl`] into the bounded seconds a backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    default: TtlSecs,
    ceiling: TtlSecs,
}

impl TtlPolicy {
    /// `default` is resolved once against the ceiling. A default of
    /// `Ttl::Default` or zero seconds has nothing to fall back to and uses
    /// [`DataServerConfig::DEFAULT_TTL_SECS`].
    pub fn new(default: Ttl, ceiling_secs: u64) -> Self {
        let ceiling = TtlSecs::new(ceiling_secs);
        let default = match default {
            Ttl::Default | Ttl::Seconds(0) => {
                DataServerConfig::DEFAULT_TTL_SECS.min(ceiling_secs)
            }
            Ttl::Unlimited => ceiling_secs,
            Ttl::Seconds(secs) => secs.min(ceiling_secs),
        };

        Self {
            default: TtlSecs::new(default),
            ceiling,
        }
    }

    pub fn from_config(config: &DataServerConfig) -> Self {
        Self::new(config.ttl, config.max_ttl)
    }

    pub fn normalize(&self, ttl: Ttl) -> TtlSecs {
        match ttl {
            Ttl::Default | Ttl::Seconds(0) => self.default,
            Ttl::Unlimited => self.ceiling,
            Ttl::Seconds(secs) => TtlSecs::new(secs.min(self.ceiling.as_secs())),
        }
    }

    pub fn default_ttl(&self) -> TtlSecs {
        self.default
    }

    pub fn ceiling(&self) -> TtlSecs {
        self.ceiling
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&DataServerConfig::default())
    }
}
