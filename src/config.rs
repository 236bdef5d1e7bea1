//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_TTL;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Request cache configuration
    pub cache: CacheConfig,
    /// HTTP probe configuration
    pub probe: ProbeConfig,
}

/// Request cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Interval of the background expiry sweep (disabled when absent)
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            sweep_interval: None,
        }
    }
}

/// Settings for the `probe` command's HTTP fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// User-Agent header sent with each request
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("fetch-cache-probe/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `FETCH_CACHE_` prefix with `__` between
    /// levels, e.g. `FETCH_CACHE_CACHE__DEFAULT_TTL=30s`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is missing, cannot be parsed,
    /// or holds invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("FETCH_CACHE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Reject values the runtime cannot honour
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero sweep interval or probe timeout.
    pub fn validate(&self) -> Result<()> {
        if self.cache.sweep_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::Config(
                "cache.sweep_interval must be greater than zero".to_string(),
            ));
        }
        if self.probe.timeout.is_zero() {
            return Err(Error::Config(
                "probe.timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Durations arrive as strings from YAML and as integers from env vars.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }

    pub(crate) fn format_duration(duration: Duration) -> String {
        if duration.subsec_nanos() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    /// Parse "100ms", "30s", "5m", "1h", or bare seconds
    pub(crate) fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m.saturating_mul(60)))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h.saturating_mul(3600)))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }

    /// Same format for `Option<Duration>`
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        #[allow(clippy::ref_option)]
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&super::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration; `null` means absent
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the value cannot be parsed as a duration.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<super::Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(super::Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
                Some(super::Raw::Text(s)) => super::parse_duration(&s)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}
