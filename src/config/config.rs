use super::LogLevel;
use crate::Result;
use crate::enrichment::{FreshnessPolicy, HookOptions, RateLimiter, RateLimiterSet, ResourceName, SourceName};
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use humantime_serde::Serde;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use strum::IntoEnumIterator;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// File looked up in the base directory when no explicit configuration path is given
const CONFIG_FILE_NAME: &str = "enrich.toml";

/// Token bucket settings for one external resource
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub rate_per_second: f64,

    /// Maximum number of tokens the bucket holds
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Diagnostic output level
    #[serde(default)]
    pub log_level: LogLevel,

    /// How long a published outcome is served from the cache
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Maximum number of cached outcomes
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Ceiling on how long a caller waits for another call enriching the same key
    #[serde(default = "default_follower_wait", with = "humantime_serde")]
    pub follower_wait: Duration,

    /// How long to wait for each rate-limited resource's token
    #[serde(default = "default_rate_limit_timeout", with = "humantime_serde")]
    pub rate_limit_timeout: Duration,

    /// How long the timestamp store may take to answer before every source is treated as stale
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_timeout: Duration,

    /// Optional bound on collector execution within one call
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub collection_deadline: Option<Duration>,

    /// Number of derived-computation worker tasks
    #[serde(default = "default_hook_workers")]
    pub hook_workers: usize,

    /// Jobs that may wait for a hook worker before new ones are dropped
    #[serde(default = "default_hook_queue_capacity")]
    pub hook_queue_capacity: usize,

    /// Retries of a failed derived computation
    #[serde(default = "default_hook_max_retries")]
    pub hook_max_retries: u32,

    /// Delay between derived-computation retries
    #[serde(default = "default_hook_retry_delay", with = "humantime_serde")]
    pub hook_retry_delay: Duration,

    /// Maximum data age per source
    #[serde(default = "default_freshness")]
    pub freshness: BTreeMap<SourceName, Serde<Duration>>,

    /// Token bucket settings per external resource
    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<ResourceName, RateLimitConfig>,
}

const fn default_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

const fn default_cache_capacity() -> usize {
    100
}

const fn default_follower_wait() -> Duration {
    Duration::from_secs(300)
}

const fn default_rate_limit_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_store_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_hook_workers() -> usize {
    2
}

const fn default_hook_queue_capacity() -> usize {
    64
}

const fn default_hook_max_retries() -> u32 {
    1
}

const fn default_hook_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_freshness() -> BTreeMap<SourceName, Serde<Duration>> {
    SourceName::iter().map(|source| (source, Serde::from(source.default_max_age()))).collect()
}

fn default_rate_limits() -> BTreeMap<ResourceName, RateLimitConfig> {
    ResourceName::iter()
        .map(|resource| {
            let (rate_per_second, burst_capacity) = resource.default_limits();
            (
                resource,
                RateLimitConfig {
                    rate_per_second,
                    burst_capacity,
                },
            )
        })
        .collect()
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Without an explicit path, `enrich.toml` in `base_dir` is used if it exists.
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8Path>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.to_path_buf(), text)
        } else {
            let path = base_dir.join(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // No config file found, use defaults
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).into_app_err("parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Save the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl.is_zero() {
            return Err(app_err!("cache_ttl must be greater than zero"));
        }

        if self.cache_capacity == 0 {
            return Err(app_err!("cache_capacity must be at least 1"));
        }

        if self.follower_wait.is_zero() {
            return Err(app_err!("follower_wait must be greater than zero"));
        }

        if self.store_timeout.is_zero() {
            return Err(app_err!("store_timeout must be greater than zero"));
        }

        if self.collection_deadline.is_some_and(|deadline| deadline.is_zero()) {
            return Err(app_err!("collection_deadline must be greater than zero when set"));
        }

        if self.hook_workers == 0 {
            return Err(app_err!("hook_workers must be at least 1"));
        }

        if self.hook_queue_capacity == 0 {
            return Err(app_err!("hook_queue_capacity must be at least 1"));
        }

        for (resource, limits) in &self.rate_limits {
            if !limits.rate_per_second.is_finite() || limits.rate_per_second <= 0.0 {
                return Err(app_err!(
                    "rate_limits.{resource}.rate_per_second must be a positive number, got {}",
                    limits.rate_per_second
                ));
            }

            if limits.burst_capacity == 0 {
                return Err(app_err!("rate_limits.{resource}.burst_capacity must be at least 1"));
            }
        }

        Ok(())
    }

    /// The configured maximum data age per source
    #[must_use]
    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(self.freshness.iter().map(|(source, max_age)| (*source, **max_age)))
    }

    /// One independent token bucket per configured resource
    #[must_use]
    pub fn rate_limiters(&self) -> RateLimiterSet {
        RateLimiterSet::new(
            self.rate_limits
                .iter()
                .map(|(resource, limits)| RateLimiter::new(*resource, limits.rate_per_second, limits.burst_capacity)),
        )
    }

    #[must_use]
    pub const fn hook_options(&self) -> HookOptions {
        HookOptions {
            workers: self.hook_workers,
            queue_capacity: self.hook_queue_capacity,
            max_retries: self.hook_max_retries,
            retry_delay: self.hook_retry_delay,
        }
    }

    /// Default location of the configuration file within `base_dir`
    #[must_use]
    pub fn default_path(base_dir: &Utf8Path) -> Utf8PathBuf {
        base_dir.join(CONFIG_FILE_NAME)
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}
