//! Configuration surface consumed by the coordinator, and logging setup.

#[expect(clippy::module_inception, reason = "the settings type is named after its module")]
mod config;
mod logging;

pub use config::{Config, DEFAULT_CONFIG_TOML, RateLimitConfig};
pub use logging::{LogLevel, init_logging};
