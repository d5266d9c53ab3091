//! Typed configuration for the debugger orchestration core: debugger
//! executable location, session registry limits, result cache policy, and
//! batching policy.

mod batching;
mod cache;
mod process;
mod registry;
mod validate;

pub use batching::BatchingConfiguration;
pub use cache::CacheConfiguration;
pub use process::ProcessConfig;
pub use registry::RegistryConfig;
pub use validate::{ConfigError, validate};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, loaded from a TOML file and/or environment
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdbgConfig {
    pub process: ProcessConfig,
    pub registry: RegistryConfig,
    pub cache: CacheConfiguration,
    pub batching: BatchingConfiguration,
    /// Default per-command deadline.
    #[serde(with = "duration_ms")]
    pub command_timeout: Duration,
}

impl Default for CdbgConfig {
    fn default() -> Self {
        Self {
            process: ProcessConfig::default(),
            registry: RegistryConfig::default(),
            cache: CacheConfiguration::default(),
            batching: BatchingConfiguration::default(),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl CdbgConfig {
    /// Load from a TOML file, then apply environment overrides, then
    /// validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        let mut config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        validate::validate(&config)?;
        Ok(config)
    }

    /// Overrides read from the process environment: the debugger path can
    /// be redirected without touching the config file; the inbound port is
    /// consumed by the outer transport and never seen here.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CDBG_DEBUGGER_PATH") {
            self.process.executable_override = Some(path.into());
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            executable_override: None,
            startup_delay: Duration::from_millis(500),
            quit_grace_period: Duration::from_secs(3),
            cancel_in_flight_on_close: false,
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
