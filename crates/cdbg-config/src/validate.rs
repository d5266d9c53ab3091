//! Config validation: collect every violation before returning, mirroring
//! `csa-config`'s layered validation passes.

use crate::CdbgConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(String, String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid configuration:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

pub fn validate(config: &CdbgConfig) -> Result<(), ConfigError> {
    let mut violations = Vec::new();

    if config.registry.max_concurrent_sessions == 0 {
        violations.push("registry.max_concurrent_sessions must be > 0".to_string());
    }
    if config.registry.session_timeout_minutes == 0 {
        violations.push("registry.session_timeout_minutes must be > 0".to_string());
    }

    if config.cache.max_memory_bytes == 0 {
        violations.push("cache.max_memory_bytes must be > 0".to_string());
    }
    if !(0.0..=1.0).contains(&config.cache.memory_pressure_threshold) {
        violations.push("cache.memory_pressure_threshold must be in 0.0..=1.0".to_string());
    }

    if config.batching.max_batch_size > 0 && config.batching.batch_timeout_multiplier <= 0.0 {
        violations.push("batching.batch_timeout_multiplier must be > 0".to_string());
    }
    if config.batching.max_batch_timeout_ms == 0 {
        violations.push("batching.max_batch_timeout_ms must be > 0".to_string());
    }

    if config.command_timeout.is_zero() {
        violations.push("command_timeout must be > 0".to_string());
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(violations))
    }
}
