//! Session registry limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_concurrent_sessions: usize,
    #[serde(rename = "cleanup_interval_secs")]
    pub cleanup_interval: DurationSecs,
    #[serde(rename = "session_timeout_minutes")]
    pub session_timeout_minutes: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 8,
            cleanup_interval: DurationSecs(Duration::from_secs(60)),
            session_timeout_minutes: 30,
        }
    }
}

impl RegistryConfig {
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval.0
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes * 60)
    }
}

/// Newtype so `cleanup_interval_secs` serializes as a plain integer while
/// the Rust side works with [`Duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSecs(Duration);

impl serde::Serialize for DurationSecs {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(self.0.as_secs())
    }
}

impl<'de> serde::Deserialize<'de> for DurationSecs {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Self(Duration::from_secs(secs)))
    }
}
