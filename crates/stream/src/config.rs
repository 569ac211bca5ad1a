use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// What to do with a missing chunk whose store read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFailurePolicy {
    /// Leave the chunk missing and try the read again next cycle.
    #[default]
    Retry,
    /// Generate fresh state anyway. Any persisted state for the chunk is
    /// shadowed; the stored record is overwritten once the regenerated chunk
    /// is modified and saved.
    Regenerate,
}

/// Streaming configuration: cycle period, per-operation store timeout and
/// failure policy.
///
/// Deserializes from YAML with durations in milliseconds:
/// ```yaml
/// cycle_period_ms: 500
/// store_timeout_ms: 5000
/// max_in_flight: 32
/// read_failure_policy: retry
/// flush_on_stop: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay between the end of one cycle and the start of the next.
    #[serde(rename = "cycle_period_ms", with = "duration_ms")]
    pub cycle_period: Duration,
    /// Upper bound on any single store get or put.
    #[serde(rename = "store_timeout_ms", with = "duration_ms")]
    pub store_timeout: Duration,
    /// Maximum store operations outstanding at once within a phase.
    pub max_in_flight: usize,
    /// Handling of store read errors and timeouts.
    pub read_failure_policy: ReadFailurePolicy,
    /// Persist every dirty chunk once more when the coordinator stops.
    pub flush_on_stop: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cycle_period: Duration::from_millis(500),
            store_timeout: Duration::from_secs(5),
            max_in_flight: 32,
            read_failure_policy: ReadFailurePolicy::Retry,
            flush_on_stop: true,
        }
    }
}

impl StreamConfig {
    /// Parse and validate a YAML document. Missing fields take defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StreamError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| StreamError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.cycle_period.is_zero() {
            return Err(StreamError::InvalidConfig(
                "cycle_period must be positive".into(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(StreamError::InvalidConfig(
                "store_timeout must be positive".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(StreamError::InvalidConfig(
                "max_in_flight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
