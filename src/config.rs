//! Runner configuration, loadable from YAML.
//!
//! ```yaml
//! name: inspection
//! tick_period: 0.1
//! restart_on_play: false
//! default_timeout: 30
//! retry:
//!   start: { max_attempts: 3 }
//!   poll: { max_attempts: 5 }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MissionError;

/// Bounds how often one kind of remote request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

/// Retry behavior per remote request kind.
///
/// Session establishment is tried once per node activation and its failure
/// fails the node. Cancellation is best-effort and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    /// Issuing a request. A request that outlives its timeout is cancelled
    /// and counts as a failed attempt.
    pub start: RetryPolicy,
    /// Consecutive transport failures tolerated while polling a request.
    pub poll: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            start: RetryPolicy::attempts(3),
            poll: RetryPolicy::attempts(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub name: String,
    /// Interval between ticks in [`crate::MissionRunner::run`].
    #[serde(with = "seconds_serde")]
    pub tick_period: Duration,
    /// Discard run state and start from the top on every `play`.
    pub restart_on_play: bool,
    /// Node failure reports kept for feedback; older ones are dropped.
    pub max_reports: usize,
    /// Applied to remote nodes that set no `timeout` of their own.
    #[serde(with = "optional_seconds_serde")]
    pub default_timeout: Option<Duration>,
    pub retry: RetryPolicies,
    /// Owner name presented when acquiring leases.
    pub lease_owner: String,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            name: "mission".to_owned(),
            tick_period: Duration::from_millis(100),
            restart_on_play: false,
            max_reports: 32,
            default_timeout: None,
            retry: RetryPolicies::default(),
            lease_owner: "mission-runner".to_owned(),
        }
    }
}

impl MissionConfig {
    pub fn from_yaml(source: &str) -> Result<Self, MissionError> {
        let config: Self =
            serde_yaml::from_str(source).map_err(|e| MissionError::Config(e.to_string()))?;
        if config.tick_period.is_zero() {
            return Err(MissionError::Config(
                "tick_period must be positive".to_owned(),
            ));
        }
        Ok(config)
    }
}

/// Durations as fractional seconds.
mod seconds_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

mod optional_seconds_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(opt: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match opt {
            Some(duration) => duration.as_secs_f64().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|seconds| Duration::try_from_secs_f64(seconds).map_err(D::Error::custom))
            .transpose()
    }
}
