//! Serializable runtime knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_KEEP_SUBSCRIBED: Duration = Duration::from_millis(1000);
const DEFAULT_RETRY: Duration = Duration::from_millis(60_000);

/// Timer configuration of an inflow.
///
/// Deserializable (humantime durations, e.g. `"1s"`, `"2min"`) so the
/// knobs can live in application config files:
///
/// ```
/// # use inflow::InflowSettings;
/// let settings: InflowSettings =
///     serde_json::from_str(r#"{ "keep_subscribed_timeout": "0s", "retry_time": "30s" }"#).unwrap();
/// assert_eq!(settings.retry_time.as_secs(), 30);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflowSettings {
    /// Quiet period the shared cache stream stays subscribed to its
    /// upstream after the last observer is gone. Default `1s`.
    #[serde(with = "humantime_serde", default = "default_keep_subscribed")]
    pub keep_subscribed_timeout: Duration,

    /// Delay before a failed load is retried by the scheduler. Must be
    /// positive; `Duration::MAX` disables retries. Default `60s`.
    #[serde(with = "humantime_serde", default = "default_retry")]
    pub retry_time: Duration,
}

fn default_keep_subscribed() -> Duration {
    DEFAULT_KEEP_SUBSCRIBED
}

fn default_retry() -> Duration {
    DEFAULT_RETRY
}

impl Default for InflowSettings {
    fn default() -> Self {
        InflowSettings {
            keep_subscribed_timeout: DEFAULT_KEEP_SUBSCRIBED,
            retry_time: DEFAULT_RETRY,
        }
    }
}

impl InflowSettings {
    /// Checks the numeric ranges.
    ///
    /// # Panics
    ///
    /// Panics if `retry_time` is zero.
    pub fn validate(&self) {
        assert!(self.retry_time > Duration::ZERO, "retry time must be positive");
    }
}
