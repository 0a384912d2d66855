//! Configuration parsing and validation for the correlating handler.

use eyre::{Result, WrapErr, ensure};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

/// Behavioural settings of a [CorrelatingHandler](crate::CorrelatingHandler).
///
/// Strategies and channels are wired in code through the handler
/// builder. This struct only carries the scalar knobs, so that they
/// can live in a YAML file:
///
/// ```yaml
/// timeout: 30s
/// send_timeout: 500ms
/// send_partial_result_on_timeout: true
/// release_partial_sequences: false
/// store_capacity: 10000
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerConfig {
    /// Age after which a group is forcibly completed. None or zero
    /// disables forced completion by the reaper.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Budget for sends to a full destination. None waits as long as
    /// needed.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Option<Duration>,

    /// Send what a forcibly completed group holds to the output
    /// channel instead of the discard channel.
    pub send_partial_result_on_timeout: bool,

    /// Let the resequencer emit contiguous runs before the whole
    /// sequence has arrived.
    pub release_partial_sequences: bool,

    /// Treat a sequenced message joining an unsequenced group, or the
    /// opposite, as a sequence size conflict.
    pub strict_sequence_size: bool,

    /// Keep a completed marker for groups released before their whole
    /// sequence arrived, so that stragglers are discarded.
    pub discard_late_arrivals: bool,

    /// Maximum number of messages buffered across all groups.
    pub store_capacity: Option<usize>,

    /// Interval of the reaper's full sweep over the store. Defaults to
    /// the timeout.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
}

impl HandlerConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: HandlerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.store_capacity != Some(0),
            "store_capacity must be greater than zero"
        );

        ensure!(
            self.sweep_interval.is_none_or(|interval| !interval.is_zero()),
            "sweep_interval must be greater than zero"
        );

        Ok(())
    }

    /// The effective group timeout. A zero timeout counts as disabled.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.filter(|timeout| !timeout.is_zero())
    }

    /// The effective sweep interval of the reaper.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval.or(self.timeout())
    }

    /// Create config for resequencing without timeouts.
    pub fn resequencing(release_partial_sequences: bool) -> Self {
        Self {
            release_partial_sequences,
            ..Self::default()
        }
    }

    /// Create config that flushes incomplete groups to the output
    /// channel once they are older than `timeout`.
    pub fn partial_on_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            send_partial_result_on_timeout: true,
            ..Self::default()
        }
    }

    /// Set the group timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = Some(send_timeout);
        self
    }

    pub fn with_store_capacity(mut self, capacity: usize) -> Self {
        self.store_capacity = Some(capacity);
        self
    }

    pub fn with_discard_late_arrivals(mut self, enabled: bool) -> Self {
        self.discard_late_arrivals = enabled;
        self
    }

    pub fn with_strict_sequence_size(mut self, enabled: bool) -> Self {
        self.strict_sequence_size = enabled;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }
}
