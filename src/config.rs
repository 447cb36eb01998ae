//! Configuration types for mq-batch

use crate::error::{Error, Result};
use crate::types::SamplingParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batch run configuration
///
/// Controls concurrency, retry budget, progress reporting, and prompt
/// resolution for one batch invocation. All fields have sensible defaults;
/// `BatchConfig::default()` is a working configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of concurrent workers, i.e. the bound on in-flight provider
    /// calls (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Extra jobs submitted ahead of completion to keep workers busy.
    /// Outstanding jobs are bounded by `workers + submit_buffer`
    /// (default: equal to `workers`)
    #[serde(default)]
    pub submit_buffer: Option<usize>,

    /// Per-attempt provider timeout (default: 600 s)
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Additional attempts after a retryable failure (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval between progress lines; zero disables reporting
    /// (default: 10 s)
    #[serde(default = "default_progress_interval", with = "duration_secs")]
    pub progress_interval: Duration,

    /// Extract `<name>value</name>` blocks from responses into `tag:*`
    /// output fields (default: false)
    #[serde(default)]
    pub extract_tags: bool,

    /// Run-wide prefix prepended to every row's prompt before sending
    #[serde(default)]
    pub prompt_prefix: Option<String>,

    /// Run-level system prompt, overriding the registry entry's saved one
    #[serde(default)]
    pub sysprompt: Option<String>,

    /// Run-level sampling overrides, merged over the registry entry's
    /// defaults per field
    #[serde(default)]
    pub sampling: SamplingParams,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            submit_buffer: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            progress_interval: default_progress_interval(),
            extract_tags: false,
            prompt_prefix: None,
            sysprompt: None,
            sampling: SamplingParams::default(),
        }
    }
}

impl BatchConfig {
    /// Effective submission-buffer size: explicit value, or `workers` when
    /// unset so the dispatcher can always read one batch ahead.
    pub fn effective_submit_buffer(&self) -> usize {
        self.submit_buffer.unwrap_or(self.workers)
    }

    /// Validate the configuration, returning a `Config` error naming the
    /// offending key.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config {
                message: "workers must be greater than zero".to_string(),
                key: Some("workers".to_string()),
            });
        }
        if self.timeout.is_zero() {
            return Err(Error::Config {
                message: "per-attempt timeout must be greater than zero".to_string(),
                key: Some("timeout".to_string()),
            });
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    4
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_max_retries() -> u32 {
    3
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(10)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be non-negative"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
