//! Engine configuration.
//!
//! Defaults carry the constants of the surveyed research systems
//! (threshold 65, two reflection iterations, five sub-queries, six search
//! results, 0.7 contradiction confidence). All are tunable policy, not
//! law — override any of them via `ARGOS_*` environment variables or by
//! constructing [`Config`] directly.

use crate::collaborators::RetryPolicy;
use crate::pipeline::gate::QualityWeights;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Max reflection-loop iterations.
    pub max_iterations: u32,
    /// Minimum quality score (0-100) to accept a report.
    pub quality_threshold: f64,
    /// Max sub-queries the decomposer may produce per pass.
    pub max_sub_queries: usize,
    /// Search results requested per sub-query.
    pub max_search_results: usize,
    /// Contradiction detection confidence cutoff (0-1).
    pub contradiction_confidence: f64,
    /// Per-collaborator-call deadline, seconds.
    pub request_timeout_secs: u64,
    /// Whole-job deadline, seconds.
    pub job_timeout_secs: u64,
    /// Retry attempts for transient collaborator failures.
    pub retry_max_attempts: u32,
    /// Base backoff delay, milliseconds.
    pub retry_base_delay_ms: u64,
    /// Backoff multiplier per attempt.
    pub retry_multiplier: f64,
    /// Jitter upper bound, milliseconds.
    pub retry_jitter_ms: u64,
    /// Quality sub-score caps.
    #[serde(default)]
    pub weights: QualityWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            quality_threshold: 65.0,
            max_sub_queries: 5,
            max_search_results: 6,
            contradiction_confidence: 0.7,
            request_timeout_secs: 90,
            job_timeout_secs: 600,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_multiplier: 2.0,
            retry_jitter_ms: 250,
            weights: QualityWeights::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
            env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        Config {
            max_iterations: var_or("ARGOS_MAX_ITERATIONS", defaults.max_iterations),
            quality_threshold: var_or("ARGOS_QUALITY_THRESHOLD", defaults.quality_threshold),
            max_sub_queries: var_or("ARGOS_MAX_SUB_QUERIES", defaults.max_sub_queries),
            max_search_results: var_or("ARGOS_MAX_SEARCH_RESULTS", defaults.max_search_results),
            contradiction_confidence: var_or(
                "ARGOS_CONTRADICTION_CONFIDENCE",
                defaults.contradiction_confidence,
            ),
            request_timeout_secs: var_or(
                "ARGOS_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            job_timeout_secs: var_or("ARGOS_JOB_TIMEOUT_SECS", defaults.job_timeout_secs),
            retry_max_attempts: var_or("ARGOS_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay_ms: var_or(
                "ARGOS_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            ),
            retry_multiplier: var_or("ARGOS_RETRY_MULTIPLIER", defaults.retry_multiplier),
            retry_jitter_ms: var_or("ARGOS_RETRY_JITTER_MS", defaults.retry_jitter_ms),
            weights: defaults.weights,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
            jitter: Duration::from_millis(self.retry_jitter_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}
