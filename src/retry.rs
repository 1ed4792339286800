//! Retry policy for transient failures

use std::collections::BTreeSet;
use std::time::Duration;

use http::Method;
use serde::Deserialize;

/// How the wait between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetryStrategy {
    /// Wait `retry_interval` before every retry
    Linear,
    /// Wait `scale * base^n` seconds before retry `n`
    #[default]
    Exponential,
}

/// Bounded retry configuration for one client or request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Backoff strategy
    #[serde(rename = "type")]
    pub strategy: RetryStrategy,
    /// Maximum number of retries after the first attempt
    pub retry_limit: u32,
    /// Linear wait between attempts, in milliseconds
    pub retry_interval: u64,
    /// Base of the exponential backoff
    pub exponential_backoff_base: u32,
    /// Scale of the exponential backoff, in seconds
    pub exponential_backoff_scale: f64,
    /// Response statuses that trigger a retry
    pub status_codes: BTreeSet<u16>,
    /// Methods that may be retried (upper case)
    pub retry_methods: BTreeSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            retry_limit: 2,
            retry_interval: 2000,
            exponential_backoff_base: 2,
            exponential_backoff_scale: 0.5,
            status_codes: [408, 500, 502, 503, 504].into_iter().collect(),
            retry_methods: ["GET", "POST", "PUT", "PATCH", "DELETE"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0 for the first retry)
    pub fn delay(&self, retry: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Linear => Duration::from_millis(self.retry_interval),
            RetryStrategy::Exponential => {
                let factor = f64::from(self.exponential_backoff_base).powi(retry.min(16) as i32);
                Duration::try_from_secs_f64(self.exponential_backoff_scale * factor)
                    .unwrap_or(Duration::ZERO)
            }
        }
    }

    /// Whether requests with `method` participate in retries
    pub fn allows_method(&self, method: &Method) -> bool {
        self.retry_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    /// Whether a response with `status` should be retried
    pub fn retries_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy {
            strategy: RetryStrategy::Linear,
            retry_interval: 250,
            ..Default::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(5), Duration::from_millis(250));
    }

    #[test]
    fn test_negative_scale_means_no_wait() {
        let policy = RetryPolicy {
            exponential_backoff_scale: -1.0,
            ..Default::default()
        };
        assert_eq!(policy.delay(3), Duration::ZERO);
    }

    #[test]
    fn test_method_and_status_filters() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_method(&Method::GET));
        assert!(!policy.allows_method(&Method::HEAD));
        assert!(policy.retries_status(503));
        assert!(!policy.retries_status(404));
    }

    #[test]
    fn test_deserialize_partial_policy() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "type": "linear",
            "retryLimit": 5,
            "retryMethods": ["get", "head"]
        }))
        .expect("policy");

        assert_eq!(policy.strategy, RetryStrategy::Linear);
        assert_eq!(policy.retry_limit, 5);
        assert!(policy.allows_method(&Method::HEAD));
        assert!(!policy.allows_method(&Method::POST));
        assert!(policy.retries_status(500));
    }
}
