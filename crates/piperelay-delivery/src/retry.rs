//! Retry policy: maps attempt counts onto a configured delay schedule.
//!
//! An attempt is successful iff it was a transport success with a 2xx
//! status; everything else (3xx, 4xx, 5xx, transport error) is a
//! failure that consumes retry budget. Delays come from an ordered
//! schedule table rather than a computed backoff curve, so operators
//! can read the exact retry times off the configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::sender::SendOutcome;

/// Retry configuration for the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (must be ≥ 1).
    pub max_attempts: u32,

    /// Delay before attempt N+1, indexed by N-1. Non-decreasing.
    ///
    /// A delivery whose attempt count runs off the end of the schedule
    /// is failed even if `max_attempts` has not been reached, so
    /// `max_attempts` is effectively capped at `schedule.len() + 1`.
    pub schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 8, schedule: default_retry_schedule() }
    }
}

/// The stock schedule: 30s, 2m, 10m, 30m, 2h, 8h, 24h.
pub fn default_retry_schedule() -> Vec<Duration> {
    vec![
        Duration::from_secs(30),
        Duration::from_secs(2 * 60),
        Duration::from_secs(10 * 60),
        Duration::from_secs(30 * 60),
        Duration::from_secs(2 * 60 * 60),
        Duration::from_secs(8 * 60 * 60),
        Duration::from_secs(24 * 60 * 60),
    ]
}

/// Classification of a just-executed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// 2xx received; the delivery is terminally successful.
    Success,
    /// Failed with budget remaining; retry at the given time.
    Retry {
        /// When the next attempt becomes due.
        next_retry_at: DateTime<Utc>,
    },
    /// Budget or schedule exhausted; the delivery is terminally failed.
    Fail,
}

impl RetryPolicy {
    /// Whether an outcome counts as a successful delivery.
    pub fn is_success(outcome: &SendOutcome) -> bool {
        outcome.error.is_empty() && (200..300).contains(&outcome.status_code)
    }

    /// Decides the delivery's next state after an attempt.
    ///
    /// `attempt_count` is the 1-indexed number of the attempt that just
    /// ran.
    pub fn decide(
        &self,
        attempt_count: u32,
        outcome: &SendOutcome,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if Self::is_success(outcome) {
            return RetryDecision::Success;
        }

        if attempt_count >= self.max_attempts {
            return RetryDecision::Fail;
        }

        let Some(delay) = self.delay_after(attempt_count) else {
            return RetryDecision::Fail;
        };
        let Ok(delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::Fail;
        };

        RetryDecision::Retry { next_retry_at: now + delay }
    }

    /// The delay between attempt `attempt_count` and the next one, or
    /// None when the schedule is exhausted.
    pub fn delay_after(&self, attempt_count: u32) -> Option<Duration> {
        let index = usize::try_from(attempt_count.checked_sub(1)?).ok()?;
        self.schedule.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status_code: u16, error: &str) -> SendOutcome {
        SendOutcome {
            status_code,
            response_body: String::new(),
            latency_ms: 5,
            error: error.to_string(),
        }
    }

    #[test]
    fn two_hundreds_are_success() {
        for status in [200, 201, 204, 299] {
            assert!(RetryPolicy::is_success(&outcome(status, "")));
        }
    }

    #[test]
    fn non_two_hundreds_and_transport_errors_fail() {
        for status in [199, 301, 400, 404, 429, 500, 503] {
            assert!(!RetryPolicy::is_success(&outcome(status, "")));
        }
        assert!(!RetryPolicy::is_success(&outcome(0, "connection refused")));
        // A transport error with a phantom 2xx code still fails.
        assert!(!RetryPolicy::is_success(&outcome(200, "read aborted")));
    }

    #[test]
    fn schedule_progression_matches_table() {
        let policy = RetryPolicy {
            max_attempts: 4,
            schedule: vec![
                Duration::from_secs(30),
                Duration::from_secs(120),
                Duration::from_secs(600),
            ],
        };
        let now = Utc::now();

        for (attempt, expected_secs) in [(1, 30), (2, 120), (3, 600)] {
            match policy.decide(attempt, &outcome(500, ""), now) {
                RetryDecision::Retry { next_retry_at } => {
                    assert_eq!(next_retry_at, now + chrono::Duration::seconds(expected_secs));
                },
                other => panic!("attempt {attempt}: expected retry, got {other:?}"),
            }
        }

        assert_eq!(policy.decide(4, &outcome(500, ""), now), RetryDecision::Fail);
    }

    #[test]
    fn success_short_circuits_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(8, &outcome(204, ""), Utc::now()), RetryDecision::Success);
    }

    #[test]
    fn schedule_exhaustion_fails_before_max_attempts() {
        // max_attempts larger than schedule.len() + 1 is clamped by the
        // schedule running dry.
        let policy = RetryPolicy { max_attempts: 10, schedule: vec![Duration::from_secs(1)] };

        assert!(matches!(
            policy.decide(1, &outcome(500, ""), Utc::now()),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(2, &outcome(500, ""), Utc::now()), RetryDecision::Fail);
    }

    #[test]
    fn empty_schedule_with_single_attempt_is_legal() {
        let policy = RetryPolicy { max_attempts: 1, schedule: Vec::new() };

        assert_eq!(policy.decide(1, &outcome(500, ""), Utc::now()), RetryDecision::Fail);
        assert_eq!(policy.decide(1, &outcome(200, ""), Utc::now()), RetryDecision::Success);
    }

    #[test]
    fn default_policy_matches_stock_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(policy.schedule.len(), 7);
        assert_eq!(policy.schedule[0], Duration::from_secs(30));
        assert_eq!(policy.schedule[6], Duration::from_secs(86_400));
    }
}
