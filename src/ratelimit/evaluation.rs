//! Outcome of one rate limit evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the configured limit.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Header carrying the remaining quota.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Header carrying the reset time as epoch seconds.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Header telling a rejected caller how long to back off, in seconds.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Quota state computed for one call. Never cached across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Whether the call was admitted (and recorded)
    pub allowed: bool,
    /// The resolved limit
    pub limit: u64,
    /// Events in the window: after recording when allowed, before when rejected
    pub count: u64,
    /// `max(limit - count, 0)`
    pub remaining: u64,
    /// Window length in seconds
    pub period: u64,
    /// `now + period`; approximate on rejection, not the oldest event's expiry
    pub reset_at: DateTime<Utc>,
}

impl Evaluation {
    /// Seconds a caller should wait, once the quota is spent.
    pub fn retry_after(&self) -> Option<u64> {
        (self.remaining == 0).then_some(self.period)
    }

    /// Conventional quota headers for this outcome.
    ///
    /// `Retry-After` is present only when no quota remains.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at.timestamp().to_string()),
        ];
        if let Some(retry_after) = self.retry_after() {
            headers.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation(remaining: u64) -> Evaluation {
        Evaluation {
            allowed: remaining > 0,
            limit: 5,
            count: 5 - remaining,
            remaining,
            period: 60,
            reset_at: DateTime::from_timestamp(1_700_000_060, 0).unwrap(),
        }
    }

    #[test]
    fn test_headers_with_quota_left() {
        let headers = evaluation(2).headers();

        assert_eq!(
            headers,
            vec![
                (HEADER_LIMIT, "5".to_string()),
                (HEADER_REMAINING, "2".to_string()),
                (HEADER_RESET, "1700000060".to_string()),
            ]
        );
    }

    #[test]
    fn test_retry_after_once_spent() {
        let eval = evaluation(0);

        assert_eq!(eval.retry_after(), Some(60));
        assert!(eval.headers().contains(&(HEADER_RETRY_AFTER, "60".to_string())));
    }

    #[test]
    fn test_serializes_to_json() {
        let json = serde_json::to_value(evaluation(1)).unwrap();

        assert_eq!(json["allowed"], true);
        assert_eq!(json["remaining"], 1);
        assert_eq!(json["reset_at"], "2023-11-14T22:14:20Z");
    }
}
