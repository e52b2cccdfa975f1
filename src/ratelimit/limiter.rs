//! Core rate limiter implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::deferred::{Deferred, RateLimitContext};
use super::evaluation::Evaluation;
use super::rule::RateLimit;
use crate::error::{QuotaError, Result};
use crate::store::{CounterStore, StoreRegistry};

/// Sliding-window-log rate limiter.
///
/// Holds no per-key state of its own: each evaluation resolves the key,
/// limit and store, asks the store for the current count, and records the
/// event only if the count is under the limit.
///
/// The count and the record are two separate store calls. Concurrent
/// evaluations of the same key can all read a count below the limit before
/// any of them records, so the stored count may overshoot the limit by up to
/// the number of racing callers minus one.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    registry: Arc<StoreRegistry>,
}

impl RateLimiter {
    pub fn new(registry: Arc<StoreRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Evaluate one event against a limit.
    ///
    /// A spent quota is not an error here: the returned evaluation has
    /// `allowed == false`. Errors are reserved for invalid arguments and
    /// unusable stores, and are raised before any store access.
    pub async fn evaluate<C>(
        &self,
        context: &C,
        key: Option<&Deferred<String, C>>,
        limit: &Deferred<u64, C>,
        period: u64,
        store: Option<&str>,
    ) -> Result<Evaluation>
    where
        C: RateLimitContext + ?Sized,
    {
        let limit = limit.resolve(context);
        if limit == 0 {
            return Err(QuotaError::InvalidArgument(
                "Limit must evaluate to a positive integer, got: 0".to_string(),
            ));
        }
        if period == 0 {
            return Err(QuotaError::InvalidArgument(
                "Period must be positive, got: 0".to_string(),
            ));
        }

        let store = match store {
            Some(name) => self.registry.resolve_named(name)?,
            None => self.registry.resolve_default()?,
        };

        let key = match key {
            Some(key) => key.resolve(context),
            None => context.default_key(),
        };
        if key.is_empty() {
            return Err(QuotaError::InvalidArgument("key must not be empty".to_string()));
        }

        Ok(self.evaluate_key(store.as_ref(), &key, limit, period).await)
    }

    /// Evaluate one event against a declared rule.
    pub async fn check<C>(&self, context: &C, rule: &RateLimit<C>) -> Result<Evaluation>
    where
        C: RateLimitContext + ?Sized,
    {
        self.evaluate(
            context,
            rule.key.as_ref(),
            &rule.limit,
            rule.period,
            rule.store.as_deref(),
        )
        .await
    }

    /// Like [`check`](Self::check), but a spent quota is returned as
    /// [`QuotaError::RateLimitExceeded`] carrying the rejection's quota metadata.
    pub async fn perform<C>(&self, context: &C, rule: &RateLimit<C>) -> Result<Evaluation>
    where
        C: RateLimitContext + ?Sized,
    {
        let evaluation = self.check(context, rule).await?;
        if evaluation.allowed {
            Ok(evaluation)
        } else {
            Err(QuotaError::RateLimitExceeded(Box::new(evaluation)))
        }
    }

    async fn evaluate_key(
        &self,
        store: &dyn CounterStore,
        key: &str,
        limit: u64,
        period: u64,
    ) -> Evaluation {
        trace!(
            key = %key,
            limit,
            period,
            store = %store.kind(),
            "Checking rate limit"
        );

        let current = store.count(key, period).await;
        let reset_at = reset_time(self.registry.clock().now(), period);

        if current >= limit {
            debug!(
                key = %key,
                count = current,
                limit,
                "Rate limit exceeded"
            );
            self.registry.monitor().log_exceeded(key, limit, period);
            return Evaluation {
                allowed: false,
                limit,
                count: current,
                remaining: 0,
                period,
                reset_at,
            };
        }

        let count = store.record(key, period).await;
        Evaluation {
            allowed: true,
            limit,
            count,
            remaining: limit.saturating_sub(count),
            period,
            reset_at,
        }
    }
}

/// `now + period` as a UTC timestamp, saturating at the latest representable instant.
fn reset_time(now: f64, period: u64) -> DateTime<Utc> {
    let reset = now + period as f64;
    DateTime::from_timestamp(reset.trunc() as i64, (reset.fract() * 1e9) as u32)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
