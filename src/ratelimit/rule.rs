//! Declared rate limit rules.
//!
//! A rule is checked once when it is declared, so obviously bad values fail
//! at startup. Computed limits can only be checked when they are evaluated.

use std::fmt;

use super::deferred::Deferred;
use crate::error::{QuotaError, Result};
use crate::store::StoreKind;

/// A limit of `limit` events per `period` seconds for a key.
pub struct RateLimit<C: ?Sized> {
    /// Explicit key; `None` uses the context's default key
    pub key: Option<Deferred<String, C>>,
    pub limit: Deferred<u64, C>,
    /// Window length in seconds
    pub period: u64,
    /// Backend name; `None` uses the registry default
    pub store: Option<String>,
}

impl<C: ?Sized> RateLimit<C> {
    pub fn new(limit: u64, period: u64) -> Self {
        Self::with_limit(Deferred::Value(limit), period)
    }

    /// A rule whose limit is computed from the context on every evaluation.
    pub fn computed<F>(limit: F, period: u64) -> Self
    where
        F: Fn(&C) -> u64 + Send + Sync + 'static,
    {
        Self::with_limit(Deferred::eval(limit), period)
    }

    pub fn with_limit(limit: Deferred<u64, C>, period: u64) -> Self {
        Self {
            key: None,
            limit,
            period,
            store: None,
        }
    }

    /// Limit under an explicit key.
    pub fn by(mut self, key: impl Into<Deferred<String, C>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Limit under a key computed from the context.
    pub fn by_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&C) -> String + Send + Sync + 'static,
    {
        self.key = Some(Deferred::eval(f));
        self
    }

    /// Count events in the named backend.
    pub fn store(mut self, name: impl Into<String>) -> Self {
        self.store = Some(name.into());
        self
    }

    /// Reject values that are wrong regardless of context.
    pub fn validate(&self) -> Result<()> {
        if let Some(&0) = self.limit.literal() {
            return Err(QuotaError::InvalidArgument("limit must be positive".to_string()));
        }
        if self.period == 0 {
            return Err(QuotaError::InvalidArgument(
                "period must be a positive integer (seconds)".to_string(),
            ));
        }
        if let Some(name) = &self.store {
            name.parse::<StoreKind>()?;
        }
        Ok(())
    }

    /// Build and validate in one step.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

impl<C: ?Sized> Clone for RateLimit<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            limit: self.limit.clone(),
            period: self.period,
            store: self.store.clone(),
        }
    }
}

impl<C: ?Sized> fmt::Debug for RateLimit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit")
            .field("key", &self.key)
            .field("limit", &self.limit)
            .field("period", &self.period)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RequestContext;

    type Rule = RateLimit<RequestContext>;

    #[test]
    fn test_valid_rule() {
        let rule = Rule::new(5, 60).by("api").store("memory").validated().unwrap();

        assert_eq!(rule.period, 60);
        assert_eq!(rule.store.as_deref(), Some("memory"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = Rule::new(0, 60).validate().unwrap_err();
        assert!(matches!(err, QuotaError::InvalidArgument(_)));
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = Rule::new(5, 0).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: period must be a positive integer (seconds)"
        );
    }

    #[test]
    fn test_unknown_store_rejected() {
        let err = Rule::new(5, 60).store("mongo").validate().unwrap_err();
        assert!(matches!(err, QuotaError::Store(_)));
    }

    #[test]
    fn test_computed_limit_deferred_to_evaluation() {
        let rule = Rule::computed(|_| 0, 60);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_key_from_context() {
        let rule = Rule::new(5, 60).by_fn(|ctx| format!("user:{}", ctx.client));
        let ctx = RequestContext::new("ReportsController", "42");

        assert_eq!(rule.key.unwrap().resolve(&ctx), "user:42");
    }
}
