//! Literal-or-computed rule values and caller contexts.

use std::fmt;
use std::sync::Arc;

/// A value given up front or computed from the caller's context at evaluation time.
pub enum Deferred<T, C: ?Sized> {
    /// A literal value
    Value(T),
    /// Computed from the context on every evaluation
    Eval(Arc<dyn Fn(&C) -> T + Send + Sync>),
}

impl<T: Clone, C: ?Sized> Deferred<T, C> {
    pub fn eval<F>(f: F) -> Self
    where
        F: Fn(&C) -> T + Send + Sync + 'static,
    {
        Deferred::Eval(Arc::new(f))
    }

    /// Produce the concrete value for `context`.
    pub fn resolve(&self, context: &C) -> T {
        match self {
            Deferred::Value(value) => value.clone(),
            Deferred::Eval(f) => f(context),
        }
    }

    /// The literal value, if this is not computed.
    pub fn literal(&self) -> Option<&T> {
        match self {
            Deferred::Value(value) => Some(value),
            Deferred::Eval(_) => None,
        }
    }
}

impl<T: Clone, C: ?Sized> Clone for Deferred<T, C> {
    fn clone(&self) -> Self {
        match self {
            Deferred::Value(value) => Deferred::Value(value.clone()),
            Deferred::Eval(f) => Deferred::Eval(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug, C: ?Sized> fmt::Debug for Deferred<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Deferred::Eval(_) => f.write_str("Eval(..)"),
        }
    }
}

impl<C: ?Sized> From<u64> for Deferred<u64, C> {
    fn from(value: u64) -> Self {
        Deferred::Value(value)
    }
}

impl<C: ?Sized> From<&str> for Deferred<String, C> {
    fn from(value: &str) -> Self {
        Deferred::Value(value.to_string())
    }
}

impl<C: ?Sized> From<String> for Deferred<String, C> {
    fn from(value: String) -> Self {
        Deferred::Value(value)
    }
}

/// Caller state a rule is evaluated against.
pub trait RateLimitContext {
    /// Key used when a rule does not name one.
    fn default_key(&self) -> String;
}

/// A request seen by a service: what was called, and by whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// The limited operation, e.g. a controller or method name
    pub scope: String,
    /// The caller, e.g. a remote address or user id
    pub client: String,
}

impl RequestContext {
    pub fn new(scope: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            client: client.into(),
        }
    }
}

impl RateLimitContext for RequestContext {
    fn default_key(&self) -> String {
        format!("{}:{}", self.scope, self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_resolves_to_itself() {
        let limit: Deferred<u64, RequestContext> = Deferred::Value(5);
        let ctx = RequestContext::new("HomeController", "127.0.0.1");

        assert_eq!(limit.resolve(&ctx), 5);
        assert_eq!(limit.literal(), Some(&5));
    }

    #[test]
    fn test_eval_reads_context() {
        let key: Deferred<String, RequestContext> =
            Deferred::eval(|ctx: &RequestContext| format!("user:{}", ctx.client));
        let ctx = RequestContext::new("ReportsController", "456");

        assert_eq!(key.resolve(&ctx), "user:456");
        assert!(key.literal().is_none());
    }

    #[test]
    fn test_default_key_combines_scope_and_client() {
        let ctx = RequestContext::new("HomeController", "127.0.0.1");
        assert_eq!(ctx.default_key(), "HomeController:127.0.0.1");
    }

    #[test]
    fn test_debug_hides_closure() {
        let key: Deferred<String, RequestContext> =
            Deferred::eval(|ctx: &RequestContext| ctx.client.clone());
        assert_eq!(format!("{:?}", key), "Eval(..)");
    }
}
