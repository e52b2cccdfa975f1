//! Quotakeeper - Sliding Window Rate Limiting
//!
//! This crate enforces per-key quotas over a sliding time window. Each key
//! accumulates timestamped events in a counter store (in-process memory, a
//! Redis sorted set, or a memcached-style key-value cache); an evaluation
//! counts the events inside the trailing window and records a new one only
//! while the count is under the limit.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quotakeeper::ratelimit::{RateLimit, RateLimiter, RequestContext};
//! use quotakeeper::store::StoreRegistry;
//!
//! # async fn run() -> quotakeeper::error::Result<()> {
//! let limiter = RateLimiter::new(Arc::new(StoreRegistry::new()));
//! let rule = RateLimit::new(100, 3600).validated()?;
//!
//! let ctx = RequestContext::new("ReportsController", "203.0.113.7");
//! let evaluation = limiter.check(&ctx, &rule).await?;
//! if !evaluation.allowed {
//!     // reject, e.g. with evaluation.headers()
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod monitor;
pub mod ratelimit;
pub mod store;
