//! Rate limiting logic: rules, evaluation, and the limiter itself.

mod deferred;
mod evaluation;
mod limiter;
mod rule;

pub use deferred::{Deferred, RateLimitContext, RequestContext};
pub use evaluation::{
    Evaluation, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use limiter::RateLimiter;
pub use rule::RateLimit;
