//! Admission gating logic and state management.

mod config;
mod limiter;

pub use config::LimiterConfig;
pub use limiter::RateLimiter;
