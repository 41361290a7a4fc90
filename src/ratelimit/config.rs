//! Limiter configuration and named presets.

use std::time::Duration;

/// Configuration for a [`RateLimiter`](super::RateLimiter) instance.
///
/// All four parameters are fixed at construction. Endpoint classes that need
/// different tuning get their own limiter instance built from one of the
/// named presets below rather than a separate limiter type.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Admissions allowed per window before the key is blocked
    pub max_attempts: u32,
    /// Rolling period during which attempts accumulate
    pub window_size: Duration,
    /// How long a key stays blocked after exceeding `max_attempts`
    pub block_duration: Duration,
    /// Cadence of the background eviction sweep
    pub cleanup_interval: Duration,
}

impl Default for LimiterConfig {
    /// Generic fallback: 5 attempts per 15 minutes, 30 minute block.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_size: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl LimiterConfig {
    /// Preset for login/registration endpoints.
    ///
    /// Roomier than the default so onboarding bursts from a shared NAT
    /// don't lock legitimate users out, with a short penalty window.
    pub fn auth() -> Self {
        Self {
            max_attempts: 20,
            window_size: Duration::from_secs(5 * 60),
            block_duration: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }

    /// Preset for sensitive account operations (password, wallet, payout
    /// setting changes).
    pub fn sensitive() -> Self {
        Self {
            max_attempts: 10,
            window_size: Duration::from_secs(10 * 60),
            block_duration: Duration::from_secs(15 * 60),
            cleanup_interval: Duration::from_secs(2 * 60),
        }
    }

    /// Preset for high-volume public API endpoints: per-minute limiting
    /// with a short block.
    pub fn general_api() -> Self {
        Self {
            max_attempts: 100,
            window_size: Duration::from_secs(60),
            block_duration: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }

    /// Age past which an idle record can be evicted by the sweep.
    pub(crate) fn record_expiry(&self) -> Duration {
        self.window_size + self.block_duration
    }
}
