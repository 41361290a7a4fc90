//! Core admission gate implementation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::config::LimiterConfig;

/// Accounting state for a single key.
#[derive(Debug, Clone)]
struct KeyRecord {
    /// Attempts observed in the current window
    attempts: u32,
    /// When the current counting window began
    window_start: Instant,
    /// Set while the key is blocked
    blocked_at: Option<Instant>,
}

impl KeyRecord {
    fn new(now: Instant) -> Self {
        Self {
            attempts: 1,
            window_start: now,
            blocked_at: None,
        }
    }
}

type Table = Arc<RwLock<HashMap<String, KeyRecord>>>;

/// A per-key, time-windowed admission gate with automatic blocking and
/// recovery.
///
/// Each key accumulates attempts inside a rolling window; exceeding
/// `max_attempts` blocks the key for `block_duration`, after which the next
/// admission resets the window. A background task evicts records idle longer
/// than `window_size + block_duration`, so memory stays bounded by the set of
/// recently active keys.
///
/// The limiter is thread-safe and can be shared across tasks behind an
/// [`Arc`]. [`new`](Self::new) spawns the eviction task and therefore must be
/// called from within a Tokio runtime; call [`stop`](Self::stop) when the
/// limiter is retired.
pub struct RateLimiter {
    config: LimiterConfig,
    /// Per-key records, guarded as a whole by one lock
    records: Table,
    /// Signals the eviction task to exit
    shutdown: Arc<Notify>,
    stopped: AtomicBool,
}

impl RateLimiter {
    /// Create a new rate limiter and start its background eviction task.
    pub fn new(config: LimiterConfig) -> Self {
        let records: Table = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(sweep_loop(
            Arc::clone(&records),
            Arc::clone(&shutdown),
            config.clone(),
        ));

        Self {
            config,
            records,
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    /// Check whether a request for `key` is admitted, counting the attempt.
    ///
    /// This is the hot-path operation: one exclusive lock hold covering the
    /// whole create/unblock/roll-over/increment decision, so concurrent
    /// callers for the same key are strictly serialized and no attempt is
    /// lost or double-counted.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut records = self.records.write();

        let record = match records.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                trace!(key = %key, "Creating admission record");
                entry.insert(KeyRecord::new(now));
                return true;
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };

        if let Some(blocked_at) = record.blocked_at {
            if now.duration_since(blocked_at) > self.config.block_duration {
                debug!(key = %key, "Block expired, readmitting");
                *record = KeyRecord::new(now);
                return true;
            }
            return false;
        }

        if now.duration_since(record.window_start) > self.config.window_size {
            // Window rolled over, start counting afresh
            *record = KeyRecord::new(now);
            return true;
        }

        record.attempts += 1;
        if record.attempts > self.config.max_attempts {
            debug!(key = %key, attempts = record.attempts, "Attempt limit exceeded, blocking");
            record.blocked_at = Some(now);
            return false;
        }

        true
    }

    /// Penalize `key` for a failure observed after admission (e.g. a wrong
    /// password on a request that [`allow`](Self::allow) already let through).
    ///
    /// Applies the same counting and blocking transition as `allow` but never
    /// admits or denies by itself; the two are independent, composable
    /// primitives.
    pub fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let mut records = self.records.write();

        let record = match records.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(KeyRecord::new(now));
                return;
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };

        record.attempts += 1;
        if record.attempts > self.config.max_attempts {
            debug!(key = %key, attempts = record.attempts, "Failure limit exceeded, blocking");
            record.blocked_at = Some(now);
        }
    }

    /// Drop all accumulated state for `key`, blocked or not.
    ///
    /// Typically called after a successful sensitive operation (e.g. a
    /// correct login) so earlier failed attempts stop counting.
    pub fn reset(&self, key: &str) {
        let mut records = self.records.write();
        records.remove(key);
    }

    /// Attempts still available to `key` in the current window.
    ///
    /// An unknown key has the full budget; a blocked key has none.
    pub fn remaining_attempts(&self, key: &str) -> u32 {
        let records = self.records.read();
        match records.get(key) {
            None => self.config.max_attempts,
            Some(record) if record.blocked_at.is_some() => 0,
            Some(record) => self.config.max_attempts.saturating_sub(record.attempts),
        }
    }

    /// When the block on `key` lifts, or `None` if the key is not blocked.
    pub fn blocked_until(&self, key: &str) -> Option<Instant> {
        let records = self.records.read();
        records
            .get(key)
            .and_then(|record| record.blocked_at)
            .map(|blocked_at| blocked_at + self.config.block_duration)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        let records = self.records.read();
        records.len()
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Terminate the background eviction task.
    ///
    /// Safe to call more than once; repeated calls are ignored with a
    /// warning. Gate operations keep working after `stop`, but stale records
    /// are no longer evicted.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            warn!("Rate limiter stop called more than once");
            return;
        }
        self.shutdown.notify_one();
    }
}

/// Periodic eviction of records idle longer than `window_size +
/// block_duration`.
async fn sweep_loop(records: Table, shutdown: Arc<Notify>, config: LimiterConfig) {
    let expiry = config.record_expiry();
    let mut ticker = tokio::time::interval(config.cleanup_interval);
    // The first tick completes immediately; skip it so the first sweep
    // happens one full interval after construction.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let mut table = records.write();
                let before = table.len();
                table.retain(|_, record| now.duration_since(record.window_start) <= expiry);
                let evicted = before - table.len();
                if evicted > 0 {
                    debug!(evicted, remaining = table.len(), "Evicted stale admission records");
                }
            }
            _ = shutdown.notified() => break,
        }
    }
    trace!("Rate limiter eviction task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(max_attempts: u32) -> LimiterConfig {
        LimiterConfig {
            max_attempts,
            window_size: Duration::from_secs(900),
            block_duration: Duration::from_secs(1800),
            cleanup_interval: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_admits_until_limit_then_blocks() {
        let limiter = RateLimiter::new(test_config(3));

        for i in 0..3 {
            assert!(limiter.allow("ip1"), "attempt {} should be admitted", i + 1);
        }
        assert!(!limiter.allow("ip1"));

        let until = limiter.blocked_until("ip1").expect("key should be blocked");
        let expected = Instant::now() + Duration::from_secs(1800);
        assert!(expected.duration_since(until) < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_denies_while_blocked_then_readmits() {
        let config = LimiterConfig {
            max_attempts: 2,
            block_duration: Duration::from_millis(100),
            ..test_config(2)
        };
        let limiter = RateLimiter::new(config);

        assert!(limiter.allow("ip5"));
        assert!(limiter.allow("ip5"));
        assert!(!limiter.allow("ip5"));
        assert!(!limiter.allow("ip5"), "still inside the block window");

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(limiter.allow("ip5"), "block expired");
        assert_eq!(limiter.remaining_attempts("ip5"), 1);
        assert!(limiter.blocked_until("ip5").is_none());
    }

    #[tokio::test]
    async fn test_window_rollover_resets_without_blocking() {
        let config = LimiterConfig {
            max_attempts: 2,
            window_size: Duration::from_millis(50),
            ..test_config(2)
        };
        let limiter = RateLimiter::new(config);

        assert!(limiter.allow("ip2"));
        assert!(limiter.allow("ip2"));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(limiter.allow("ip2"), "window rolled over");
        assert_eq!(limiter.remaining_attempts("ip2"), 1);
        assert!(
            limiter.blocked_until("ip2").is_none(),
            "rollover is not a block expiry"
        );
    }

    #[tokio::test]
    async fn test_record_failure_alone_blocks() {
        let limiter = RateLimiter::new(test_config(3));

        for _ in 0..4 {
            limiter.record_failure("ip3");
        }

        assert!(!limiter.allow("ip3"));
        assert_eq!(limiter.remaining_attempts("ip3"), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_blocked_key() {
        let limiter = RateLimiter::new(test_config(2));

        for _ in 0..3 {
            limiter.allow("ip4");
        }
        assert!(!limiter.allow("ip4"));

        limiter.reset("ip4");

        assert!(limiter.allow("ip4"));
        assert_eq!(limiter.remaining_attempts("ip4"), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(test_config(2));

        for _ in 0..3 {
            limiter.allow("ip_a");
        }
        assert!(!limiter.allow("ip_a"));

        assert_eq!(limiter.remaining_attempts("ip_b"), 2);
        assert!(limiter.allow("ip_b"));
    }

    #[tokio::test]
    async fn test_remaining_attempts_bounds() {
        let limiter = RateLimiter::new(test_config(5));

        assert_eq!(limiter.remaining_attempts("fresh"), 5);

        limiter.allow("fresh");
        limiter.allow("fresh");
        assert_eq!(limiter.remaining_attempts("fresh"), 3);

        for _ in 0..4 {
            limiter.allow("fresh");
        }
        assert_eq!(limiter.remaining_attempts("fresh"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_count_exactly_once() {
        let limiter = Arc::new(RateLimiter::new(test_config(50)));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move { limiter.allow("contended") });
        }

        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            if result.expect("task panicked") {
                admitted += 1;
            }
        }

        // Exactly max_attempts admissions regardless of interleaving.
        assert_eq!(admitted, 50);
        assert_eq!(limiter.remaining_attempts("contended"), 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_stale_records() {
        let config = LimiterConfig {
            max_attempts: 3,
            window_size: Duration::from_millis(50),
            block_duration: Duration::from_millis(50),
            cleanup_interval: Duration::from_millis(50),
        };
        let limiter = RateLimiter::new(config);

        limiter.allow("idle");
        assert_eq!(limiter.tracked_keys(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(limiter.tracked_keys(), 0);
        assert_eq!(limiter.remaining_attempts("idle"), 3);
    }

    #[tokio::test]
    async fn test_stop_halts_sweep() {
        let config = LimiterConfig {
            max_attempts: 3,
            window_size: Duration::from_millis(50),
            block_duration: Duration::from_millis(50),
            cleanup_interval: Duration::from_millis(50),
        };
        let limiter = RateLimiter::new(config);

        limiter.allow("survivor");
        limiter.stop();

        tokio::time::sleep(Duration::from_millis(300)).await;

        // Stale but never evicted once the task is stopped.
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let limiter = RateLimiter::new(test_config(3));
        limiter.stop();
        limiter.stop();
    }
}
