//! Per-source admission control.
//!
//! Every outbound request is admitted through a [`MultiLimiter`] keyed by
//! source name. Each key owns an independent sliding-window bucket: at
//! most `max_count` admissions fall inside any window of length `period`.
//! Keys without an explicit policy get their own bucket built from the
//! default policy, so unrelated sources never contend with each other.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Rate limiting error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The limiter was closed; no further admissions are granted.
    #[error("rate limiter closed")]
    Closed,
}

/// Admission policy for a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// At most `max_count` admissions in any window of length `period`.
    Limited {
        /// Admissions allowed per window.
        max_count: u32,
        /// Window length.
        period: Duration,
    },
    /// Never blocks.
    Unlimited,
}

impl RateLimitPolicy {
    /// A limited policy; a zero count or zero period means unlimited.
    pub fn limited(max_count: u32, period: Duration) -> Self {
        if max_count == 0 || period.is_zero() {
            Self::Unlimited
        } else {
            Self::Limited { max_count, period }
        }
    }

    /// `max_count` admissions per second.
    pub fn per_second(max_count: u32) -> Self {
        Self::limited(max_count, Duration::from_secs(1))
    }

    /// `max_count` admissions per minute.
    pub fn per_minute(max_count: u32) -> Self {
        Self::limited(max_count, Duration::from_secs(60))
    }
}

/// The full rate-limit table handed to a session at construction time.
///
/// Built-in per-source policies form the base layer; caller overrides are
/// merged on top. The table is not mutable once the limiter is built.
#[derive(Debug, Clone)]
pub struct RateLimits {
    /// Policy cloned into a fresh bucket for every key without an entry.
    pub default: RateLimitPolicy,
    /// Explicit per-source policies.
    pub sources: HashMap<String, RateLimitPolicy>,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            default: RateLimitPolicy::per_minute(30),
            sources: Self::builtin(),
        }
    }
}

impl RateLimits {
    /// Policies known to suit each provider.
    pub fn builtin() -> HashMap<String, RateLimitPolicy> {
        let three_secs = Duration::from_secs(3);
        [
            ("shodan", RateLimitPolicy::per_second(1)),
            ("shodan-idb", RateLimitPolicy::per_second(1)),
            ("fofa", RateLimitPolicy::per_second(1)),
            ("censys", RateLimitPolicy::limited(1, three_secs)),
            ("quake", RateLimitPolicy::per_second(1)),
            ("hunter", RateLimitPolicy::per_second(15)),
            ("zoomeye", RateLimitPolicy::per_second(1)),
            ("netlas", RateLimitPolicy::per_second(1)),
            ("criminalip", RateLimitPolicy::per_second(1)),
            ("publicwww", RateLimitPolicy::per_minute(1)),
            ("hunterhow", RateLimitPolicy::limited(1, three_secs)),
            ("binaryedge", RateLimitPolicy::per_second(1)),
            ("fullhunt", RateLimitPolicy::per_second(1)),
            ("zone0", RateLimitPolicy::per_second(1)),
            ("daydaymap", RateLimitPolicy::per_second(1)),
            ("fofa-spider", RateLimitPolicy::per_second(5)),
            ("bing-spider", RateLimitPolicy::per_second(1)),
            ("google-spider", RateLimitPolicy::per_second(1)),
            ("chinaz-spider", RateLimitPolicy::per_second(1)),
            ("ip138-spider", RateLimitPolicy::per_second(1)),
            ("qianxun-spider", RateLimitPolicy::per_second(1)),
            ("anubis-spider", RateLimitPolicy::per_second(1)),
            ("baidu-spider", RateLimitPolicy::per_second(5)),
            ("sitedossier-spider", RateLimitPolicy::per_second(2)),
            ("yahoo-spider", RateLimitPolicy::per_second(3)),
            ("zoomeye-spider", RateLimitPolicy::per_second(2)),
            ("rapiddns-spider", RateLimitPolicy::per_second(1)),
        ]
        .into_iter()
        .map(|(key, policy)| (key.to_owned(), policy))
        .collect()
    }

    /// A table with no per-source entries, only the given default.
    pub fn uniform(default: RateLimitPolicy) -> Self {
        Self {
            default,
            sources: HashMap::new(),
        }
    }

    /// Replace the default policy.
    #[must_use]
    pub fn with_default(mut self, default: RateLimitPolicy) -> Self {
        self.default = default;
        self
    }

    /// Set (or replace) the policy for a single source.
    #[must_use]
    pub fn with_source(mut self, key: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.sources.insert(key.into(), policy);
        self
    }

    /// Merge caller overrides on top of the current table.
    #[must_use]
    pub fn merge(mut self, overrides: HashMap<String, RateLimitPolicy>) -> Self {
        self.sources.extend(overrides);
        self
    }

    /// The policy that applies to `key`.
    pub fn policy_for(&self, key: &str) -> RateLimitPolicy {
        self.sources.get(key).copied().unwrap_or(self.default)
    }
}

/// Sliding log of recent admissions for one key.
/// Upper bound on the admission slots reserved up front per window.
const WINDOW_PREALLOC: u32 = 1024;

#[derive(Debug)]
struct SlidingWindow {
    max_count: usize,
    period: Duration,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(max_count: u32, period: Duration) -> Self {
        Self {
            max_count: max_count as usize,
            period,
            admitted: VecDeque::with_capacity(max_count.min(WINDOW_PREALLOC) as usize),
        }
    }

    /// Admit at `now`, or return the instant at which a slot frees up.
    fn try_admit(&mut self, now: Instant) -> Result<(), Instant> {
        while let Some(&first) = self.admitted.front() {
            if now.duration_since(first) >= self.period {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        if self.admitted.len() < self.max_count {
            self.admitted.push_back(now);
            return Ok(());
        }

        match self.admitted.front() {
            Some(&oldest) => Err(oldest + self.period),
            None => Err(now + self.period),
        }
    }
}

#[derive(Debug)]
enum Bucket {
    Unlimited,
    Limited(tokio::sync::Mutex<SlidingWindow>),
}

impl Bucket {
    fn from_policy(policy: RateLimitPolicy) -> Self {
        match policy {
            RateLimitPolicy::Unlimited => Self::Unlimited,
            RateLimitPolicy::Limited { max_count, period } => {
                Self::Limited(tokio::sync::Mutex::new(SlidingWindow::new(max_count, period)))
            }
        }
    }
}

/// Keyed collection of independent buckets.
///
/// Callers for the same key queue on that key's bucket in FIFO order;
/// callers for different keys never block each other.
#[derive(Debug)]
pub struct MultiLimiter {
    limits: RateLimits,
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    closed: CancellationToken,
}

impl MultiLimiter {
    /// Create a limiter from a fixed rate-limit table.
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            buckets: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        }
    }

    /// The table this limiter was built from.
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    fn bucket(&self, key: &str) -> Arc<Bucket> {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            buckets
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Bucket::from_policy(self.limits.policy_for(key)))),
        )
    }

    /// Wait until `key` may send one request.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Closed`] if the limiter is closed before
    /// or while waiting.
    pub async fn admit(&self, key: &str) -> Result<(), RateLimitError> {
        if self.closed.is_cancelled() {
            return Err(RateLimitError::Closed);
        }

        let bucket = self.bucket(key);
        let Bucket::Limited(window) = bucket.as_ref() else {
            return Ok(());
        };

        let mut window = tokio::select! {
            () = self.closed.cancelled() => return Err(RateLimitError::Closed),
            guard = window.lock() => guard,
        };

        loop {
            match window.try_admit(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(ready_at) => {
                    tracing::trace!(key, "rate limit reached, waiting for a slot");
                    tokio::select! {
                        () = self.closed.cancelled() => return Err(RateLimitError::Closed),
                        () = tokio::time::sleep_until(ready_at) => {}
                    }
                }
            }
        }
    }

    /// Close the limiter: blocked and future [`admit`](Self::admit) calls fail fast.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn zero_count_policy_is_unlimited() {
        assert_eq!(
            RateLimitPolicy::limited(0, Duration::from_secs(1)),
            RateLimitPolicy::Unlimited
        );
        assert_eq!(
            RateLimitPolicy::limited(5, Duration::ZERO),
            RateLimitPolicy::Unlimited
        );
    }

    #[test]
    fn builtin_table_covers_known_sources() {
        let limits = RateLimits::default();
        assert_eq!(limits.policy_for("shodan"), RateLimitPolicy::per_second(1));
        assert_eq!(limits.policy_for("hunter"), RateLimitPolicy::per_second(15));
        assert_eq!(limits.policy_for("publicwww"), RateLimitPolicy::per_minute(1));
        assert_eq!(limits.policy_for("not-a-source"), RateLimitPolicy::per_minute(30));
    }

    #[test]
    fn overrides_merge_on_top_of_builtin() {
        let overrides = HashMap::from([("shodan".to_owned(), RateLimitPolicy::per_second(4))]);
        let limits = RateLimits::default()
            .merge(overrides)
            .with_default(RateLimitPolicy::Unlimited);
        assert_eq!(limits.policy_for("shodan"), RateLimitPolicy::per_second(4));
        assert_eq!(limits.policy_for("fofa"), RateLimitPolicy::per_second(1));
        assert_eq!(limits.policy_for("unknown"), RateLimitPolicy::Unlimited);
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_blocks_until_oldest_ages_out() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2, Duration::from_secs(1));
        assert!(window.try_admit(start).is_ok());
        assert!(window.try_admit(start).is_ok());
        assert_eq!(window.try_admit(start), Err(start + Duration::from_secs(1)));
        assert!(window.try_admit(start + Duration::from_secs(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_window_admits_without_reserving_every_slot() {
        let limiter = MultiLimiter::new(RateLimits::uniform(RateLimitPolicy::limited(
            u32::MAX,
            Duration::from_secs(1),
        )));
        let start = Instant::now();
        for _ in 0..2_000 {
            limiter.admit("huge").await.unwrap();
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_key_never_blocks() {
        let limiter = MultiLimiter::new(RateLimits::uniform(RateLimitPolicy::Unlimited));
        let start = Instant::now();
        for _ in 0..1_000 {
            limiter.admit("anything").await.unwrap();
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_admissions_respect_sliding_window() {
        let period = Duration::from_secs(1);
        let limiter = Arc::new(MultiLimiter::new(
            RateLimits::uniform(RateLimitPolicy::Unlimited)
                .with_source("shared", RateLimitPolicy::limited(2, period)),
        ));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let mut stamps = Vec::new();
                for _ in 0..3 {
                    limiter.admit("shared").await.unwrap();
                    stamps.push(Instant::now());
                }
                stamps
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.extend(handle.await.unwrap());
        }
        stamps.sort();
        assert_eq!(stamps.len(), 9);

        // Any k + 1 consecutive admissions must span at least one period.
        for pair in stamps.windows(3) {
            assert!(pair[2].duration_since(pair[0]) >= period);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keys_do_not_block_each_other() {
        let limiter = MultiLimiter::new(RateLimits::uniform(RateLimitPolicy::per_minute(1)));
        limiter.admit("a").await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(10), limiter.admit("a")).await;
        assert!(blocked.is_err(), "second admission for `a` should wait");

        let other = tokio::time::timeout(Duration::from_millis(10), limiter.admit("b")).await;
        assert!(matches!(other, Ok(Ok(()))), "`b` has its own bucket");
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_blocked_and_future_admissions() {
        let limiter = Arc::new(MultiLimiter::new(RateLimits::uniform(
            RateLimitPolicy::per_minute(1),
        )));
        limiter.admit("slow").await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.admit("slow").await })
        };
        tokio::task::yield_now().await;

        limiter.close();
        assert_eq!(waiter.await.unwrap(), Err(RateLimitError::Closed));
        assert_eq!(limiter.admit("fresh").await, Err(RateLimitError::Closed));
        assert!(limiter.is_closed());
    }
}
