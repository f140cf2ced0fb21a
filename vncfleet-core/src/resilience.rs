//! Circuit-breaker resilience wrapper
//!
//! Every outbound call made during discovery, probing and recovery is routed
//! through a named breaker so one systemically broken instance cannot exhaust
//! capacity for the rest of the fleet.
//!
//! Failures are counted in a bucketed rolling window; once the windowed error
//! rate crosses the configured threshold the breaker opens and calls are
//! short-circuited. After a cool-down exactly one half-open trial call is
//! admitted: success closes the breaker, failure reopens it. Timeouts are
//! tracked as a failure category distinct from returned errors.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::ResilienceConfig;
use crate::metrics;

/// Per-breaker tuning knobs
#[derive(Debug, Clone)]
pub struct BreakerOptions {
    /// Per-call timeout; expiry counts as a timeout failure.
    pub call_timeout: Duration,
    /// Windowed error rate (percent) that opens the breaker.
    pub error_threshold_pct: f64,
    /// Cool-down before a half-open trial call is admitted.
    pub reset_timeout: Duration,
    /// Span of the rolling window.
    pub rolling_window: Duration,
    /// Bucket count inside the window.
    pub rolling_buckets: usize,
    /// Minimum calls in the window before the threshold applies.
    pub min_requests: u32,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for BreakerOptions {
    fn from(cfg: &ResilienceConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(cfg.call_timeout_secs),
            error_threshold_pct: cfg.error_threshold_pct,
            reset_timeout: Duration::from_secs(cfg.reset_timeout_secs),
            rolling_window: Duration::from_secs(cfg.rolling_window_secs),
            rolling_buckets: cfg.rolling_buckets.max(1),
            min_requests: cfg.min_requests,
        }
    }
}

/// Breaker state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn gauge_value(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

/// Error surfaced by a breaker-wrapped call
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Short-circuited without invoking the operation.
    Open,
    /// The operation exceeded the per-call timeout.
    Timeout,
    /// The operation itself failed.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "circuit breaker open"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

/// Lifetime and windowed counters for one breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_timeouts: u64,
    /// Error rate over the current rolling window, in percent.
    pub error_rate: f64,
}

/// Observability snapshot of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: BreakerState,
    pub stats: BreakerStats,
}

/// Aggregate view across all breakers
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSummary {
    pub breakers: usize,
    pub open: usize,
    pub half_open: usize,
    pub closed: usize,
    pub total_requests: u64,
    pub total_failures: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    successes: u32,
    failures: u32,
    timeouts: u32,
}

#[derive(Debug)]
struct Window {
    buckets: VecDeque<Bucket>,
    bucket_span: Duration,
    capacity: usize,
    last_roll: Instant,
}

impl Window {
    fn new(span: Duration, capacity: usize) -> Self {
        // A zero bucket count would divide the span by zero.
        let capacity = capacity.max(1);
        let mut buckets = VecDeque::with_capacity(capacity);
        buckets.push_back(Bucket::default());
        Self {
            buckets,
            bucket_span: span / capacity as u32,
            capacity,
            last_roll: Instant::now(),
        }
    }

    /// Advance the window so the back bucket covers "now".
    fn roll(&mut self, now: Instant) {
        if self.bucket_span.is_zero() {
            return;
        }
        let mut elapsed = now.saturating_duration_since(self.last_roll);
        if elapsed >= self.bucket_span * self.capacity as u32 {
            // Everything in the window is stale.
            self.buckets.clear();
            self.buckets.push_back(Bucket::default());
            self.last_roll = now;
            return;
        }
        while elapsed >= self.bucket_span {
            self.buckets.push_back(Bucket::default());
            if self.buckets.len() > self.capacity {
                self.buckets.pop_front();
            }
            self.last_roll += self.bucket_span;
            elapsed -= self.bucket_span;
        }
    }

    fn current(&mut self) -> &mut Bucket {
        self.buckets.back_mut().expect("window is never empty")
    }

    fn totals(&self) -> (u32, u32) {
        let mut requests = 0u32;
        let mut errors = 0u32;
        for b in &self.buckets {
            requests += b.successes + b.failures + b.timeouts;
            errors += b.failures + b.timeouts;
        }
        (requests, errors)
    }

    fn reset(&mut self) {
        self.buckets.clear();
        self.buckets.push_back(Bucket::default());
        self.last_roll = Instant::now();
    }

    fn error_rate_pct(&self) -> f64 {
        let (requests, errors) = self.totals();
        if requests == 0 {
            0.0
        } else {
            f64::from(errors) / f64::from(requests) * 100.0
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    window: Window,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
    total_timeouts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Timeout,
}

/// One unit of fault isolation, keyed by logical operation name
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    opts: BreakerOptions,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    fn new(name: String, opts: BreakerOptions) -> Self {
        let window = Window::new(opts.rolling_window, opts.rolling_buckets);
        Self {
            name,
            opts,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
                trial_in_flight: false,
                window,
                total_requests: 0,
                total_failures: 0,
                total_successes: 0,
                total_timeouts: 0,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Execute `op` through the breaker.
    ///
    /// Open breakers short-circuit with `BreakerError::Open` without invoking
    /// `op`. Timeouts are recorded separately from operation errors.
    pub async fn fire<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let admission = match self.admit() {
            Some(a) => a,
            None => return Err(BreakerError::Open),
        };

        match tokio::time::timeout(self.opts.call_timeout, op()).await {
            Ok(Ok(value)) => {
                self.record(Outcome::Success, admission);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(Outcome::Failure, admission);
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                self.record(Outcome::Timeout, admission);
                Err(BreakerError::Timeout)
            }
        }
    }

    /// Execute `op`, substituting `fallback` for any breaker-level or
    /// operation-level failure. The short-circuit path never invokes `op`.
    pub async fn fire_or<T, E, F, Fut>(&self, fallback: T, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match self.fire(op).await {
            Ok(value) => value,
            Err(_) => fallback,
        }
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Some(Admission::Normal),
            BreakerState::HalfOpen => {
                // A trial is already in flight; reject until it settles.
                None
            }
            BreakerState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.opts.reset_timeout);
                if cooled_down && !inner.trial_in_flight {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    self.export_state(inner.state);
                    tracing::debug!(breaker = %self.name, "Admitting half-open trial call");
                    Some(Admission::Trial)
                } else {
                    None
                }
            }
        }
    }

    fn record(&self, outcome: Outcome, admission: Admission) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.window.roll(now);

        inner.total_requests += 1;
        match outcome {
            Outcome::Success => {
                inner.total_successes += 1;
                inner.window.current().successes += 1;
            }
            Outcome::Failure => {
                inner.total_failures += 1;
                inner.window.current().failures += 1;
            }
            Outcome::Timeout => {
                inner.total_timeouts += 1;
                inner.window.current().timeouts += 1;
            }
        }

        if admission == Admission::Trial {
            inner.trial_in_flight = false;
            match outcome {
                Outcome::Success => {
                    inner.state = BreakerState::Closed;
                    inner.opened_at = None;
                    inner.window.reset();
                    tracing::info!(breaker = %self.name, "Breaker closed after successful trial");
                }
                Outcome::Failure | Outcome::Timeout => {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(breaker = %self.name, "Breaker reopened after failed trial");
                }
            }
            self.export_state(inner.state);
            return;
        }

        if inner.state == BreakerState::Closed {
            let (requests, _) = inner.window.totals();
            let error_rate = inner.window.error_rate_pct();
            if requests >= self.opts.min_requests && error_rate >= self.opts.error_threshold_pct {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                self.export_state(inner.state);
                tracing::warn!(
                    breaker = %self.name,
                    error_rate = error_rate,
                    requests = requests,
                    "Breaker opened: windowed error rate over threshold"
                );
            }
        }
    }

    fn export_state(&self, state: BreakerState) {
        metrics::resilience::BREAKER_STATE
            .with_label_values(&[&self.name])
            .set(state.gauge_value());
    }

    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        let mut inner = self.inner.lock();
        inner.window.roll(Instant::now());
        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            stats: BreakerStats {
                total_requests: inner.total_requests,
                total_failures: inner.total_failures,
                total_successes: inner.total_successes,
                total_timeouts: inner.total_timeouts,
                error_rate: inner.window.error_rate_pct(),
            },
        }
    }
}

/// Process-scoped manager of named breakers
///
/// Constructed once and passed by reference to every component that makes
/// external calls. Breakers are created lazily per operation name and persist
/// for the process lifetime; `shutdown()` clears them for test isolation.
#[derive(Debug, Default)]
pub struct BreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerOptions,
}

impl BreakerManager {
    #[must_use]
    pub fn new(defaults: BreakerOptions) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
        }
    }

    /// Get or create the breaker registered under `name`. Idempotent: an
    /// existing breaker wins and `options` is ignored.
    pub fn breaker(&self, name: &str, options: Option<BreakerOptions>) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let opts = options.unwrap_or_else(|| self.defaults.clone());
                Arc::new(CircuitBreaker::new(name.to_string(), opts))
            })
            .clone()
    }

    #[must_use]
    pub fn metrics(&self, name: &str) -> Option<BreakerMetrics> {
        self.breakers.get(name).map(|b| b.metrics())
    }

    #[must_use]
    pub fn all_metrics(&self) -> Vec<BreakerMetrics> {
        let mut all: Vec<BreakerMetrics> =
            self.breakers.iter().map(|b| b.metrics()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    #[must_use]
    pub fn summary(&self) -> BreakerSummary {
        let all = self.all_metrics();
        let mut summary = BreakerSummary {
            breakers: all.len(),
            open: 0,
            half_open: 0,
            closed: 0,
            total_requests: 0,
            total_failures: 0,
        };
        for m in &all {
            match m.state {
                BreakerState::Open => summary.open += 1,
                BreakerState::HalfOpen => summary.half_open += 1,
                BreakerState::Closed => summary.closed += 1,
            }
            summary.total_requests += m.stats.total_requests;
            summary.total_failures += m.stats.total_failures + m.stats.total_timeouts;
        }
        summary
    }

    /// Drop all breaker state. Used for test isolation and process teardown.
    pub fn shutdown(&self) {
        self.breakers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_options() -> BreakerOptions {
        BreakerOptions {
            call_timeout: Duration::from_millis(200),
            error_threshold_pct: 50.0,
            reset_timeout: Duration::from_millis(100),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 2,
            min_requests: 5,
        }
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let manager = BreakerManager::new(test_options());
        let breaker = manager.breaker("probe:instance-0", None);
        let invocations = AtomicU32::new(0);

        for _ in 0..5 {
            let result: Result<(), _> = breaker
                .fire(|| async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("connection refused")
                })
                .await;
            assert!(result.is_err());
        }

        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(invocations.load(Ordering::SeqCst), 5);

        // The 6th call is short-circuited to the fallback without invoking
        // the real operation.
        let value = breaker
            .fire_or(false, || async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(true)
            })
            .await;
        assert!(!value);
        assert_eq!(invocations.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_stays_closed_below_threshold() {
        let manager = BreakerManager::new(test_options());
        let breaker = manager.breaker("probe:instance-1", None);

        for i in 0..10 {
            let _ = breaker
                .fire(|| async move {
                    if i % 4 == 0 {
                        Err("transient")
                    } else {
                        Ok(())
                    }
                })
                .await;
        }

        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_on_success() {
        let manager = BreakerManager::new(test_options());
        let breaker = manager.breaker("recover:instance-2", None);

        for _ in 0..5 {
            let _ = breaker.fire(|| async { Err::<(), _>("down") }).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = breaker.fire(|| async { Ok::<_, &str>(42) }).await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_reopens_on_failure() {
        let manager = BreakerManager::new(test_options());
        let breaker = manager.breaker("recover:instance-3", None);

        for _ in 0..5 {
            let _ = breaker.fire(|| async { Err::<(), _>("down") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        let result: Result<(), _> = breaker.fire(|| async { Err::<(), _>("still down") }).await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        // Immediately after the failed trial the breaker rejects again.
        let result: Result<(), _> = breaker.fire(|| async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open)));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_failure_category() {
        let manager = BreakerManager::new(test_options());
        let breaker = manager.breaker("probe:slow", None);

        let result: Result<(), BreakerError<&str>> = breaker
            .fire(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout)));

        let metrics = breaker.metrics();
        assert_eq!(metrics.stats.total_timeouts, 1);
        assert_eq!(metrics.stats.total_failures, 0);
        assert_eq!(metrics.stats.total_requests, 1);
    }

    #[tokio::test]
    async fn test_zero_rolling_buckets_is_clamped() {
        let manager = BreakerManager::new(BreakerOptions {
            rolling_buckets: 0,
            ..test_options()
        });
        let breaker = manager.breaker("clamped", None);

        let result = breaker.fire(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.metrics().stats.total_requests, 1);
    }

    #[tokio::test]
    async fn test_manager_is_idempotent_per_name() {
        let manager = BreakerManager::new(test_options());
        let a = manager.breaker("shared", None);
        let b = manager.breaker("shared", Some(BreakerOptions::default()));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.all_metrics().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_and_shutdown() {
        let manager = BreakerManager::new(test_options());
        let breaker = manager.breaker("op-a", None);
        let _ = breaker.fire(|| async { Ok::<_, &str>(()) }).await;
        manager.breaker("op-b", None);

        let summary = manager.summary();
        assert_eq!(summary.breakers, 2);
        assert_eq!(summary.closed, 2);
        assert_eq!(summary.total_requests, 1);

        manager.shutdown();
        assert!(manager.all_metrics().is_empty());
        assert!(manager.metrics("op-a").is_none());
    }
}
