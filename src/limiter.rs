//! Closed-loop throughput limiter.
//!
//! Each limiter refills at a fraction of a table's (or index's) provisioned
//! capacity. Before a call it takes as many permits as the previous call
//! consumed; the backend's consumed-capacity figure then sizes the next
//! acquisition. The throttle lags one call behind and approximates, rather
//! than guarantees, staying under the provisioned rate.

use crate::{
    error::{Error, RequestContext, Result},
    store::Store,
};

use aws_sdk_dynamodb::operation::describe_table::DescribeTableInput;
use std::{
    collections,
    sync::{self, Arc},
    time::Duration,
};
use tokio::time::Instant;

/// Rate limiting settings of a mapper.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    /// Whether permits are acquired at all. Disable in tests.
    pub enabled: bool,
    /// Share of provisioned read capacity to target, in percent.
    pub read_utilization_percent: f64,
    /// Share of provisioned write capacity to target, in percent.
    pub write_utilization_percent: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read_utilization_percent: 80.0,
            write_utilization_percent: 80.0,
        }
    }
}

/// Which provisioned capacity a limiter follows.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    /// Read capacity.
    Read,
    /// Write capacity.
    Write,
}

/// A smooth token bucket with one second of burst.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    permits_per_second: f64,
    stored: f64,
    max_stored: f64,
    next_free: Instant,
    next_acquire: f64,
}

impl RateLimiter {
    /// A limiter refilling `units * percent / 100` permits per second, at least 1.
    ///
    /// Tables without provisioned capacity (`units == 0`) are not throttled.
    pub fn from_provisioned(units: i64, percent: f64, enabled: bool) -> Self {
        let permits_per_second = (units as f64 * percent / 100.0).max(1.0);
        Self {
            enabled: enabled && units > 0,
            permits_per_second,
            stored: 0.0,
            max_stored: permits_per_second,
            next_free: Instant::now(),
            next_acquire: 1.0,
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::from_provisioned(0, 100.0, false)
    }

    /// Permits refilled per second.
    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }

    /// Permits the next call will take.
    pub fn next_acquire(&self) -> f64 {
        self.next_acquire
    }

    fn resync(&mut self, now: Instant) {
        if now > self.next_free {
            let refilled = (now - self.next_free).as_secs_f64() * self.permits_per_second;
            self.stored = (self.stored + refilled).min(self.max_stored);
            self.next_free = now;
        }
    }

    /// Take the next call's permits and return how long the caller must wait.
    ///
    /// The wait only covers debt left by earlier calls; the permits taken now
    /// push back whoever comes next.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        self.resync(now);
        let wait = self.next_free.saturating_duration_since(now);
        let from_stored = self.next_acquire.min(self.stored);
        let fresh = self.next_acquire - from_stored;
        self.stored -= from_stored;
        self.next_free += Duration::from_secs_f64(fresh / self.permits_per_second);
        wait
    }

    /// Size the next acquisition from the capacity a call consumed.
    pub fn record_consumed(&mut self, units: f64) {
        self.next_acquire = (units - 1.0).ceil().max(1.0);
    }
}

/// Shared handle to one limiter.
#[derive(Clone, Debug)]
pub struct Throttle(Arc<sync::Mutex<RateLimiter>>);

impl Throttle {
    /// Wrap a limiter for sharing.
    pub fn new(limiter: RateLimiter) -> Self {
        Self(Arc::new(sync::Mutex::new(limiter)))
    }

    fn lock(&self) -> sync::MutexGuard<'_, RateLimiter> {
        self.0.lock().unwrap_or_else(sync::PoisonError::into_inner)
    }

    /// Wait until the next call's permits are available.
    pub async fn acquire(&self) {
        let wait = self.lock().reserve(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Feed back the capacity a call consumed.
    pub fn record_consumed(&self, units: Option<f64>) {
        if let Some(units) = units {
            self.lock().record_consumed(units);
        }
    }

    /// Permits the next call will take.
    pub fn next_acquire(&self) -> f64 {
        self.lock().next_acquire()
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct LimiterKey {
    table: String,
    index: Option<String>,
    mode: Mode,
}

/// Lazily built limiters, one per table or index and mode.
#[derive(Debug)]
pub struct LimiterCache {
    config: RateLimitConfig,
    throttles: sync::Mutex<collections::HashMap<LimiterKey, Throttle>>,
}

impl LimiterCache {
    /// An empty cache.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            throttles: sync::Mutex::new(collections::HashMap::new()),
        }
    }

    /// The limiter settings.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The limiter of a table or index, created from its provisioned capacity on first use.
    ///
    /// Returns `None` when rate limiting is disabled.
    pub async fn throttle(
        &self,
        store: &dyn Store,
        table: &str,
        index: Option<&str>,
        mode: Mode,
    ) -> Result<Option<Throttle>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let key = LimiterKey {
            table: table.to_string(),
            index: index.map(str::to_string),
            mode,
        };
        if let Some(throttle) = self.lock().get(&key) {
            return Ok(Some(throttle.clone()));
        }
        let units = provisioned_units(store, table, index, mode).await?;
        let percent = match mode {
            Mode::Read => self.config.read_utilization_percent,
            Mode::Write => self.config.write_utilization_percent,
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(table, index, ?mode, units, percent, "created rate limiter");
        let throttle = self
            .lock()
            .entry(key)
            .or_insert_with(|| Throttle::new(RateLimiter::from_provisioned(units, percent, true)))
            .clone();
        Ok(Some(throttle))
    }

    fn lock(&self) -> sync::MutexGuard<'_, collections::HashMap<LimiterKey, Throttle>> {
        self.throttles
            .lock()
            .unwrap_or_else(sync::PoisonError::into_inner)
    }
}

async fn provisioned_units(store: &dyn Store, table: &str, index: Option<&str>, mode: Mode) -> Result<i64> {
    let input = DescribeTableInput::builder()
        .table_name(table)
        .build()
        .map_err(|error| Error::build(error, RequestContext::table(table)))?;
    let output = store.describe_table(input).await?;
    let Some(description) = output.table else {
        return Ok(0);
    };
    let throughput = match index {
        Some(index) => description
            .global_secondary_indexes
            .unwrap_or_default()
            .into_iter()
            .find(|gsi| gsi.index_name.as_deref() == Some(index))
            .and_then(|gsi| gsi.provisioned_throughput)
            .or(description.provisioned_throughput),
        None => description.provisioned_throughput,
    };
    let units = throughput.and_then(|throughput| match mode {
        Mode::Read => throughput.read_capacity_units,
        Mode::Write => throughput.write_capacity_units,
    });
    Ok(units.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::percent_of_units(100, 50.0, 50.0)]
    #[case::floor_of_one(1, 10.0, 1.0)]
    fn test_rate_from_provisioned(#[case] units: i64, #[case] percent: f64, #[case] expected: f64) {
        let limiter = RateLimiter::from_provisioned(units, percent, true);
        assert_eq!(limiter.permits_per_second(), expected);
        assert_eq!(limiter.next_acquire(), 1.0);
    }

    #[rstest]
    #[case::below_baseline(0.5, 1.0)]
    #[case::one_unit(1.0, 1.0)]
    #[case::fractional(3.5, 3.0)]
    #[case::whole(10.0, 9.0)]
    fn test_next_acquire_from_consumed(#[case] consumed: f64, #[case] expected: f64) {
        let mut limiter = RateLimiter::from_provisioned(10, 100.0, true);
        limiter.record_consumed(consumed);
        assert_eq!(limiter.next_acquire(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_waits_for_previous_debt() {
        let mut limiter = RateLimiter::from_provisioned(2, 100.0, true);
        let now = Instant::now();
        assert_eq!(limiter.reserve(now), Duration::ZERO);
        assert_eq!(limiter.reserve(now), Duration::from_millis(500));
        limiter.record_consumed(5.0);
        assert_eq!(limiter.reserve(now), Duration::from_secs(1));
        assert_eq!(limiter.reserve(now), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_is_stored_up_to_one_second() {
        let mut limiter = RateLimiter::from_provisioned(4, 100.0, true);
        let start = Instant::now();
        let later = start + Duration::from_secs(10);
        for _ in 0..4 {
            assert_eq!(limiter.reserve(later), Duration::ZERO);
        }
        assert_eq!(limiter.reserve(later), Duration::ZERO);
        assert_eq!(limiter.reserve(later), Duration::from_millis(250));
    }

    #[rstest]
    #[case::disabled(RateLimiter::from_provisioned(1, 100.0, false))]
    #[case::on_demand(RateLimiter::from_provisioned(0, 100.0, true))]
    #[case::unlimited(RateLimiter::unlimited())]
    fn test_unthrottled_limiters_never_wait(#[case] mut limiter: RateLimiter) {
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(limiter.reserve(now), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_sleeps_between_acquisitions() {
        let throttle = Throttle::new(RateLimiter::from_provisioned(2, 100.0, true));
        let start = Instant::now();
        for _ in 0..3 {
            throttle.acquire().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1100));
    }
}
