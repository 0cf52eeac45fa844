//! The request orchestrator.
//!
//! A [`Mapper`] ties a [`Store`], a schema [`Registry`] and the per-table rate
//! limiters together. Requests in [`read`](crate::read) and
//! [`write`](crate::write) are executed against it.

use crate::{
    codec,
    common::{self, Item},
    error::{Error, Result},
    limiter::{LimiterCache, Mode, RateLimitConfig, Throttle},
    migration::{Migrator, Upgrade},
    record::Record,
    schema::{Registry, TableSchema},
    store::Store,
    update::Update,
    write,
};

use aws_sdk_dynamodb::types::ConsumedCapacity;
use std::{collections, sync::Arc, time::Duration};

/// Migration settings of a mapper.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationConfig {
    /// Whether items migrated on load are written back.
    pub write_back: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { write_back: true }
    }
}

/// How unprocessed batch items are resubmitted.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRetryPolicy {
    /// Calls per chunk before giving up, `None` for no limit.
    pub max_attempts: Option<u32>,
    /// Wait before the first resubmission.
    pub initial_delay: Duration,
    /// Upper bound of the doubling wait.
    pub max_delay: Duration,
}

impl Default for BatchRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BatchRetryPolicy {
    /// Resubmit until nothing is left, without waiting.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// The wait after the given (1-based) attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another call may follow the given (1-based) attempt.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max_attempts| attempt < max_attempts)
    }
}

/// Settings of a mapper.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapperConfig {
    /// Throughput limiting.
    pub rate_limit: RateLimitConfig,
    /// Lazy migration.
    pub migrations: MigrationConfig,
    /// Resubmission of unprocessed batch items.
    pub batch_retry: BatchRetryPolicy,
}

/// Executes requests against a store, following a schema registry.
///
/// ```rust,no_run
/// use aws_sdk_dynamodb::Client;
/// use dynamodb_mapper::{
///     mapper::{Mapper, MapperConfig},
///     record::{Record, RecordKey},
///     read::get_item::GetItem,
///     schema::Registry,
///     write::save_item::SaveItem,
/// };
/// use std::sync::Arc;
///
/// # async fn example(client: Client, registry: Registry) -> Result<(), Box<dyn std::error::Error>> {
/// let mapper = Mapper::new(Arc::new(client), Arc::new(registry), MapperConfig::default());
/// let player = Record::new("Player").with("id", "p1").with("name", "Player One");
/// SaveItem::new("players", player).send(&mapper).await?;
/// let loaded = GetItem {
///     table_name: "players".to_string(),
///     key: RecordKey::new("p1"),
///     ..Default::default()
/// }
/// .send(&mapper)
/// .await?;
/// # Ok(())
/// # }
/// ```
pub struct Mapper {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    config: MapperConfig,
    limiters: LimiterCache,
    migrator: Migrator,
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("config", &self.config)
            .field("limiters", &self.limiters)
            .finish_non_exhaustive()
    }
}

impl Mapper {
    /// A mapper over a store.
    pub fn new(store: Arc<dyn Store>, registry: Arc<Registry>, config: MapperConfig) -> Self {
        let limiters = LimiterCache::new(config.rate_limit.clone());
        Self {
            store,
            registry,
            config,
            limiters,
            migrator: Migrator::new(),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// The schema registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The settings.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// A table of the registry.
    pub fn table(&self, name: &str) -> Result<Arc<TableSchema>> {
        self.registry.table(name).cloned()
    }

    /// Start an update against a loaded record of a table.
    pub fn update(&self, table_name: &str, base: Record) -> Result<Update> {
        Update::new(self.table(table_name)?, base)
    }

    /// Wait for the limiter of a table or index and return it for feedback.
    pub(crate) async fn acquire(&self, table: &str, index: Option<&str>, mode: Mode) -> Result<Option<Throttle>> {
        let throttle = self.limiters.throttle(self.store(), table, index, mode).await?;
        if let Some(throttle) = &throttle {
            throttle.acquire().await;
        }
        Ok(throttle)
    }

    /// Wait for the limiters of several tables.
    pub(crate) async fn acquire_all<'a>(
        &self,
        tables: impl IntoIterator<Item = &'a str>,
        mode: Mode,
    ) -> Result<collections::HashMap<String, Throttle>> {
        let mut throttles = collections::HashMap::new();
        for table in tables {
            if throttles.contains_key(table) {
                continue;
            }
            if let Some(throttle) = self.acquire(table, None, mode).await? {
                throttles.insert(table.to_string(), throttle);
            }
        }
        Ok(throttles)
    }

    /// Feed the capacity of a multi-table call back to each table's limiter.
    pub(crate) fn record_consumed_all(
        throttles: &collections::HashMap<String, Throttle>,
        capacities: Option<&[ConsumedCapacity]>,
    ) {
        for capacity in capacities.unwrap_or_default() {
            let throttle = capacity
                .table_name
                .as_deref()
                .and_then(|table| throttles.get(table));
            if let Some(throttle) = throttle {
                throttle.record_consumed(capacity.capacity_units);
            }
        }
    }

    /// Feed the capacity of a call back to its limiter.
    pub(crate) fn record_consumed(throttle: Option<&Throttle>, capacity: Option<&ConsumedCapacity>) {
        if let Some(throttle) = throttle {
            throttle.record_consumed(common::capacity_units(capacity));
        }
    }

    /// Migrate and decode a loaded item.
    ///
    /// A migrated item is written back when `write_back` holds and write-back
    /// is enabled. Losing the write-back race to another writer is not an
    /// error; the migrated record is returned as loaded.
    pub(crate) async fn load(&self, table: &TableSchema, mut item: Item, write_back: bool) -> Result<Record> {
        let steps = self.registry.migrations(&table.name);
        let upgrade = self.migrator.upgrade(table, steps, &mut item)?;
        let record = codec::decode_record(table, &item)?;
        if !matches!(upgrade, Upgrade::Migrated { .. }) || !(write_back && self.config.migrations.write_back) {
            return Ok(record);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(table = %table.name, ?upgrade, to = table.version, "writing back migrated item");
        match write::save_item::put(self, table, &record, &write::save_item::SaveOptions::default(), true).await {
            Ok(saved) => Ok(saved),
            Err(error) if error.is_write_conflict() => {
                #[cfg(feature = "tracing")]
                tracing::debug!(table = %table.name, %error, "migrated item was written concurrently");
                Ok(record)
            }
            Err(error) => Err(error),
        }
    }

    /// Wait before resubmitting unprocessed batch work, or give up.
    pub(crate) async fn retry_unprocessed(&self, attempt: u32, remaining: usize) -> Result<()> {
        let policy = &self.config.batch_retry;
        if !policy.allows_retry(attempt) {
            return Err(Error::UnprocessedItems {
                remaining,
                attempts: attempt,
            });
        }
        let delay = policy.delay(attempt);
        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, remaining, ?delay, "resubmitting unprocessed batch items");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
