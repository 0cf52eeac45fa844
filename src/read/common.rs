use crate::{
    common::{self, Item, Progress},
    error::Result,
    limiter::Mode,
    mapper::Mapper,
    record::Record,
    schema::TableSchema,
    store::Store,
};

use aws_sdk_dynamodb::{
    operation::{query::QueryInput, scan::ScanInput},
    types::ConsumedCapacity,
};

/// Arguments common to read operations.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ReadArgs {
    /// Whether to use a consistent read.
    ///
    /// `true` for strongly consistent reads, `false` or `None` for eventually consistent reads.
    /// Consistent reads consume more capacity units but guarantee you see the latest data.
    pub consistent_read: Option<bool>,
}

/// The records read by a query or scan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Records {
    /// Decoded records, migrated to the current schema version.
    pub records: Vec<Record>,
    /// Items returned across every page read.
    pub count: i32,
    /// Items evaluated across every page read, before filtering.
    pub scanned_count: i32,
    /// Where to resume, when reading stopped before the last page.
    pub last_evaluated_key: Option<Item>,
    /// Capacity consumed by every page read.
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// A paginated read.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PageRequest {
    Query(QueryInput),
    Scan(ScanInput),
}

struct Page {
    items: Vec<Item>,
    count: i32,
    scanned_count: i32,
    last_evaluated_key: Option<Item>,
    consumed_capacity: Option<ConsumedCapacity>,
}

impl PageRequest {
    fn index_name(&self) -> Option<&str> {
        match self {
            Self::Query(input) => input.index_name.as_deref(),
            Self::Scan(input) => input.index_name.as_deref(),
        }
    }

    fn set_exclusive_start_key(&mut self, key: Option<Item>) {
        match self {
            Self::Query(input) => input.exclusive_start_key = key,
            Self::Scan(input) => input.exclusive_start_key = key,
        }
    }

    async fn send(&self, store: &dyn Store) -> Result<Page> {
        let page = match self {
            Self::Query(input) => {
                let output = store.query(input.clone()).await?;
                Page {
                    items: output.items.unwrap_or_default(),
                    count: output.count,
                    scanned_count: output.scanned_count,
                    last_evaluated_key: output.last_evaluated_key,
                    consumed_capacity: output.consumed_capacity,
                }
            }
            Self::Scan(input) => {
                let output = store.scan(input.clone()).await?;
                Page {
                    items: output.items.unwrap_or_default(),
                    count: output.count,
                    scanned_count: output.scanned_count,
                    last_evaluated_key: output.last_evaluated_key,
                    consumed_capacity: output.consumed_capacity,
                }
            }
        };
        Ok(page)
    }
}

/// Read pages until the last one, or until `progress` asks to stop.
///
/// `progress` receives the running count of records after each page.
/// Migrated items are written back only when `write_back` holds.
pub(crate) async fn paginate(
    mapper: &Mapper,
    table: &TableSchema,
    mut request: PageRequest,
    write_back: bool,
    mut progress: impl FnMut(usize) -> Progress,
) -> Result<Records> {
    let mut records = Records::default();
    let mut capacities = Vec::new();
    loop {
        let throttle = mapper.acquire(&table.name, request.index_name(), Mode::Read).await?;
        let page = request.send(mapper.store()).await?;
        Mapper::record_consumed(throttle.as_ref(), page.consumed_capacity.as_ref());
        for item in page.items {
            records.records.push(mapper.load(table, item, write_back).await?);
        }
        records.count += page.count;
        records.scanned_count += page.scanned_count;
        capacities.extend(page.consumed_capacity);
        records.last_evaluated_key = page.last_evaluated_key;
        let stop = progress(records.records.len()) == Progress::Stop;
        if records.last_evaluated_key.is_none() || stop {
            break;
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(table = %table.name, read = records.records.len(), "reading next page");
        request.set_exclusive_start_key(records.last_evaluated_key.clone());
    }
    if !capacities.is_empty() {
        records.consumed_capacity = Some(common::aggregate_capacity(capacities));
    }
    Ok(records)
}
