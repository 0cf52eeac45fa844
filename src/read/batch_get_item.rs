use crate::{
    common::Item,
    error::{Error, RequestContext, Result},
    limiter::Mode,
    mapper::Mapper,
    read,
    record::{Record, RecordKey},
};

use aws_sdk_dynamodb::{
    operation::batch_get_item::BatchGetItemInput,
    types::{KeysAndAttributes, ReturnConsumedCapacity},
};
use indexmap::IndexMap;
use std::collections;

/// Most keys the backend accepts in one batch call.
pub const MAX_BATCH_GET_KEYS: usize = 100;

type RequestItems = collections::HashMap<String, KeysAndAttributes>;

fn batch_context<'a>(tables: impl Iterator<Item = &'a String>) -> RequestContext {
    RequestContext::table(tables.map(String::as_str).collect::<Vec<_>>().join(","))
}

/// Batch get item operation.
///
/// Keys are sent in calls of at most [`MAX_BATCH_GET_KEYS`], repeated keys
/// once. Keys the backend leaves unprocessed are resubmitted according to the
/// mapper's [`BatchRetryPolicy`](crate::mapper::BatchRetryPolicy).
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, read, record::RecordKey};
/// use indexmap::IndexMap;
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let batch_get = read::batch_get_item::BatchGetItem {
///     items: IndexMap::from([(
///         "players".to_string(),
///         vec![RecordKey::new("p1"), RecordKey::new("p2")],
///     )]),
///     ..Default::default()
/// };
/// let records = batch_get.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchGetItem {
    /// Keys to read, by table name.
    pub items: IndexMap<String, Vec<RecordKey>>,
    /// Additional read arguments, applied to every table.
    pub read_args: read::common::ReadArgs,
}

impl BatchGetItem {
    /// The request items of each call, each within the per-call cap.
    pub(crate) fn request_items(&self, mapper: &Mapper) -> Result<Vec<RequestItems>> {
        let mut keys: Vec<(&String, Item)> = Vec::new();
        for (table_name, record_keys) in &self.items {
            let table = mapper.table(table_name)?;
            for record_key in record_keys {
                let key = table.keys.to_item(record_key)?;
                if !keys.iter().any(|(name, known)| *name == table_name && *known == key) {
                    keys.push((table_name, key));
                }
            }
        }
        keys.chunks(MAX_BATCH_GET_KEYS)
            .map(|chunk| {
                let mut grouped = IndexMap::<&String, Vec<Item>>::new();
                for (table_name, key) in chunk {
                    grouped.entry(*table_name).or_default().push(key.clone());
                }
                grouped
                    .into_iter()
                    .map(|(table_name, keys)| {
                        let keys_and_attributes = KeysAndAttributes::builder()
                            .set_keys(Some(keys))
                            .set_consistent_read(self.read_args.consistent_read)
                            .build()
                            .map_err(|error| Error::build(error, RequestContext::table(table_name)))?;
                        Ok((table_name.clone(), keys_and_attributes))
                    })
                    .collect::<Result<RequestItems>>()
            })
            .collect()
    }

    /// Execute the batch get item operation, returning the records found by table name.
    ///
    /// Every requested table has an entry. Records come in no particular order.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.batch_get_item", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<IndexMap<String, Vec<Record>>> {
        let mut records: IndexMap<String, Vec<Record>> =
            self.items.keys().map(|table_name| (table_name.clone(), Vec::new())).collect();
        for mut request_items in self.request_items(mapper)? {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let throttles = mapper
                    .acquire_all(request_items.keys().map(String::as_str), Mode::Read)
                    .await?;
                let context = batch_context(request_items.keys());
                let input = BatchGetItemInput::builder()
                    .set_request_items(Some(request_items))
                    .return_consumed_capacity(ReturnConsumedCapacity::Total)
                    .build()
                    .map_err(|error| Error::build(error, context))?;
                let output = mapper.store().batch_get_item(input).await?;
                Mapper::record_consumed_all(&throttles, output.consumed_capacity.as_deref());
                for (table_name, items) in output.responses.unwrap_or_default() {
                    let table = mapper.table(&table_name)?;
                    let found = records.entry(table_name).or_default();
                    for item in items {
                        found.push(mapper.load(&table, item, true).await?);
                    }
                }
                request_items = output.unprocessed_keys.unwrap_or_default();
                request_items.retain(|_, keys_and_attributes| !keys_and_attributes.keys.is_empty());
                if request_items.is_empty() {
                    break;
                }
                let remaining = request_items
                    .values()
                    .map(|keys_and_attributes| keys_and_attributes.keys.len())
                    .sum();
                mapper.retry_unprocessed(attempt, remaining).await?;
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapper::tests::{legacy, mapper},
        record::Value,
        write::batch_write_item::{BatchWriteItem, BatchWriteRequest},
    };

    use rstest::rstest;

    fn keys(count: usize) -> Vec<RecordKey> {
        (0..count).map(|index| RecordKey::new(format!("p{index}"))).collect()
    }

    fn batch(keys: Vec<RecordKey>) -> BatchGetItem {
        BatchGetItem {
            items: IndexMap::from([("players".to_string(), keys)]),
            ..Default::default()
        }
    }

    async fn seed(mapper: &Mapper, count: usize) {
        let puts = (0..count)
            .map(|index| BatchWriteRequest::Put(Record::new("Player").with("id", format!("p{index}"))))
            .collect();
        BatchWriteItem {
            items: IndexMap::from([("players".to_string(), puts)]),
        }
        .send(mapper)
        .await
        .unwrap();
    }

    #[rstest]
    #[case::one_call(keys(3), vec![3])]
    #[case::duplicates(vec![RecordKey::new("p1"), RecordKey::new("p1"), RecordKey::new("p2")], vec![2])]
    #[case::chunked(keys(250), vec![100, 100, 50])]
    fn test_request_items_are_chunked(#[case] keys: Vec<RecordKey>, #[case] expected: Vec<usize>) {
        let (_, mapper) = mapper();
        let sizes: Vec<_> = batch(keys)
            .request_items(&mapper)
            .unwrap()
            .into_iter()
            .map(|request_items| request_items["players"].keys.len())
            .collect();
        assert_eq!(sizes, expected);
    }

    #[tokio::test]
    async fn test_batch_get_returns_found_records() {
        let (store, mapper) = mapper();
        seed(&mapper, 3).await;
        store.clear_calls();
        let records = batch(keys(5)).send(&mapper).await.unwrap();
        let mut found: Vec<_> = records["players"]
            .iter()
            .filter_map(|record| record.get("id").and_then(Value::as_str))
            .collect();
        found.sort_unstable();
        assert_eq!(found, vec!["p0", "p1", "p2"]);
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unprocessed_keys_are_resubmitted() {
        let (store, mapper) = mapper();
        seed(&mapper, 4).await;
        store.clear_calls();
        store.fail_unprocessed(1);
        let records = batch(keys(4)).send(&mapper).await.unwrap();
        assert_eq!(records["players"].len(), 4);
        let sizes: Vec<_> = store.calls().into_iter().map(|call| call.items).collect();
        assert_eq!(sizes, vec![4, 2]);
    }

    #[tokio::test]
    async fn test_batch_loads_are_migrated() {
        let (store, mapper) = mapper();
        store.insert("players", legacy("p0", Some(1))).unwrap();
        let records = batch(keys(1)).send(&mapper).await.unwrap();
        assert_eq!(records["players"][0].get("rank"), Some(&Value::from("bronze")));
    }
}
