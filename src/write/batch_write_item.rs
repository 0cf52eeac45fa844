use crate::{
    codec,
    error::{Error, RequestContext, Result},
    limiter::Mode,
    mapper::Mapper,
    record::{Record, RecordKey},
    schema::TableSchema,
};

use aws_sdk_dynamodb::{
    operation::batch_write_item::BatchWriteItemInput,
    types::{DeleteRequest, PutRequest, ReturnConsumedCapacity, WriteRequest},
};
use indexmap::IndexMap;
use std::collections;

/// Most write requests the backend accepts in one batch call.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// A single request within a batch write operation.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchWriteRequest {
    /// Store a whole record, replacing any item under its key.
    Put(Record),
    /// Remove the item under a key.
    Delete(RecordKey),
}

impl BatchWriteRequest {
    /// Batch puts carry no condition; with optimistic locking the stored
    /// revision is still advanced past the observed one.
    fn to_write_request(&self, table: &TableSchema) -> Result<WriteRequest> {
        let context = || RequestContext::table(&table.name);
        let builder = match self {
            Self::Put(record) => {
                let mut outgoing = record.clone();
                if table.optimistic_locking {
                    outgoing.set_revision(record.revision() + 1);
                }
                let item = codec::encode_record(table, &outgoing)?;
                let put_request = PutRequest::builder()
                    .set_item(Some(item))
                    .build()
                    .map_err(|error| Error::build(error, context()))?;
                WriteRequest::builder().put_request(put_request)
            }
            Self::Delete(key) => {
                let key = table.keys.to_item(key)?;
                let delete_request = DeleteRequest::builder()
                    .set_key(Some(key))
                    .build()
                    .map_err(|error| Error::build(error, context()))?;
                WriteRequest::builder().delete_request(delete_request)
            }
        };
        Ok(builder.build())
    }
}

fn batch_context<'a>(tables: impl Iterator<Item = &'a String>) -> RequestContext {
    RequestContext::table(tables.map(String::as_str).collect::<Vec<_>>().join(","))
}

/// Batch write item operation.
///
/// Requests are sent in calls of at most [`MAX_BATCH_WRITE_ITEMS`], in the
/// order given. Requests the backend leaves unprocessed are resubmitted
/// according to the mapper's [`BatchRetryPolicy`](crate::mapper::BatchRetryPolicy).
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, record::{Record, RecordKey}, write};
/// use indexmap::IndexMap;
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let batch_write = write::batch_write_item::BatchWriteItem {
///     items: IndexMap::from([(
///         "players".to_string(),
///         vec![
///             write::batch_write_item::BatchWriteRequest::Put(
///                 Record::new("Player").with("id", "p1").with("name", "Player One"),
///             ),
///             write::batch_write_item::BatchWriteRequest::Delete(RecordKey::new("p2")),
///         ],
///     )]),
/// };
/// batch_write.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchWriteItem {
    /// Write requests by table name.
    pub items: IndexMap<String, Vec<BatchWriteRequest>>,
}

impl BatchWriteItem {
    /// One input per call, each within the per-call cap.
    pub(crate) fn inputs(&self, mapper: &Mapper) -> Result<Vec<BatchWriteItemInput>> {
        let mut requests = Vec::new();
        for (table_name, table_requests) in &self.items {
            let table = mapper.table(table_name)?;
            for request in table_requests {
                requests.push((table_name, request.to_write_request(&table)?));
            }
        }
        requests
            .chunks(MAX_BATCH_WRITE_ITEMS)
            .map(|chunk| {
                let mut request_items = collections::HashMap::<String, Vec<WriteRequest>>::new();
                for (table_name, request) in chunk {
                    request_items
                        .entry(table_name.to_string())
                        .or_default()
                        .push(request.clone());
                }
                let context = batch_context(request_items.keys());
                BatchWriteItemInput::builder()
                    .set_request_items(Some(request_items))
                    .return_consumed_capacity(ReturnConsumedCapacity::Total)
                    .build()
                    .map_err(|error| Error::build(error, context))
            })
            .collect()
    }

    /// Execute the batch write item operation.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.batch_write_item", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<()> {
        for input in self.inputs(mapper)? {
            let mut request_items = input.request_items.unwrap_or_default();
            let mut attempt = 0;
            loop {
                attempt += 1;
                let throttles = mapper
                    .acquire_all(request_items.keys().map(String::as_str), Mode::Write)
                    .await?;
                let context = batch_context(request_items.keys());
                let input = BatchWriteItemInput::builder()
                    .set_request_items(Some(request_items))
                    .return_consumed_capacity(ReturnConsumedCapacity::Total)
                    .build()
                    .map_err(|error| Error::build(error, context))?;
                let output = mapper.store().batch_write_item(input).await?;
                Mapper::record_consumed_all(&throttles, output.consumed_capacity.as_deref());
                request_items = output.unprocessed_items.unwrap_or_default();
                request_items.retain(|_, requests| !requests.is_empty());
                if request_items.is_empty() {
                    break;
                }
                let remaining = request_items.values().map(Vec::len).sum();
                mapper.retry_unprocessed(attempt, remaining).await?;
            }
        }
        Ok(())
    }
}
