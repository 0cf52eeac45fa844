//! The backend seam.
//!
//! Every request the mapper sends goes through [`Store`], one method per
//! backend operation, taking and returning the SDK's own input and output
//! shapes. [`Client`] is the production implementation.

/// In-process store that evaluates expressions itself.
#[cfg(any(test, feature = "memory-store"))]
pub mod memory;

use crate::{
    common::Item,
    error::{Error, RequestContext, Result},
};

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    Client,
    operation::{
        batch_get_item::{BatchGetItemInput, BatchGetItemOutput},
        batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput},
        delete_item::{DeleteItemInput, DeleteItemOutput},
        describe_table::{DescribeTableInput, DescribeTableOutput},
        get_item::{GetItemInput, GetItemOutput},
        put_item::{PutItemInput, PutItemOutput},
        query::{QueryInput, QueryOutput},
        scan::{ScanInput, ScanOutput},
        transact_get_items::{TransactGetItemsError, TransactGetItemsInput, TransactGetItemsOutput},
        transact_write_items::{TransactWriteItemsError, TransactWriteItemsInput, TransactWriteItemsOutput},
        update_item::{UpdateItemInput, UpdateItemOutput},
    },
    types::CancellationReason,
};
use std::collections;

/// One method per backend operation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read one item by key.
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput>;

    /// Write one whole item.
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput>;

    /// Apply an update expression to one item.
    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput>;

    /// Delete one item by key.
    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput>;

    /// Read one page of items sharing a partition key.
    async fn query(&self, input: QueryInput) -> Result<QueryOutput>;

    /// Read one page of a table or index.
    async fn scan(&self, input: ScanInput) -> Result<ScanOutput>;

    /// Read items by key across tables.
    async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput>;

    /// Put and delete items across tables.
    async fn batch_write_item(&self, input: BatchWriteItemInput) -> Result<BatchWriteItemOutput>;

    /// Read items atomically.
    async fn transact_get_items(&self, input: TransactGetItemsInput) -> Result<TransactGetItemsOutput>;

    /// Write items atomically.
    async fn transact_write_items(&self, input: TransactWriteItemsInput) -> Result<TransactWriteItemsOutput>;

    /// Describe a table, including its provisioned throughput.
    async fn describe_table(&self, input: DescribeTableInput) -> Result<DescribeTableOutput>;
}

/// apply the conditional write settings of an input to a fluent builder
macro_rules! apply_write_operation {
    ($builder:expr, $input:expr) => {
        $builder
            .set_condition_expression($input.condition_expression)
            .set_expression_attribute_names($input.expression_attribute_names)
            .set_expression_attribute_values($input.expression_attribute_values)
            .set_return_consumed_capacity($input.return_consumed_capacity)
            .set_return_item_collection_metrics($input.return_item_collection_metrics)
            .set_return_values($input.return_values)
            .set_return_values_on_condition_check_failure($input.return_values_on_condition_check_failure)
            .set_table_name($input.table_name)
    };
}

/// apply the paginated read settings of an input to a fluent builder
macro_rules! apply_multiple_read_operation {
    ($builder:expr, $input:expr) => {
        $builder
            .set_consistent_read($input.consistent_read)
            .set_exclusive_start_key($input.exclusive_start_key)
            .set_expression_attribute_names($input.expression_attribute_names)
            .set_expression_attribute_values($input.expression_attribute_values)
            .set_filter_expression($input.filter_expression)
            .set_index_name($input.index_name)
            .set_limit($input.limit)
            .set_projection_expression($input.projection_expression)
            .set_return_consumed_capacity($input.return_consumed_capacity)
            .set_select($input.select)
            .set_table_name($input.table_name)
    };
}

fn context(
    table_name: &Option<String>,
    key: &Option<Item>,
    update_expression: &Option<String>,
    condition_expression: &Option<String>,
    expression_attribute_names: &Option<collections::HashMap<String, String>>,
    expression_attribute_values: &Option<Item>,
) -> RequestContext {
    RequestContext {
        table_name: table_name.clone().unwrap_or_default(),
        key: key.clone(),
        update_expression: update_expression.clone(),
        condition_expression: condition_expression.clone(),
        expression_attribute_names: expression_attribute_names.clone(),
        expression_attribute_values: expression_attribute_values.clone(),
    }
}

fn tables_context<'a>(tables: impl Iterator<Item = &'a str>) -> RequestContext {
    let mut names: Vec<_> = tables.collect();
    names.sort_unstable();
    names.dedup();
    RequestContext::table(names.join(","))
}

fn with_reasons(mut error: Error, cancellation_reasons: Option<Vec<CancellationReason>>) -> Error {
    if let Error::TransactionCancelled { reasons, .. } = &mut error {
        *reasons = cancellation_reasons
            .unwrap_or_default()
            .into_iter()
            .map(|reason| reason.code.unwrap_or_else(|| "None".to_string()))
            .collect();
    }
    error
}

#[async_trait]
impl Store for Client {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput> {
        let context = context(&input.table_name, &input.key, &None, &None, &input.expression_attribute_names, &None);
        self.get_item()
            .set_consistent_read(input.consistent_read)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_key(input.key)
            .set_projection_expression(input.projection_expression)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .set_table_name(input.table_name)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput> {
        let context = context(
            &input.table_name,
            &None,
            &None,
            &input.condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let builder = self.put_item().set_item(input.item);
        apply_write_operation!(builder, input)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput> {
        let context = context(
            &input.table_name,
            &input.key,
            &input.update_expression,
            &input.condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let builder = self
            .update_item()
            .set_key(input.key)
            .set_update_expression(input.update_expression);
        apply_write_operation!(builder, input)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput> {
        let context = context(
            &input.table_name,
            &input.key,
            &None,
            &input.condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let builder = self.delete_item().set_key(input.key);
        apply_write_operation!(builder, input)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput> {
        let context = context(
            &input.table_name,
            &None,
            &None,
            &input.key_condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let builder = self
            .query()
            .set_key_condition_expression(input.key_condition_expression)
            .set_scan_index_forward(input.scan_index_forward);
        apply_multiple_read_operation!(builder, input)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput> {
        let context = context(
            &input.table_name,
            &None,
            &None,
            &input.filter_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let builder = self
            .scan()
            .set_segment(input.segment)
            .set_total_segments(input.total_segments);
        apply_multiple_read_operation!(builder, input)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput> {
        let context = tables_context(input.request_items.iter().flatten().map(|(table, _)| table.as_str()));
        self.batch_get_item()
            .set_request_items(input.request_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn batch_write_item(&self, input: BatchWriteItemInput) -> Result<BatchWriteItemOutput> {
        let context = tables_context(input.request_items.iter().flatten().map(|(table, _)| table.as_str()));
        self.batch_write_item()
            .set_request_items(input.request_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .set_return_item_collection_metrics(input.return_item_collection_metrics)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }

    async fn transact_get_items(&self, input: TransactGetItemsInput) -> Result<TransactGetItemsOutput> {
        let context = tables_context(
            input
                .transact_items
                .iter()
                .flatten()
                .filter_map(|item| item.get.as_ref())
                .map(|get| get.table_name.as_str()),
        );
        self.transact_get_items()
            .set_transact_items(input.transact_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(|error| {
                let reasons = match error.as_service_error() {
                    Some(TransactGetItemsError::TransactionCanceledException(exception)) => {
                        exception.cancellation_reasons.clone()
                    }
                    _ => None,
                };
                with_reasons(Error::from_sdk(error, context), reasons)
            })
    }

    async fn transact_write_items(&self, input: TransactWriteItemsInput) -> Result<TransactWriteItemsOutput> {
        let context = tables_context(input.transact_items.iter().flatten().filter_map(|item| {
            item.put
                .as_ref()
                .map(|put| put.table_name.as_str())
                .or_else(|| item.update.as_ref().map(|update| update.table_name.as_str()))
                .or_else(|| item.delete.as_ref().map(|delete| delete.table_name.as_str()))
                .or_else(|| item.condition_check.as_ref().map(|check| check.table_name.as_str()))
        }));
        self.transact_write_items()
            .set_transact_items(input.transact_items)
            .set_client_request_token(input.client_request_token)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .set_return_item_collection_metrics(input.return_item_collection_metrics)
            .send()
            .await
            .map_err(|error| {
                let reasons = match error.as_service_error() {
                    Some(TransactWriteItemsError::TransactionCanceledException(exception)) => {
                        exception.cancellation_reasons.clone()
                    }
                    _ => None,
                };
                with_reasons(Error::from_sdk(error, context), reasons)
            })
    }

    async fn describe_table(&self, input: DescribeTableInput) -> Result<DescribeTableOutput> {
        let context = RequestContext::table(input.table_name.clone().unwrap_or_default());
        self.describe_table()
            .set_table_name(input.table_name)
            .send()
            .await
            .map_err(|error| Error::from_sdk(error, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use aws_sdk_dynamodb::types::AttributeValue;

    #[test]
    fn test_cancellation_reasons_are_attached() {
        let error = Error::TransactionCancelled {
            reasons: Vec::new(),
            context: Box::new(RequestContext::table("t")),
        };
        let reasons = vec![
            CancellationReason::builder().code("None").build(),
            CancellationReason::builder().code("ConditionalCheckFailed").build(),
            CancellationReason::builder().build(),
        ];
        let Error::TransactionCancelled { reasons, .. } = with_reasons(error, Some(reasons)) else {
            panic!("expected a cancelled transaction");
        };
        assert_eq!(reasons, vec!["None", "ConditionalCheckFailed", "None"]);
    }

    #[test]
    fn test_context_copies_the_request() {
        let key = Item::from([("id".to_string(), AttributeValue::S("a".to_string()))]);
        let context = context(
            &Some("t".to_string()),
            &Some(key.clone()),
            &Some("SET #n0 = :v0".to_string()),
            &None,
            &None,
            &None,
        );
        assert_eq!(context.table_name, "t");
        assert_eq!(context.key, Some(key));
        assert_eq!(context.update_expression.as_deref(), Some("SET #n0 = :v0"));
    }

    #[test]
    fn test_tables_context_lists_each_table_once() {
        let context = tables_context(["b", "a", "b"].into_iter());
        assert_eq!(context.table_name, "a,b");
    }
}
