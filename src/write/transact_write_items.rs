use crate::{
    error::{Error, RequestContext, Result},
    expression::{ExpressionBuilder, condition::ConditionExpr},
    limiter::Mode,
    mapper::Mapper,
    record::{Record, RecordKey},
    update::Update,
    write::{self, delete_item::DeleteItem, save_item::SaveOptions},
};

use aws_sdk_dynamodb::{
    operation::transact_write_items::TransactWriteItemsInput,
    types::{ConditionCheck, Delete, Put, ReturnConsumedCapacity, TransactWriteItem},
};

/// One item of a write transaction.
#[derive(Debug, PartialEq)]
pub enum TransactWrite {
    /// Store a whole record, with the same conditions as a save.
    Put {
        /// The table to write to.
        table_name: String,
        /// The record to store.
        record: Record,
        /// Overwrite and locking options.
        options: SaveOptions,
    },
    /// Apply pending mutations. An update without mutations is left out of the transaction.
    Update(Update),
    /// Delete an item.
    Delete(DeleteItem),
    /// Require a condition to hold on an item without writing it.
    ConditionCheck {
        /// The table of the item.
        table_name: String,
        /// The key of the item.
        key: RecordKey,
        /// The condition over logical field paths.
        condition: ConditionExpr,
    },
}

impl TransactWrite {
    /// The transaction item and the record it leaves stored, if any.
    fn to_transact_item(&self, mapper: &Mapper) -> Result<Option<(TransactWriteItem, Option<Record>)>> {
        let built = match self {
            Self::Put {
                table_name,
                record,
                options,
            } => {
                let table = mapper.table(table_name)?;
                let (input, stored) = write::save_item::input(&table, record, options, false)?;
                let context = RequestContext::table(table_name);
                let put = Put::builder()
                    .set_table_name(input.table_name)
                    .set_item(input.item)
                    .set_condition_expression(input.condition_expression)
                    .set_expression_attribute_names(input.expression_attribute_names)
                    .set_expression_attribute_values(input.expression_attribute_values)
                    .build()
                    .map_err(|error| Error::build(error, context))?;
                (TransactWriteItem::builder().put(put).build(), Some(stored))
            }
            Self::Update(update) => {
                let Some(input) = write::update_item::input(update)? else {
                    return Ok(None);
                };
                let context = RequestContext::table(&update.table().name);
                let update_item = aws_sdk_dynamodb::types::Update::builder()
                    .set_table_name(input.table_name)
                    .set_key(input.key)
                    .set_update_expression(input.update_expression)
                    .set_condition_expression(input.condition_expression)
                    .set_expression_attribute_names(input.expression_attribute_names)
                    .set_expression_attribute_values(input.expression_attribute_values)
                    .build()
                    .map_err(|error| Error::build(error, context))?;
                let view = update.view()?;
                (TransactWriteItem::builder().update(update_item).build(), Some(view))
            }
            Self::Delete(delete) => {
                let table = mapper.table(&delete.table_name)?;
                let input = delete.input(&table)?;
                let context = RequestContext::table(&delete.table_name);
                let delete = Delete::builder()
                    .set_table_name(input.table_name)
                    .set_key(input.key)
                    .set_condition_expression(input.condition_expression)
                    .set_expression_attribute_names(input.expression_attribute_names)
                    .set_expression_attribute_values(input.expression_attribute_values)
                    .build()
                    .map_err(|error| Error::build(error, context))?;
                (TransactWriteItem::builder().delete(delete).build(), None)
            }
            Self::ConditionCheck {
                table_name,
                key,
                condition,
            } => {
                let table = mapper.table(table_name)?;
                let key = table.keys.to_item(key)?;
                let mut builder = ExpressionBuilder::new(&table, "");
                builder.condition(condition)?;
                let expression = builder.build();
                let context = write::common::context(table_name, &key, &expression);
                let builder = ConditionCheck::builder().table_name(table_name).set_key(Some(key));
                let check = write::common::apply_write_expression!(builder, expression)
                    .build()
                    .map_err(|error| Error::build(error, context))?;
                (TransactWriteItem::builder().condition_check(check).build(), None)
            }
        };
        Ok(Some(built))
    }

    fn table_name(&self) -> &str {
        match self {
            Self::Put { table_name, .. } | Self::ConditionCheck { table_name, .. } => table_name,
            Self::Update(update) => &update.table().name,
            Self::Delete(delete) => &delete.table_name,
        }
    }
}

/// Transact write items operation.
///
/// Every item is applied or none is. A failed condition on any item cancels
/// the whole transaction with [`Error::TransactionCancelled`], which lists one
/// reason code per submitted item.
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, record::Record, write};
///
/// # async fn example(mapper: &Mapper, player: Record) -> Result<(), Box<dyn std::error::Error>> {
/// let mut update = mapper.update("players", player)?;
/// update.increment("score", 5)?;
/// let transact_write = write::transact_write_items::TransactWriteItems {
///     items: vec![
///         write::transact_write_items::TransactWrite::Update(update),
///         write::transact_write_items::TransactWrite::Put {
///             table_name: "players".to_string(),
///             record: Record::new("Player").with("id", "p2"),
///             options: Default::default(),
///         },
///     ],
///     ..Default::default()
/// };
/// transact_write.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, PartialEq)]
pub struct TransactWriteItems {
    /// The items, applied atomically.
    pub items: Vec<TransactWrite>,
    /// Idempotency token of the request.
    pub client_request_token: Option<String>,
}

impl TransactWriteItems {
    /// The transaction input and, per item, the record it leaves stored.
    pub(crate) fn input(&self, mapper: &Mapper) -> Result<(TransactWriteItemsInput, Vec<Option<Record>>)> {
        let mut transact_items = Vec::with_capacity(self.items.len());
        let mut stored = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match item.to_transact_item(mapper)? {
                Some((transact_item, record)) => {
                    transact_items.push(transact_item);
                    stored.push(record);
                }
                None => stored.push(item_view(item)?),
            }
        }
        let context = self.context();
        let input = TransactWriteItemsInput::builder()
            .set_transact_items(Some(transact_items))
            .set_client_request_token(self.client_request_token.clone())
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .build()
            .map_err(|error| Error::build(error, context))?;
        Ok((input, stored))
    }

    fn context(&self) -> RequestContext {
        let mut tables: Vec<_> = self.items.iter().map(TransactWrite::table_name).collect();
        tables.sort_unstable();
        tables.dedup();
        RequestContext::table(tables.join(","))
    }

    /// Execute the transaction, returning per item the record it left stored.
    ///
    /// Puts and updates yield the stored record; deletes and condition checks yield `None`.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.transact_write_items", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<Vec<Option<Record>>> {
        let (input, stored) = self.input(mapper)?;
        if input.transact_items.as_ref().is_none_or(Vec::is_empty) {
            return Ok(stored);
        }
        let throttles = mapper
            .acquire_all(self.items.iter().map(TransactWrite::table_name), Mode::Write)
            .await?;
        let output = match mapper.store().transact_write_items(input).await {
            Ok(output) => output,
            Err(error) => {
                #[cfg(feature = "tracing")]
                if let Error::TransactionCancelled { reasons, .. } = &error {
                    tracing::debug!(?reasons, "write transaction cancelled");
                }
                return Err(error);
            }
        };
        Mapper::record_consumed_all(&throttles, output.consumed_capacity.as_deref());
        Ok(stored)
    }
}

/// What an item left out of the transaction stands for.
fn item_view(item: &TransactWrite) -> Result<Option<Record>> {
    match item {
        TransactWrite::Update(update) => update.view().map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expression::condition::Condition,
        mapper::tests::{key, mapper},
        record::Value,
        write::save_item::SaveItem,
    };

    use aws_sdk_dynamodb::types::AttributeValue;

    async fn saved(mapper: &Mapper, id: &str) -> Record {
        let player = Record::new("Player").with("id", id).with("score", 10);
        SaveItem::new("players", player).send(mapper).await.unwrap()
    }

    #[tokio::test]
    async fn test_input_builds_one_item_per_request() {
        let (_, mapper) = mapper();
        let mut update = mapper
            .update("players", Record::new("Player").with("id", "p1").with_revision(1))
            .unwrap();
        update.increment("score", 1).unwrap();
        let transaction = TransactWriteItems {
            items: vec![
                TransactWrite::Update(update),
                TransactWrite::Delete(DeleteItem {
                    table_name: "players".to_string(),
                    key: RecordKey::new("p2"),
                    ..Default::default()
                }),
                TransactWrite::ConditionCheck {
                    table_name: "players".to_string(),
                    key: RecordKey::new("p3"),
                    condition: ConditionExpr::leaf("name", Condition::Exists),
                },
                TransactWrite::Update(mapper.update("players", Record::new("Player").with("id", "p4")).unwrap()),
            ],
            client_request_token: Some("token".to_string()),
        };
        let (input, stored) = transaction.input(&mapper).unwrap();
        let items = input.transact_items.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items[0].update.is_some());
        assert!(items[1].delete.is_some());
        let check = items[2].condition_check.as_ref().unwrap();
        assert_eq!(check.condition_expression, "attribute_exists(#n0)");
        assert_eq!(input.client_request_token.as_deref(), Some("token"));
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[0].as_ref().unwrap().get("score"), Some(&Value::from(1)));
        assert_eq!(stored[3], Some(Record::new("Player").with("id", "p4")));
    }

    #[tokio::test]
    async fn test_transaction_applies_every_item() {
        let (store, mapper) = mapper();
        let p1 = saved(&mapper, "p1").await;
        saved(&mapper, "p2").await;
        let mut update = mapper.update("players", p1).unwrap();
        update.increment("score", 5).unwrap();
        let transaction = TransactWriteItems {
            items: vec![
                TransactWrite::Update(update),
                TransactWrite::Delete(DeleteItem {
                    table_name: "players".to_string(),
                    key: RecordKey::new("p2"),
                    ..Default::default()
                }),
                TransactWrite::Put {
                    table_name: "players".to_string(),
                    record: Record::new("Player").with("id", "p3"),
                    options: SaveOptions {
                        overwrite: false,
                        ..Default::default()
                    },
                },
            ],
            ..Default::default()
        };
        let stored = transaction.send(&mapper).await.unwrap();
        assert_eq!(stored[0].as_ref().unwrap().revision(), 2);
        assert_eq!(stored[1], None);
        assert_eq!(stored[2].as_ref().unwrap().revision(), 1);
        let p1 = store.item("players", &key("p1")).unwrap();
        assert_eq!(p1["score"], AttributeValue::N("15".to_string()));
        assert!(store.item("players", &key("p2")).is_none());
        assert!(store.item("players", &key("p3")).is_some());
    }

    #[tokio::test]
    async fn test_failed_condition_cancels_everything() {
        let (store, mapper) = mapper();
        let p1 = saved(&mapper, "p1").await;
        let mut update = mapper.update("players", p1).unwrap();
        update.increment("score", 5).unwrap();
        let transaction = TransactWriteItems {
            items: vec![
                TransactWrite::Update(update),
                TransactWrite::ConditionCheck {
                    table_name: "players".to_string(),
                    key: RecordKey::new("p1"),
                    condition: ConditionExpr::leaf("name", Condition::Exists),
                },
            ],
            ..Default::default()
        };
        let error = transaction.send(&mapper).await.unwrap_err();
        match error {
            Error::TransactionCancelled { reasons, .. } => {
                assert_eq!(reasons, vec!["None".to_string(), "ConditionalCheckFailed".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let p1 = store.item("players", &key("p1")).unwrap();
        assert_eq!(p1["score"], AttributeValue::N("10".to_string()));
    }

    #[tokio::test]
    async fn test_empty_transaction_skips_backend() {
        let (store, mapper) = mapper();
        let update = mapper.update("players", Record::new("Player").with("id", "p1")).unwrap();
        let mut unpersisted = mapper.update("players", Record::new("Player").with("id", "ghost")).unwrap();
        unpersisted.set("scratch", "note").unwrap();
        let stored = TransactWriteItems {
            items: vec![TransactWrite::Update(update), TransactWrite::Update(unpersisted)],
            ..Default::default()
        }
        .send(&mapper)
        .await
        .unwrap();
        assert_eq!(
            stored,
            vec![
                Some(Record::new("Player").with("id", "p1")),
                Some(Record::new("Player").with("id", "ghost").with("scratch", "note")),
            ]
        );
        assert!(store.calls().is_empty());
        assert!(store.item("players", &key("ghost")).is_none());
    }
}
