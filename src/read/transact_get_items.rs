use crate::{
    common,
    error::{Error, RequestContext, Result},
    expression::ExpressionBuilder,
    limiter::Mode,
    mapper::Mapper,
    record::{Record, RecordKey},
};

use aws_sdk_dynamodb::{
    operation::transact_get_items::TransactGetItemsInput,
    types::{Get, ReturnConsumedCapacity, TransactGetItem},
};

/// One item of a read transaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactGet {
    /// The table to read from.
    pub table_name: String,
    /// The key of the item.
    pub key: RecordKey,
    /// Logical field paths to read. Empty reads the whole item.
    pub projection: Vec<String>,
}

/// Transact get items operation.
///
/// Reads every item as of one point in time.
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, read, record::RecordKey};
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let transact_get = read::transact_get_items::TransactGetItems {
///     items: vec![
///         read::transact_get_items::TransactGet {
///             table_name: "players".to_string(),
///             key: RecordKey::new("p1"),
///             ..Default::default()
///         },
///     ],
/// };
/// let records = transact_get.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactGetItems {
    /// The items to read.
    pub items: Vec<TransactGet>,
}

impl TransactGetItems {
    pub(crate) fn input(&self, mapper: &Mapper) -> Result<TransactGetItemsInput> {
        let mut transact_items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let table = mapper.table(&item.table_name)?;
            let key = table.keys.to_item(&item.key)?;
            let mut builder = ExpressionBuilder::new(&table, "");
            common::project(&mut builder, &table, &item.projection)?;
            let expression = builder.build();
            let context = RequestContext {
                key: Some(key.clone()),
                ..RequestContext::table(&table.name)
            };
            let get = Get::builder()
                .table_name(&table.name)
                .set_key(Some(key))
                .set_projection_expression(expression.projection_expression)
                .set_expression_attribute_names(expression.expression_attribute_names)
                .build()
                .map_err(|error| Error::build(error, context))?;
            transact_items.push(TransactGetItem::builder().get(get).build());
        }
        TransactGetItemsInput::builder()
            .set_transact_items(Some(transact_items))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .build()
            .map_err(|error| Error::build(error, RequestContext::table(self.table_names().join(","))))
    }

    fn table_names(&self) -> Vec<&str> {
        let mut tables: Vec<_> = self.items.iter().map(|item| item.table_name.as_str()).collect();
        tables.sort_unstable();
        tables.dedup();
        tables
    }

    /// Execute the transaction, returning one entry per requested item, `None` where nothing is stored.
    ///
    /// Loaded items are migrated but never written back.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.transact_get_items", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<Vec<Option<Record>>> {
        if self.items.is_empty() {
            return Ok(Vec::new());
        }
        let input = self.input(mapper)?;
        let throttles = mapper.acquire_all(self.table_names(), Mode::Read).await?;
        let output = mapper.store().transact_get_items(input).await?;
        Mapper::record_consumed_all(&throttles, output.consumed_capacity.as_deref());
        let responses = output.responses.unwrap_or_default();
        let mut records = Vec::with_capacity(self.items.len());
        for (item, response) in self.items.iter().zip(responses) {
            let record = match response.item {
                Some(stored) if !stored.is_empty() => {
                    let table = mapper.table(&item.table_name)?;
                    Some(mapper.load(&table, stored, false).await?)
                }
                _ => None,
            };
            records.push(record);
        }
        records.resize(self.items.len(), None);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapper::tests::{key, legacy, mapper},
        record::Value,
        write::save_item::SaveItem,
    };

    use aws_sdk_dynamodb::types::AttributeValue;

    fn get(id: &str) -> TransactGet {
        TransactGet {
            table_name: "players".to_string(),
            key: RecordKey::new(id),
            ..Default::default()
        }
    }

    #[test]
    fn test_input_has_one_get_per_item() {
        let (_, mapper) = mapper();
        let transaction = TransactGetItems {
            items: vec![get("p1"), get("p2")],
        };
        let items = transaction.input(&mapper).unwrap().transact_items.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get.as_ref().unwrap().key, key("p2"));
    }

    #[tokio::test]
    async fn test_transact_get_keeps_request_order() {
        let (store, mapper) = mapper();
        let player = Record::new("Player").with("id", "p2").with("name", "Two");
        let saved = SaveItem::new("players", player).send(&mapper).await.unwrap();
        store.insert("players", legacy("p3", Some(1))).unwrap();
        let transaction = TransactGetItems {
            items: vec![get("p1"), get("p2"), get("p3")],
        };
        let records = transaction.send(&mapper).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], None);
        assert_eq!(records[1], Some(saved));
        assert_eq!(records[2].as_ref().unwrap().get("rank"), Some(&Value::from("bronze")));
        assert_eq!(store.item("players", &key("p3")).unwrap()["_v"], AttributeValue::N("1".to_string()));
    }
}
