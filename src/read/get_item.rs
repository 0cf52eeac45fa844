use crate::{
    common,
    error::{Error, RequestContext, Result},
    expression::ExpressionBuilder,
    limiter::Mode,
    mapper::Mapper,
    read,
    record::{Record, RecordKey},
    schema::TableSchema,
};

use aws_sdk_dynamodb::{operation::get_item::GetItemInput, types::ReturnConsumedCapacity};

/// Get item operation.
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, read, record::RecordKey};
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let get_item = read::get_item::GetItem {
///     table_name: "players".to_string(),
///     key: RecordKey::new("p1"),
///     read_args: read::common::ReadArgs {
///         consistent_read: Some(true),
///     },
///     ..Default::default()
/// };
/// let player = get_item.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetItem {
    /// The table to read from.
    pub table_name: String,
    /// The key of the item.
    pub key: RecordKey,
    /// Logical field paths to read. Empty reads the whole item.
    pub projection: Vec<String>,
    /// Additional read arguments.
    pub read_args: read::common::ReadArgs,
}

impl GetItem {
    pub(crate) fn input(&self, table: &TableSchema) -> Result<GetItemInput> {
        let key = table.keys.to_item(&self.key)?;
        let mut builder = ExpressionBuilder::new(table, "");
        common::project(&mut builder, table, &self.projection)?;
        let expression = builder.build();
        let context = RequestContext {
            key: Some(key.clone()),
            ..RequestContext::table(&table.name)
        };
        GetItemInput::builder()
            .table_name(&table.name)
            .set_key(Some(key))
            .set_projection_expression(expression.projection_expression)
            .set_expression_attribute_names(expression.expression_attribute_names)
            .set_consistent_read(self.read_args.consistent_read)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .build()
            .map_err(|error| Error::build(error, context))
    }

    /// Execute the get item operation, returning `None` when no item is stored under the key.
    ///
    /// A whole item stored at an older schema version is migrated and, when
    /// enabled, written back.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.get_item", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<Option<Record>> {
        let table = mapper.table(&self.table_name)?;
        let input = self.input(&table)?;
        let throttle = mapper.acquire(&table.name, None, Mode::Read).await?;
        let output = mapper.store().get_item(input).await?;
        Mapper::record_consumed(throttle.as_ref(), output.consumed_capacity.as_ref());
        match output.item {
            Some(item) => {
                let record = mapper.load(&table, item, self.projection.is_empty()).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapper::tests::{key, legacy, mapper, registry},
        record::Value,
        write::save_item::SaveItem,
    };

    use aws_sdk_dynamodb::types::AttributeValue;
    use rstest::rstest;

    #[rstest]
    #[case::whole(vec![], None)]
    #[case::projected(vec!["name".to_string()], Some("#n0, #n1, #n2, #n3"))]
    fn test_get_item_input(#[case] projection: Vec<String>, #[case] expected: Option<&str>) {
        let registry = registry();
        let table = registry.table("players").unwrap();
        let get_item = GetItem {
            table_name: "players".to_string(),
            key: RecordKey::new("p1"),
            projection,
            ..Default::default()
        };
        let input = get_item.input(table).unwrap();
        assert_eq!(input.key, Some(key("p1")));
        assert_eq!(input.projection_expression.as_deref(), expected);
    }

    #[tokio::test]
    async fn test_get_saved_record() {
        let (_, mapper) = mapper();
        let player = Record::new("Player").with("id", "p1").with("name", "Player One");
        let saved = SaveItem::new("players", player).send(&mapper).await.unwrap();
        let get_item = GetItem {
            table_name: "players".to_string(),
            key: RecordKey::new("p1"),
            ..Default::default()
        };
        assert_eq!(get_item.send(&mapper).await.unwrap(), Some(saved));
    }

    #[tokio::test]
    async fn test_missing_item_is_none() {
        let (_, mapper) = mapper();
        let get_item = GetItem {
            table_name: "players".to_string(),
            key: RecordKey::new("ghost"),
            ..Default::default()
        };
        assert_eq!(get_item.send(&mapper).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_item_is_migrated_and_written_back() {
        let (store, mapper) = mapper();
        store.insert("players", legacy("p1", None)).unwrap();
        let get_item = GetItem {
            table_name: "players".to_string(),
            key: RecordKey::new("p1"),
            ..Default::default()
        };
        let record = get_item.send(&mapper).await.unwrap().unwrap();
        assert_eq!(record.get("rank"), Some(&Value::from("bronze")));
        assert_eq!(record.revision(), 1);
        let stored = store.item("players", &key("p1")).unwrap();
        assert_eq!(stored["_v"], AttributeValue::N("2".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_table_is_rejected() {
        let (_, mapper) = mapper();
        let get_item = GetItem {
            table_name: "ghosts".to_string(),
            ..Default::default()
        };
        let error = get_item.send(&mapper).await.unwrap_err();
        assert!(matches!(error, Error::ContractViolation(_)));
    }
}
