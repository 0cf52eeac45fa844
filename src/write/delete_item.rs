use crate::{
    error::{Error, Result},
    expression::{ExpressionBuilder, condition::ConditionExpr},
    limiter::Mode,
    mapper::Mapper,
    record::{Record, RecordKey},
    schema::TableSchema,
    write,
};

use aws_sdk_dynamodb::{
    operation::delete_item::DeleteItemInput,
    types::{ReturnConsumedCapacity, ReturnValue},
};

/// Delete item operation.
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, record::RecordKey, write};
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let delete_item = write::delete_item::DeleteItem {
///     table_name: "players".to_string(),
///     key: RecordKey::new("p1"),
///     expected_revision: Some(3),
///     ..Default::default()
/// };
/// let deleted = delete_item.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteItem {
    /// The table to delete from.
    pub table_name: String,
    /// The key of the item to delete.
    pub key: RecordKey,
    /// The revision the item must still be at, on tables with optimistic locking.
    ///
    /// `None` or `Some(0)` deletes whatever revision is stored.
    pub expected_revision: Option<i64>,
    /// Additional condition over logical field paths.
    pub condition: Option<ConditionExpr>,
}

impl DeleteItem {
    /// Delete a loaded record, conditioned on the revision it was loaded at.
    pub fn of(table: &TableSchema, record: &Record) -> Result<Self> {
        Ok(Self {
            table_name: table.name.clone(),
            key: table.keys.key_of(record)?,
            expected_revision: Some(record.revision()),
            condition: None,
        })
    }

    pub(crate) fn input(&self, table: &TableSchema) -> Result<DeleteItemInput> {
        let key = table.keys.to_item(&self.key)?;
        let mut builder = ExpressionBuilder::new(table, "");
        if let Some(condition) = &self.condition {
            builder.condition(condition)?;
        }
        write::common::expect_revision(&mut builder, table, self.expected_revision.unwrap_or_default());
        let expression = builder.build();
        let context = write::common::context(&table.name, &key, &expression);
        let builder = DeleteItemInput::builder()
            .table_name(&table.name)
            .set_key(Some(key))
            .return_values(ReturnValue::AllOld)
            .return_consumed_capacity(ReturnConsumedCapacity::Total);
        write::common::apply_write_expression!(builder, expression)
            .build()
            .map_err(|error| Error::build(error, context))
    }

    /// Execute the delete item operation, returning the deleted record if one was stored.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.delete_item", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<Option<Record>> {
        let table = mapper.table(&self.table_name)?;
        let input = self.input(&table)?;
        let key = input.key.clone().unwrap_or_default();
        let throttle = mapper.acquire(&table.name, None, Mode::Write).await?;
        let output = match mapper.store().delete_item(input).await {
            Ok(output) => output,
            Err(error) => {
                let error = error.with_key(key);
                #[cfg(feature = "tracing")]
                if error.is_write_conflict() {
                    tracing::debug!(%error, "delete rejected by its condition");
                }
                return Err(error);
            }
        };
        Mapper::record_consumed(throttle.as_ref(), output.consumed_capacity.as_ref());
        match output.attributes {
            Some(item) if !item.is_empty() => mapper.load(&table, item, false).await.map(Some),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expression::condition::Condition,
        mapper::tests::{key, legacy, mapper, registry},
        record::Value,
        write::save_item::SaveItem,
    };

    use rstest::rstest;

    #[rstest]
    #[case::unconditional(None, None, None)]
    #[case::never_saved(Some(0), None, None)]
    #[case::expected_revision(Some(3), None, Some("#n0 = :v0"))]
    #[case::with_condition(
        Some(3),
        Some(ConditionExpr::leaf("name", Condition::Equals(Value::from("Player One")))),
        Some("#n0 = :v0 AND #n1 = :v1")
    )]
    fn test_delete_conditions(
        #[case] expected_revision: Option<i64>,
        #[case] condition: Option<ConditionExpr>,
        #[case] expected: Option<&str>,
    ) {
        let registry = registry();
        let table = registry.table("players").unwrap();
        let delete = DeleteItem {
            table_name: "players".to_string(),
            key: RecordKey::new("p1"),
            expected_revision,
            condition,
        };
        let input = delete.input(table).unwrap();
        assert_eq!(input.key, Some(key("p1")));
        assert_eq!(input.return_values, Some(ReturnValue::AllOld));
        assert_eq!(input.condition_expression.as_deref(), expected);
    }

    #[tokio::test]
    async fn test_delete_returns_old_record_and_rejects_stale_revision() {
        let (store, mapper) = mapper();
        let table = mapper.table("players").unwrap();
        let player = Record::new("Player").with("id", "p1").with("name", "Player One");
        let first = SaveItem::new("players", player).send(&mapper).await.unwrap();
        let second = SaveItem::new("players", first.clone().with("name", "Renamed"))
            .send(&mapper)
            .await
            .unwrap();

        let error = DeleteItem::of(&table, &first).unwrap().send(&mapper).await.unwrap_err();
        assert!(error.is_write_conflict());
        assert_eq!(error.context().unwrap().key, Some(key("p1")));
        assert!(store.item("players", &key("p1")).is_some());

        let deleted = DeleteItem::of(&table, &second).unwrap().send(&mapper).await.unwrap();
        assert_eq!(deleted, Some(second));
        assert!(store.item("players", &key("p1")).is_none());
    }

    #[tokio::test]
    async fn test_deleted_legacy_item_is_migrated_without_write_back() {
        let (store, mapper) = mapper();
        store.insert("players", legacy("p1", Some(1))).unwrap();
        let delete = DeleteItem {
            table_name: "players".to_string(),
            key: RecordKey::new("p1"),
            ..Default::default()
        };
        let deleted = delete.send(&mapper).await.unwrap().unwrap();
        assert_eq!(deleted.get("rank"), Some(&Value::from("bronze")));
        assert!(store.items("players").is_empty());
    }

    #[tokio::test]
    async fn test_missing_item_deletes_nothing() {
        let (_, mapper) = mapper();
        let delete = DeleteItem {
            table_name: "players".to_string(),
            key: RecordKey::new("ghost"),
            ..Default::default()
        };
        assert_eq!(delete.send(&mapper).await.unwrap(), None);
    }
}
