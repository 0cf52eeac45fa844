use crate::{
    error::{Error, Result},
    limiter::Mode,
    mapper::Mapper,
    record::Record,
    schema::TableSchema,
    write,
};

use aws_sdk_dynamodb::{operation::put_item::PutItemInput, types::ReturnConsumedCapacity};

/// Per-call options of a save.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SaveOptions {
    /// Whether an existing item with the same key may be replaced.
    pub overwrite: bool,
    /// Whether the revision is advanced and checked, on tables with optimistic locking.
    pub optimistic_locking: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            optimistic_locking: true,
        }
    }
}

/// The put of a whole record and the record as it will be stored.
pub(crate) fn input(
    table: &TableSchema,
    record: &Record,
    options: &SaveOptions,
    migrated: bool,
) -> Result<(PutItemInput, Record)> {
    let put = write::common::PutInput::new(table, record, options, migrated)?;
    let context = put.context(&table.name);
    let builder = PutItemInput::builder()
        .table_name(&table.name)
        .set_item(Some(put.item))
        .return_consumed_capacity(ReturnConsumedCapacity::Total);
    let input = write::common::apply_write_expression!(builder, put.expression)
        .build()
        .map_err(|error| Error::build(error, context))?;
    Ok((input, put.record))
}

pub(crate) async fn put(
    mapper: &Mapper,
    table: &TableSchema,
    record: &Record,
    options: &SaveOptions,
    migrated: bool,
) -> Result<Record> {
    let (input, outgoing) = input(table, record, options, migrated)?;
    let key = table.key_item(record)?;
    let throttle = mapper.acquire(&table.name, None, Mode::Write).await?;
    let output = match mapper.store().put_item(input).await {
        Ok(output) => output,
        Err(error) => {
            let error = error.with_key(key);
            #[cfg(feature = "tracing")]
            if error.is_write_conflict() {
                tracing::debug!(%error, "save rejected by its condition");
            }
            return Err(error);
        }
    };
    Mapper::record_consumed(throttle.as_ref(), output.consumed_capacity.as_ref());
    Ok(outgoing)
}

/// Save a whole record.
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, record::Record, write};
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let save = write::save_item::SaveItem {
///     table_name: "players".to_string(),
///     record: Record::new("Player").with("id", "p1").with("name", "Player One"),
///     options: write::save_item::SaveOptions {
///         overwrite: false,
///         ..Default::default()
///     },
/// };
/// let saved = save.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SaveItem {
    /// The table to write to.
    pub table_name: String,
    /// The record to store. Its revision is the one observed when it was loaded.
    pub record: Record,
    /// Overwrite and locking options.
    pub options: SaveOptions,
}

impl SaveItem {
    /// A save with default options.
    pub fn new(table_name: impl Into<String>, record: Record) -> Self {
        Self {
            table_name: table_name.into(),
            record,
            options: SaveOptions::default(),
        }
    }

    /// Execute the save, returning the record as stored.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.save_item", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<Record> {
        let table = mapper.table(&self.table_name)?;
        put(mapper, &table, &self.record, &self.options, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::{key, mapper, registry};

    use aws_sdk_dynamodb::types::AttributeValue;
    use rstest::rstest;
    use std::collections;

    fn player(revision: i64) -> Record {
        Record::new("Player")
            .with("id", "p1")
            .with("name", "Player One")
            .with_revision(revision)
    }

    #[rstest]
    #[case::fresh(
        player(0),
        SaveOptions::default(),
        false,
        None,
        None
    )]
    #[case::no_overwrite(
        player(0),
        SaveOptions { overwrite: false, ..Default::default() },
        false,
        Some("attribute_not_exists(#n0)"),
        Some(vec![("#n0", "id")])
    )]
    #[case::observed_revision(
        player(4),
        SaveOptions::default(),
        false,
        Some("#n0 = :v0"),
        Some(vec![("#n0", "_rev")])
    )]
    #[case::locking_disabled(
        player(4),
        SaveOptions { optimistic_locking: false, ..Default::default() },
        false,
        None,
        None
    )]
    #[case::write_back(
        player(4),
        SaveOptions::default(),
        true,
        Some("#n0 = :v0 AND (attribute_not_exists(#n1) OR #n1 < :v1)"),
        Some(vec![("#n0", "_rev"), ("#n1", "_v")])
    )]
    fn test_save_conditions(
        #[case] record: Record,
        #[case] options: SaveOptions,
        #[case] migrated: bool,
        #[case] condition: Option<&str>,
        #[case] names: Option<Vec<(&str, &str)>>,
    ) {
        let registry = registry();
        let table = registry.table("players").unwrap();
        let (input, outgoing) = input(table, &record, &options, migrated).unwrap();
        assert_eq!(input.condition_expression.as_deref(), condition);
        let names = names.map(|names| {
            names
                .into_iter()
                .map(|(alias, name)| (alias.to_string(), name.to_string()))
                .collect::<collections::HashMap<_, _>>()
        });
        assert_eq!(input.expression_attribute_names, names);
        let expected_revision = if options.optimistic_locking {
            record.revision() + 1
        } else {
            record.revision()
        };
        assert_eq!(outgoing.revision(), expected_revision);
        let item = input.item.unwrap();
        assert_eq!(item["_rev"], AttributeValue::N(expected_revision.to_string()));
        assert_eq!(item["_v"], AttributeValue::N("2".to_string()));
    }

    #[tokio::test]
    async fn test_fresh_record_cannot_be_created_twice() {
        let (store, mapper) = mapper();
        let save = SaveItem {
            table_name: "players".to_string(),
            record: player(0),
            options: SaveOptions {
                overwrite: false,
                ..Default::default()
            },
        };
        let saved = save.clone().send(&mapper).await.unwrap();
        assert_eq!(saved.revision(), 1);
        let error = save.send(&mapper).await.unwrap_err();
        assert!(error.is_write_conflict());
        let context = error.context().unwrap();
        assert_eq!(context.key, Some(key("p1")));
        assert_eq!(context.condition_expression.as_deref(), Some("attribute_not_exists(#n0)"));
        assert_eq!(store.items("players").len(), 1);
    }

    #[tokio::test]
    async fn test_revision_advances_by_one_and_stale_save_conflicts() {
        let (store, mapper) = mapper();
        let first = SaveItem::new("players", player(0)).send(&mapper).await.unwrap();
        let second = SaveItem::new("players", first.clone().with("name", "Renamed"))
            .send(&mapper)
            .await
            .unwrap();
        assert_eq!((first.revision(), second.revision()), (1, 2));
        let stored = store.item("players", &key("p1")).unwrap();
        assert_eq!(stored["_rev"], AttributeValue::N("2".to_string()));

        let error = SaveItem::new("players", first.with("name", "Stale"))
            .send(&mapper)
            .await
            .unwrap_err();
        assert!(error.is_write_conflict());
        assert_eq!(store.item("players", &key("p1")).unwrap(), stored);
    }
}
