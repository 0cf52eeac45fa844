use crate::{
    error::{Error, Result},
    limiter::Mode,
    mapper::Mapper,
    record::Record,
    update::Update,
    write,
};

use aws_sdk_dynamodb::{
    operation::update_item::UpdateItemInput,
    types::{ReturnConsumedCapacity, ReturnValue},
};

/// The update request of an update that writes anything, asking for the whole new item back.
pub(crate) fn input(update: &Update) -> Result<Option<UpdateItemInput>> {
    let expression = update.compile()?;
    if expression.update_expression.is_none() {
        return Ok(None);
    }
    let table = update.table();
    let context = write::common::context(&table.name, update.key(), &expression);
    let builder = UpdateItemInput::builder()
        .table_name(&table.name)
        .set_key(Some(update.key().clone()))
        .set_update_expression(expression.update_expression.clone())
        .return_values(ReturnValue::AllNew)
        .return_consumed_capacity(ReturnConsumedCapacity::Total);
    let input = write::common::apply_write_expression!(builder, expression)
        .build()
        .map_err(|error| Error::build(error, context))?;
    Ok(Some(input))
}

/// Update item operation.
///
/// Sends the compiled mutations of an [`Update`] and returns the record as
/// stored afterwards. An update that changes no persisted field returns its
/// view without calling the backend.
///
/// ```rust,no_run
/// use dynamodb_mapper::{mapper::Mapper, record::Record, write};
///
/// # async fn example(mapper: &Mapper, player: Record) -> Result<(), Box<dyn std::error::Error>> {
/// let mut update = mapper.update("players", player)?;
/// update.increment("score", 5)?;
/// let updated = write::update_item::UpdateItem { update }.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, PartialEq)]
pub struct UpdateItem {
    /// The pending mutations.
    pub update: Update,
}

impl From<Update> for UpdateItem {
    fn from(update: Update) -> Self {
        Self { update }
    }
}

impl UpdateItem {
    /// Execute the update item operation.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.update_item", skip_all, err))]
    pub async fn send(self, mapper: &Mapper) -> Result<Record> {
        let Some(input) = input(&self.update)? else {
            return self.update.view();
        };
        let table = self.update.table();
        let throttle = mapper.acquire(&table.name, None, Mode::Write).await?;
        let output = match mapper.store().update_item(input).await {
            Ok(output) => output,
            Err(error) => {
                let error = error.with_key(self.update.key().clone());
                #[cfg(feature = "tracing")]
                if error.is_write_conflict() {
                    tracing::debug!(%error, "update rejected by its condition");
                }
                return Err(error);
            }
        };
        Mapper::record_consumed(throttle.as_ref(), output.consumed_capacity.as_ref());
        match output.attributes {
            Some(item) => self.update.decode(&item),
            None => self.update.view(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapper::tests::{key, mapper},
        record::Value,
        write::save_item::SaveItem,
    };

    use aws_sdk_dynamodb::types::AttributeValue;

    async fn saved(mapper: &Mapper) -> Record {
        let player = Record::new("Player")
            .with("id", "p1")
            .with("name", "Player One")
            .with("score", 10);
        SaveItem::new("players", player).send(mapper).await.unwrap()
    }

    #[test]
    fn test_empty_update_has_no_input() {
        let (_, mapper) = mapper();
        let update = mapper
            .update("players", Record::new("Player").with("id", "p1"))
            .unwrap();
        assert_eq!(input(&update).unwrap(), None);
    }

    #[test]
    fn test_input_carries_key_and_conditions() {
        let (_, mapper) = mapper();
        let base = Record::new("Player").with("id", "p1").with_revision(1);
        let mut update = mapper.update("players", base).unwrap();
        update.set("name", "Renamed").unwrap();
        let input = input(&update).unwrap().unwrap();
        assert_eq!(input.key, Some(key("p1")));
        assert_eq!(input.return_values, Some(ReturnValue::AllNew));
        assert_eq!(input.update_expression.as_deref(), Some("SET #n0 = :v0, #n2 = :v2"));
        assert_eq!(input.condition_expression.as_deref(), Some("#n1 = :v1 AND #n2 = :v3"));
    }

    #[tokio::test]
    async fn test_increment_then_stale_increment_conflicts() {
        let (store, mapper) = mapper();
        let base = saved(&mapper).await;

        let mut first = mapper.update("players", base.clone()).unwrap();
        first.increment("score", 5).unwrap();
        let updated = UpdateItem::from(first).send(&mapper).await.unwrap();
        assert_eq!(updated.get("score"), Some(&Value::from(15)));
        assert_eq!(updated.revision(), 2);

        let mut second = mapper.update("players", base).unwrap();
        second.increment("score", 5).unwrap();
        let error = UpdateItem::from(second).send(&mapper).await.unwrap_err();
        assert!(error.is_write_conflict());
        let stored = store.item("players", &key("p1")).unwrap();
        assert_eq!(stored["score"], AttributeValue::N("15".to_string()));
        assert_eq!(stored["_rev"], AttributeValue::N("2".to_string()));
    }

    #[tokio::test]
    async fn test_empty_update_returns_base_without_backend_call() {
        let (store, mapper) = mapper();
        let base = saved(&mapper).await;
        store.clear_calls();
        let update = mapper.update("players", base.clone()).unwrap();
        let record = UpdateItem::from(update).send(&mapper).await.unwrap();
        assert_eq!(record, base);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_unpersisted_field_skips_backend() {
        let (store, mapper) = mapper();
        let base = saved(&mapper).await;
        store.clear_calls();
        let mut update = mapper.update("players", base.clone()).unwrap();
        update.set("scratch", "note").unwrap();
        assert!(!update.writes().unwrap());
        assert_eq!(input(&update).unwrap(), None);
        let record = UpdateItem::from(update).send(&mapper).await.unwrap();
        assert_eq!(record.get("scratch"), Some(&Value::from("note")));
        assert_eq!(record.revision(), base.revision());

        let mut ghost = mapper
            .update("players", Record::new("Player").with("id", "ghost"))
            .unwrap();
        ghost.set("scratch", "note").unwrap();
        UpdateItem::from(ghost).send(&mapper).await.unwrap();
        assert!(store.calls().is_empty());
        assert_eq!(store.item("players", &key("ghost")), None);
    }
}
