use crate::{
    common::{self, Item, Progress},
    error::{Error, RequestContext, Result},
    expression::{
        ExpressionBuilder,
        condition::{Condition, ConditionExpr},
    },
    mapper::Mapper,
    read::{self, common::PageRequest},
    record::Value,
    schema::TableSchema,
};

use aws_sdk_dynamodb::{operation::query::QueryInput, types::ReturnConsumedCapacity};

/// Query operation.
///
/// Reads the items sharing one partition key of a table or index, optionally
/// narrowed by a range key condition and a filter.
///
/// ```rust,no_run
/// use dynamodb_mapper::{expression::condition::Condition, mapper::Mapper, read};
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let query = read::query::Query {
///     table_name: "scores".to_string(),
///     hash: "p1".into(),
///     range: Some(Condition::BeginsWith("2024-".to_string())),
///     scan_index_forward: Some(false),
///     ..Default::default()
/// };
/// let records = query.send(mapper).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// The table to read from.
    pub table_name: String,
    /// A secondary index to query instead of the table.
    pub index_name: Option<String>,
    /// The partition key value.
    pub hash: Value,
    /// Optional condition on the range key.
    pub range: Option<Condition>,
    /// Filter applied to the items read, over logical field paths.
    pub filter: Option<ConditionExpr>,
    /// Logical field paths to read. Empty reads whole items.
    pub projection: Vec<String>,
    /// Whether to read the range key in ascending order.
    pub scan_index_forward: Option<bool>,
    /// Items evaluated per page.
    pub limit: Option<i32>,
    /// Where to resume a previous query.
    pub exclusive_start_key: Option<Item>,
    /// Additional read arguments.
    pub read_args: read::common::ReadArgs,
}

impl Query {
    pub(crate) fn input(&self, table: &TableSchema) -> Result<QueryInput> {
        let keys = table.key_accessor(self.index_name.as_deref())?;
        let mut builder = ExpressionBuilder::new(table, "");
        builder.key_condition(&[keys.hash.attribute.clone()], &Condition::Equals(self.hash.clone()))?;
        if let Some(range) = &self.range {
            let range_key = keys.range.as_ref().ok_or_else(|| {
                Error::contract(format!(
                    "`{}` has no range key to query on",
                    self.index_name.as_deref().unwrap_or(&table.name)
                ))
            })?;
            builder.key_condition(&[range_key.attribute.clone()], range)?;
        }
        if let Some(filter) = &self.filter {
            builder.condition(filter)?;
        }
        common::project(&mut builder, table, &self.projection)?;
        let expression = builder.build();
        let context = RequestContext {
            condition_expression: expression.key_condition_expression.clone(),
            expression_attribute_names: expression.expression_attribute_names.clone(),
            expression_attribute_values: expression.expression_attribute_values.clone(),
            ..RequestContext::table(&table.name)
        };
        QueryInput::builder()
            .table_name(&table.name)
            .set_index_name(self.index_name.clone())
            .set_key_condition_expression(expression.key_condition_expression)
            .set_filter_expression(expression.condition_expression)
            .set_projection_expression(expression.projection_expression)
            .set_expression_attribute_names(expression.expression_attribute_names)
            .set_expression_attribute_values(expression.expression_attribute_values)
            .set_scan_index_forward(self.scan_index_forward)
            .set_limit(self.limit)
            .set_exclusive_start_key(self.exclusive_start_key.clone())
            .set_consistent_read(self.read_args.consistent_read)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .build()
            .map_err(|error| Error::build(error, context))
    }

    /// Execute the query, reading every page.
    pub async fn send(self, mapper: &Mapper) -> Result<read::common::Records> {
        self.send_with_progress(mapper, |_| Progress::Continue).await
    }

    /// Execute the query, asking `progress` after each page whether to read the next.
    ///
    /// `progress` receives the number of records read so far.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.query", skip_all, err))]
    pub async fn send_with_progress(
        self,
        mapper: &Mapper,
        progress: impl FnMut(usize) -> Progress,
    ) -> Result<read::common::Records> {
        let table = mapper.table(&self.table_name)?;
        let input = self.input(&table)?;
        let write_back = self.index_name.is_none() && self.projection.is_empty();
        read::common::paginate(mapper, &table, PageRequest::Query(input), write_back, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapper::{Mapper, tests::config},
        record::Record,
        schema::Registry,
        store::memory::MemoryStore,
        write::save_item::SaveItem,
    };

    use rstest::rstest;
    use std::sync::Arc;

    const SCORES: &str = r#"{"tables": [{
        "name": "scores", "root_type": "Score", "hash_key": "player", "range_key": "game",
        "version": 1,
        "types": [{"name": "Score", "fields": [
            {"name": "player", "element_type": "string"},
            {"name": "game", "element_type": "string"},
            {"name": "points", "element_type": "long"},
            {"name": "note", "wire_name": "nt", "element_type": "string"}
        ]}],
        "indexes": [{"name": "by_game", "hash_key": "game", "range_key": "points", "projection": ["note"]}]
    }]}"#;

    fn mapper() -> (Arc<MemoryStore>, Mapper) {
        let registry = Arc::new(Registry::from_json(SCORES).unwrap());
        let store = Arc::new(MemoryStore::new(&registry));
        let mapper = Mapper::new(store.clone(), registry, config());
        (store, mapper)
    }

    async fn seeded() -> (Arc<MemoryStore>, Mapper) {
        let (store, mapper) = mapper();
        for (player, game, points) in [("p1", "g1", 30), ("p1", "g2", 10), ("p1", "g3", 20), ("p2", "g1", 5)] {
            let score = Record::new("Score")
                .with("player", player)
                .with("game", game)
                .with("points", points);
            SaveItem::new("scores", score).send(&mapper).await.unwrap();
        }
        store.clear_calls();
        (store, mapper)
    }

    fn games(records: &read::common::Records) -> Vec<&str> {
        records
            .records
            .iter()
            .filter_map(|record| record.get("game").and_then(Value::as_str))
            .collect()
    }

    #[rstest]
    #[case::hash_only(
        Query { hash: "p1".into(), ..Default::default() },
        Some("#n0 = :v0"),
        None
    )]
    #[case::range(
        Query { hash: "p1".into(), range: Some(Condition::BeginsWith("g".to_string())), ..Default::default() },
        Some("#n0 = :v0 AND begins_with(#n1, :v1)"),
        None
    )]
    #[case::filter(
        Query {
            hash: "p1".into(),
            filter: Some(ConditionExpr::leaf("note", Condition::Exists)),
            ..Default::default()
        },
        Some("#n0 = :v0"),
        Some("attribute_exists(#n1)")
    )]
    fn test_query_input(
        #[case] query: Query,
        #[case] key_condition: Option<&str>,
        #[case] filter: Option<&str>,
    ) {
        let registry = Registry::from_json(SCORES).unwrap();
        let table = registry.table("scores").unwrap();
        let input = query.input(table).unwrap();
        assert_eq!(input.key_condition_expression.as_deref(), key_condition);
        assert_eq!(input.filter_expression.as_deref(), filter);
        let names = input.expression_attribute_names.unwrap();
        assert_eq!(names["#n0"], "player");
    }

    #[test]
    fn test_range_condition_needs_key_operator() {
        let registry = Registry::from_json(SCORES).unwrap();
        let table = registry.table("scores").unwrap();
        let query = Query {
            hash: "p1".into(),
            range: Some(Condition::Contains(Value::from("g"))),
            ..Default::default()
        };
        assert!(matches!(query.input(table).unwrap_err(), Error::ContractViolation(_)));
    }

    #[tokio::test]
    async fn test_query_reads_in_range_order() {
        let (_, mapper) = seeded().await;
        let query = Query {
            table_name: "scores".to_string(),
            hash: "p1".into(),
            scan_index_forward: Some(false),
            ..Default::default()
        };
        let records = query.send(&mapper).await.unwrap();
        assert_eq!(games(&records), vec!["g3", "g2", "g1"]);
        assert_eq!(records.count, 3);
        assert_eq!(records.last_evaluated_key, None);
    }

    #[tokio::test]
    async fn test_query_index() {
        let (_, mapper) = seeded().await;
        let query = Query {
            table_name: "scores".to_string(),
            index_name: Some("by_game".to_string()),
            hash: "g1".into(),
            range: Some(Condition::GreaterThan(Value::from(10))),
            ..Default::default()
        };
        let records = query.send(&mapper).await.unwrap();
        assert_eq!(records.records.len(), 1);
        assert_eq!(records.records[0].get("points"), Some(&Value::from(30)));
    }

    #[tokio::test]
    async fn test_progress_stop_halts_pagination() {
        let (store, mapper) = seeded().await;
        let query = Query {
            table_name: "scores".to_string(),
            hash: "p1".into(),
            limit: Some(1),
            ..Default::default()
        };
        let mut seen = Vec::new();
        let records = query
            .send_with_progress(&mapper, |count| {
                seen.push(count);
                if count >= 2 { Progress::Stop } else { Progress::Continue }
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(games(&records), vec!["g1", "g2"]);
        assert!(records.last_evaluated_key.is_some());
        assert_eq!(store.calls().len(), 2);
    }
}
