use crate::{
    common::{self, Item, Progress},
    error::{Error, RequestContext, Result},
    expression::{ExpressionBuilder, condition::ConditionExpr},
    mapper::Mapper,
    read::{self, common::PageRequest},
    schema::TableSchema,
};

use aws_sdk_dynamodb::{operation::scan::ScanInput, types::ReturnConsumedCapacity};

/// Scan operation.
///
/// ```rust,no_run
/// use dynamodb_mapper::{common::Progress, mapper::Mapper, read};
///
/// # async fn example(mapper: &Mapper) -> Result<(), Box<dyn std::error::Error>> {
/// let scan = read::scan::Scan {
///     table_name: "players".to_string(),
///     limit: Some(100),
///     ..Default::default()
/// };
/// let records = scan
///     .send_with_progress(mapper, |read| {
///         if read >= 1_000 { Progress::Stop } else { Progress::Continue }
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scan {
    /// The table to read from.
    pub table_name: String,
    /// A secondary index to scan instead of the table.
    pub index_name: Option<String>,
    /// Filter applied to the items read, over logical field paths.
    pub filter: Option<ConditionExpr>,
    /// Logical field paths to read. Empty reads whole items.
    pub projection: Vec<String>,
    /// Items evaluated per page.
    pub limit: Option<i32>,
    /// Where to resume a previous scan.
    pub exclusive_start_key: Option<Item>,
    /// The segment of a parallel scan this request reads.
    pub segment: Option<i32>,
    /// The number of segments of a parallel scan.
    pub total_segments: Option<i32>,
    /// Additional read arguments.
    pub read_args: read::common::ReadArgs,
}

impl Scan {
    pub(crate) fn input(&self, table: &TableSchema) -> Result<ScanInput> {
        if let Some(index_name) = &self.index_name {
            table.index(index_name)?;
        }
        let mut builder = ExpressionBuilder::new(table, "");
        if let Some(filter) = &self.filter {
            builder.condition(filter)?;
        }
        common::project(&mut builder, table, &self.projection)?;
        let expression = builder.build();
        let context = RequestContext {
            condition_expression: expression.condition_expression.clone(),
            expression_attribute_names: expression.expression_attribute_names.clone(),
            expression_attribute_values: expression.expression_attribute_values.clone(),
            ..RequestContext::table(&table.name)
        };
        ScanInput::builder()
            .table_name(&table.name)
            .set_index_name(self.index_name.clone())
            .set_filter_expression(expression.condition_expression)
            .set_projection_expression(expression.projection_expression)
            .set_expression_attribute_names(expression.expression_attribute_names)
            .set_expression_attribute_values(expression.expression_attribute_values)
            .set_limit(self.limit)
            .set_exclusive_start_key(self.exclusive_start_key.clone())
            .set_segment(self.segment)
            .set_total_segments(self.total_segments)
            .set_consistent_read(self.read_args.consistent_read)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .build()
            .map_err(|error| Error::build(error, context))
    }

    /// Execute the scan, reading every page.
    pub async fn send(self, mapper: &Mapper) -> Result<read::common::Records> {
        self.send_with_progress(mapper, |_| Progress::Continue).await
    }

    /// Execute the scan, asking `progress` after each page whether to read the next.
    ///
    /// `progress` receives the number of records read so far.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dynamodb_mapper.scan", skip_all, err))]
    pub async fn send_with_progress(
        self,
        mapper: &Mapper,
        progress: impl FnMut(usize) -> Progress,
    ) -> Result<read::common::Records> {
        let table = mapper.table(&self.table_name)?;
        let input = self.input(&table)?;
        let write_back = self.index_name.is_none() && self.projection.is_empty();
        read::common::paginate(mapper, &table, PageRequest::Scan(input), write_back, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expression::condition::Condition,
        mapper::tests::{key, legacy, mapper},
        record::{Record, Value},
        write::save_item::SaveItem,
    };

    use aws_sdk_dynamodb::types::AttributeValue;

    async fn seed(mapper: &Mapper, count: usize) {
        for index in 0..count {
            let player = Record::new("Player")
                .with("id", format!("p{index}"))
                .with("score", index as i64);
            SaveItem::new("players", player).send(mapper).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_scan_reads_every_page() {
        let (_, mapper) = mapper();
        seed(&mapper, 5).await;
        let scan = Scan {
            table_name: "players".to_string(),
            limit: Some(2),
            ..Default::default()
        };
        let mut pages = 0;
        let records = scan
            .send_with_progress(&mapper, |_| {
                pages += 1;
                Progress::Continue
            })
            .await
            .unwrap();
        assert_eq!(pages, 3);
        assert_eq!(records.records.len(), 5);
        assert_eq!(records.scanned_count, 5);
        assert_eq!(records.consumed_capacity.unwrap().capacity_units, Some(5.0));
    }

    #[tokio::test]
    async fn test_progress_stop_keeps_resume_key() {
        let (_, mapper) = mapper();
        seed(&mapper, 5).await;
        let scan = Scan {
            table_name: "players".to_string(),
            limit: Some(2),
            ..Default::default()
        };
        let records = scan
            .clone()
            .send_with_progress(&mapper, |_| Progress::Stop)
            .await
            .unwrap();
        assert_eq!(records.records.len(), 2);
        let resumed = Scan {
            exclusive_start_key: records.last_evaluated_key,
            ..scan
        }
        .send(&mapper)
        .await
        .unwrap();
        assert_eq!(resumed.records.len(), 3);
    }

    #[tokio::test]
    async fn test_filter_counts_scanned_items() {
        let (_, mapper) = mapper();
        seed(&mapper, 5).await;
        let scan = Scan {
            table_name: "players".to_string(),
            filter: Some(ConditionExpr::leaf("score", Condition::GreaterThanOrEqual(Value::from(3)))),
            ..Default::default()
        };
        let records = scan.send(&mapper).await.unwrap();
        assert_eq!(records.count, 2);
        assert_eq!(records.scanned_count, 5);
    }

    #[tokio::test]
    async fn test_projected_scan_does_not_write_back() {
        let (store, mapper) = mapper();
        store.insert("players", legacy("p1", Some(1))).unwrap();
        let projected = Scan {
            table_name: "players".to_string(),
            projection: vec!["name".to_string()],
            ..Default::default()
        };
        let records = projected.send(&mapper).await.unwrap();
        assert_eq!(records.records[0].get("rank"), Some(&Value::from("bronze")));
        assert_eq!(store.item("players", &key("p1")).unwrap()["_v"], AttributeValue::N("1".to_string()));

        let whole = Scan {
            table_name: "players".to_string(),
            ..Default::default()
        };
        whole.send(&mapper).await.unwrap();
        assert_eq!(store.item("players", &key("p1")).unwrap()["_v"], AttributeValue::N("2".to_string()));
    }
}
