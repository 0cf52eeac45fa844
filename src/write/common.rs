use crate::{
    codec,
    common::Item,
    error::{RequestContext, Result},
    expression::{CompiledExpression, ExpressionBuilder},
    record::Record,
    schema::TableSchema,
    write::save_item::SaveOptions,
};

use aws_sdk_dynamodb::types::AttributeValue;

/// apply the compiled condition and alias maps to a write builder
macro_rules! apply_write_expression {
    ($builder:expr, $expression:expr) => {
        $builder
            .set_condition_expression($expression.condition_expression)
            .set_expression_attribute_names($expression.expression_attribute_names)
            .set_expression_attribute_values($expression.expression_attribute_values)
    };
}

pub(crate) use apply_write_expression;

/// Condition a write on the stored revision still being `observed`.
///
/// Nothing is added for tables without optimistic locking, or for a record
/// that was never saved.
pub(crate) fn expect_revision(builder: &mut ExpressionBuilder<'_>, table: &TableSchema, observed: i64) {
    if table.optimistic_locking && observed != 0 {
        builder.condition_equals(
            &[table.revision_attribute.clone()],
            AttributeValue::N(observed.to_string()),
        );
    }
}

/// The encoded parts of a whole-record put, shared by single, batch and
/// transactional writes.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PutInput {
    pub(crate) item: Item,
    pub(crate) key: Item,
    pub(crate) expression: CompiledExpression,
    /// The record as it will be stored, revision advanced.
    pub(crate) record: Record,
}

impl PutInput {
    /// Encode a record and collect its write conditions.
    ///
    /// With optimistic locking the stored revision is the observed one plus
    /// one, and the write is conditioned on the stored revision still being
    /// the observed one. Without `overwrite` the write is conditioned on no
    /// item existing under the key. A write-back of a migrated item is
    /// further conditioned on the stored version being older than the table's.
    pub(crate) fn new(table: &TableSchema, record: &Record, options: &SaveOptions, migrated: bool) -> Result<Self> {
        let locking = table.optimistic_locking && options.optimistic_locking;
        let mut outgoing = record.clone();
        if locking {
            outgoing.set_revision(record.revision() + 1);
        }
        let item = codec::encode_record(table, &outgoing)?;
        let key = table.key_item(record)?;
        let mut builder = ExpressionBuilder::new(table, "");
        if !options.overwrite {
            builder.condition_not_exists(&[table.keys.hash.attribute.clone()]);
        }
        if locking {
            expect_revision(&mut builder, table, record.revision());
        }
        if migrated {
            builder.condition_absent_or_less(
                &[table.version_attribute.clone()],
                AttributeValue::N(table.version.to_string()),
            );
        }
        Ok(Self {
            item,
            key,
            expression: builder.build(),
            record: outgoing,
        })
    }

    pub(crate) fn context(&self, table_name: &str) -> RequestContext {
        context(table_name, &self.key, &self.expression)
    }
}

/// The context of a single-item write, for errors raised before the call.
pub(crate) fn context(table_name: &str, key: &Item, expression: &CompiledExpression) -> RequestContext {
    RequestContext {
        table_name: table_name.to_string(),
        key: Some(key.clone()),
        update_expression: expression.update_expression.clone(),
        condition_expression: expression.condition_expression.clone(),
        expression_attribute_names: expression.expression_attribute_names.clone(),
        expression_attribute_values: expression.expression_attribute_values.clone(),
    }
}
