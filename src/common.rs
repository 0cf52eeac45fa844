//! Types and helpers shared by read and write requests.

use crate::{
    error::Result,
    expression::{self, ExpressionBuilder},
    schema::TableSchema,
};

use aws_sdk_dynamodb::types;
use std::collections;

/// A stored item: attribute name to typed attribute value.
pub type Item = collections::HashMap<String, types::AttributeValue>;

/// Whether a paginated read keeps going after a page.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Progress {
    /// Fetch the next page.
    #[default]
    Continue,
    /// Stop after this page.
    Stop,
}

/// Project the given logical paths, plus every attribute needed to decode and migrate the result.
pub(crate) fn project(builder: &mut ExpressionBuilder<'_>, table: &TableSchema, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    for path in paths {
        builder.project(&expression::resolve_path(table, path)?);
    }
    let mut required = vec![table.keys.hash.attribute.clone(), table.version_attribute.clone()];
    required.extend(table.keys.range.as_ref().map(|range| range.attribute.clone()));
    if table.optimistic_locking {
        required.push(table.revision_attribute.clone());
    }
    for attribute in required {
        builder.project(&[attribute]);
    }
    Ok(())
}

/// Sum of the capacity units reported by one call.
pub(crate) fn capacity_units<'a>(capacities: impl IntoIterator<Item = &'a types::ConsumedCapacity>) -> Option<f64> {
    capacities
        .into_iter()
        .filter_map(|capacity| capacity.capacity_units)
        .reduce(|total, units| total + units)
}

pub(crate) fn aggregate_capacity(capacities: Vec<types::ConsumedCapacity>) -> types::ConsumedCapacity {
    let (units, read, write, table) = capacities.into_iter().fold(
        (0.0, 0.0, 0.0, None),
        |(units, read, write, table), capacity| {
            (
                units + capacity.capacity_units.unwrap_or(0.0),
                read + capacity.read_capacity_units.unwrap_or(0.0),
                write + capacity.write_capacity_units.unwrap_or(0.0),
                table.or(capacity.table_name),
            )
        },
    );
    types::ConsumedCapacity::builder()
        .set_table_name(table)
        .set_capacity_units(Some(units))
        .set_read_capacity_units(Some(read))
        .set_write_capacity_units(Some(write))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Registry;

    use rstest::rstest;

    fn capacity(table: &str, units: f64) -> types::ConsumedCapacity {
        types::ConsumedCapacity::builder()
            .table_name(table)
            .capacity_units(units)
            .build()
    }

    #[rstest]
    #[case::none(vec![], None)]
    #[case::one(vec![capacity("a", 2.5)], Some(2.5))]
    #[case::several(vec![capacity("a", 2.0), capacity("b", 3.0)], Some(5.0))]
    fn test_capacity_units(#[case] capacities: Vec<types::ConsumedCapacity>, #[case] expected: Option<f64>) {
        assert_eq!(capacity_units(&capacities), expected);
    }

    #[test]
    fn test_aggregate_capacity_keeps_first_table() {
        let aggregated = aggregate_capacity(vec![capacity("a", 2.0), capacity("b", 3.0)]);
        assert_eq!(aggregated.table_name.as_deref(), Some("a"));
        assert_eq!(aggregated.capacity_units, Some(5.0));
    }

    #[test]
    fn test_projection_adds_keys_and_reserved_attributes() {
        let registry = Registry::from_json(
            r#"{"tables": [{
                "name": "players", "root_type": "Player", "hash_key": "id", "version": 1,
                "optimistic_locking": true,
                "types": [{"name": "Player", "fields": [
                    {"name": "id", "element_type": "string"},
                    {"name": "name", "wire_name": "nm", "element_type": "string"}
                ]}]
            }]}"#,
        )
        .unwrap();
        let table = registry.table("players").unwrap();
        let mut builder = ExpressionBuilder::new(table, "");
        project(&mut builder, table, &["name".to_string()]).unwrap();
        let compiled = builder.build();
        assert_eq!(compiled.projection_expression.as_deref(), Some("#n0, #n1, #n2, #n3"));
        let names = compiled.expression_attribute_names.unwrap();
        assert_eq!(names["#n0"], "nm");
        assert_eq!(names["#n1"], "id");
        assert_eq!(names["#n2"], "_v");
        assert_eq!(names["#n3"], "_rev");
    }
}
