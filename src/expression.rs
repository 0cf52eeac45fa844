//! Update, condition and projection expression compiler.
//!
//! An [`ExpressionBuilder`] collects clauses for one request. Paths are given
//! as wire-name segments and every segment is aliased, so reserved words and
//! literal values never appear in the rendered expression.

/// Placeholder allocation.
pub mod alias;

/// Condition trees.
pub mod condition;

use crate::{
    codec,
    error::{Error, Result},
    merge::CollectionDelta,
    record::{Number, Value},
    schema::{ElementType, FieldKind, FieldSchema, TableSchema, TypeSchema, ValueType},
};

use alias::AliasGenerator;
use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;
use std::collections;

/// Resolve a dotted logical path to wire-name segments.
///
/// Field names are looked up in the root type and in nested object types;
/// segments below a map field are taken verbatim as entry keys. The table's
/// reserved attributes resolve to themselves.
pub fn resolve_path(table: &TableSchema, path: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut schema: Option<&TypeSchema> = Some(table.root());
    let mut below_map: Option<&ElementType> = None;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(Error::contract(format!("path `{path}` has an empty segment")));
        }
        if let Some(element) = below_map.take() {
            segments.push(segment.to_string());
            schema = match element {
                ElementType::Object(type_name) => Some(table.type_schema(type_name)?),
                _ => None,
            };
            continue;
        }
        let Some(current) = schema else {
            return Err(Error::contract(format!(
                "path `{path}` descends into a non-object value at `{segment}`"
            )));
        };
        let Some(field) = current.field(segment) else {
            if segments.is_empty() && table.is_reserved_attribute(segment) {
                segments.push(segment.to_string());
                schema = None;
                continue;
            }
            return Err(Error::contract(format!(
                "path `{path}` refers to undeclared field `{segment}` of type `{}`",
                current.name
            )));
        };
        segments.push(field.wire_name.clone());
        schema = None;
        match (&field.value_type.kind, &field.value_type.element) {
            (FieldKind::Scalar, Some(ElementType::Object(type_name))) => {
                schema = Some(table.type_schema(type_name)?);
            }
            (FieldKind::Map, Some(element)) => below_map = Some(element),
            _ => {}
        }
    }
    Ok(segments)
}

fn child_path(path: &[String], segment: &str) -> Vec<String> {
    let mut child = Vec::with_capacity(path.len() + 1);
    child.extend_from_slice(path);
    child.push(segment.to_string());
    child
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Map(entries) => entries.is_empty(),
        Value::List(values) | Value::Set(values) => values.is_empty(),
        _ => false,
    }
}

/// The rendered expressions and alias maps of one request.
///
/// Empty parts are `None`, since the backend rejects empty expressions and
/// empty alias maps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledExpression {
    /// `SET … REMOVE … ADD … DELETE …`, groups separated by one space.
    pub update_expression: Option<String>,
    /// Registered conditions joined with `AND`.
    pub condition_expression: Option<String>,
    /// Registered key conditions joined with `AND`, for queries.
    pub key_condition_expression: Option<String>,
    /// Aliased attribute paths to read.
    pub projection_expression: Option<String>,
    /// Name aliases.
    pub expression_attribute_names: Option<collections::HashMap<String, String>>,
    /// Value aliases.
    pub expression_attribute_values: Option<collections::HashMap<String, AttributeValue>>,
}

/// Collects the clauses of one request.
///
/// ```rust
/// use dynamodb_mapper::expression::ExpressionBuilder;
/// use dynamodb_mapper::record::Value;
/// use dynamodb_mapper::schema::{ElementType, Registry, ValueType};
///
/// let registry = Registry::from_json(r#"{"tables": [{
///     "name": "players", "root_type": "Player", "hash_key": "id", "version": 1,
///     "types": [{"name": "Player", "fields": [
///         {"name": "id", "element_type": "string"},
///         {"name": "name", "element_type": "string"}
///     ]}]
/// }]}"#).unwrap();
/// let table = registry.table("players").unwrap();
///
/// let mut builder = ExpressionBuilder::new(table, "");
/// builder
///     .set_value(&["name".to_string()], &Value::from("Jane"), &ValueType::scalar(ElementType::String))
///     .unwrap();
/// let compiled = builder.build();
/// assert_eq!(compiled.update_expression.as_deref(), Some("SET #n0 = :v0"));
/// ```
#[derive(Clone, Debug)]
pub struct ExpressionBuilder<'a> {
    table: &'a TableSchema,
    aliases: AliasGenerator,
    set: Vec<String>,
    remove: Vec<String>,
    add: Vec<String>,
    delete: Vec<String>,
    conditions: Vec<String>,
    key_conditions: Vec<String>,
    projection: Vec<String>,
    children: usize,
}

impl<'a> ExpressionBuilder<'a> {
    /// An empty builder whose aliases start with `prefix`.
    pub fn new(table: &'a TableSchema, prefix: impl Into<String>) -> Self {
        Self {
            table,
            aliases: AliasGenerator::new(prefix),
            set: Vec::new(),
            remove: Vec::new(),
            add: Vec::new(),
            delete: Vec::new(),
            conditions: Vec::new(),
            key_conditions: Vec::new(),
            projection: Vec::new(),
            children: 0,
        }
    }

    /// A builder for a nested object, with an alias prefix distinct from this
    /// builder and from its other children.
    pub fn nested(&mut self) -> Self {
        let prefix = format!("{}c{}_", self.aliases.prefix(), self.children);
        self.children += 1;
        Self::new(self.table, prefix)
    }

    /// The table the expressions target.
    pub fn table(&self) -> &'a TableSchema {
        self.table
    }

    /// `SET path = value`, with the value encoded for its type.
    pub fn set_value(&mut self, path: &[String], value: &Value, value_type: &ValueType) -> Result<&mut Self> {
        let attribute = codec::encode_value(self.table, value, value_type)?;
        Ok(self.set_attribute(path, attribute))
    }

    /// `SET path = value` for a field, honouring its storage flags. `Null` removes the field.
    pub fn set_field(&mut self, path: &[String], field: &FieldSchema, value: &Value) -> Result<&mut Self> {
        if value.is_null() {
            return Ok(self.remove_field(path));
        }
        let attribute = codec::encode_field(self.table, field, value)?;
        Ok(self.set_attribute(path, attribute))
    }

    /// `SET path = value` with an already encoded value.
    pub fn set_attribute(&mut self, path: &[String], value: AttributeValue) -> &mut Self {
        let path = self.aliases.path(path);
        let value = self.aliases.value(value);
        self.set.push(format!("{path} = {value}"));
        self
    }

    /// Add `amount` to a number, treating an absent number as zero.
    ///
    /// Top-level attributes use `ADD`; nested ones use `SET` with `if_not_exists`.
    pub fn increment_number(&mut self, path: &[String], amount: Number, element: &ElementType) -> Result<&mut Self> {
        if !element.is_numeric() {
            return Err(Error::contract(format!("cannot increment a {element} value")));
        }
        let amount = AttributeValue::N(amount.narrow(element).to_wire());
        let aliased = self.aliases.path(path);
        let amount = self.aliases.value(amount);
        if path.len() == 1 {
            self.add.push(format!("{aliased} {amount}"));
        } else {
            let zero = self.aliases.value(AttributeValue::N(Number::zero(element).to_wire()));
            self.set
                .push(format!("{aliased} = if_not_exists({aliased}, {zero}) + {amount}"));
        }
        Ok(self)
    }

    /// `REMOVE path`.
    pub fn remove_field(&mut self, path: &[String]) -> &mut Self {
        let path = self.aliases.path(path);
        self.remove.push(path);
        self
    }

    /// Append elements to a list, creating it when absent.
    pub fn append_list(&mut self, path: &[String], values: &[Value], value_type: &ValueType) -> Result<&mut Self> {
        if values.is_empty() {
            return Ok(self);
        }
        let values = codec::encode_value(self.table, &Value::List(values.to_vec()), &ValueType::list(value_type.element()?.clone()))?;
        let aliased = self.aliases.path(path);
        let empty = self.aliases.value(AttributeValue::L(Vec::new()));
        let values = self.aliases.value(values);
        self.set.push(format!(
            "{aliased} = list_append(if_not_exists({aliased}, {empty}), {values})"
        ));
        Ok(self)
    }

    /// `ADD path elements` on a set.
    pub fn add_elements(&mut self, path: &[String], values: &[Value], value_type: &ValueType) -> Result<&mut Self> {
        if values.is_empty() {
            return Ok(self);
        }
        let values = codec::encode_value(self.table, &Value::Set(values.to_vec()), &ValueType::set(value_type.element()?.clone()))?;
        let path = self.aliases.path(path);
        let values = self.aliases.value(values);
        self.add.push(format!("{path} {values}"));
        Ok(self)
    }

    /// `DELETE path elements` on a set.
    pub fn delete_elements(&mut self, path: &[String], values: &[Value], value_type: &ValueType) -> Result<&mut Self> {
        if values.is_empty() {
            return Ok(self);
        }
        let values = codec::encode_value(self.table, &Value::Set(values.to_vec()), &ValueType::set(value_type.element()?.clone()))?;
        let path = self.aliases.path(path);
        let values = self.aliases.value(values);
        self.delete.push(format!("{path} {values}"));
        Ok(self)
    }

    /// Emit the clauses that turn `base` into the merge of `base` and `delta`.
    ///
    /// Relative clauses are used where the backend can apply them; otherwise
    /// the merged value is written whole. The merged value is computed by
    /// [`CollectionDelta::merge`], the same function behind record views.
    pub fn merge_collection(
        &mut self,
        path: &[String],
        value_type: &ValueType,
        base: &Value,
        delta: &CollectionDelta,
    ) -> Result<&mut Self> {
        if delta.is_empty() {
            return Ok(self);
        }
        let element = value_type.element()?;
        let merged = delta.merge(base, element)?;
        if delta.clears() || is_empty_collection(base) {
            return self.set_value(path, &merged, value_type);
        }
        match delta {
            CollectionDelta::Map(delta) => {
                let element_type = value_type.element_type()?;
                for (key, value) in &delta.updates {
                    if !delta.deletes.contains(key) {
                        self.set_value(&child_path(path, key), value, &element_type)?;
                    }
                }
                for (key, amount) in &delta.deltas {
                    if !delta.updates.contains_key(key) && !delta.deletes.contains(key) {
                        self.increment_number(&child_path(path, key), *amount, element)?;
                    }
                }
                for key in &delta.deletes {
                    self.remove_field(&child_path(path, key));
                }
            }
            CollectionDelta::Set(delta) => {
                if !delta.adds.is_empty() && !delta.deletes.is_empty() {
                    return self.set_value(path, &merged, value_type);
                }
                self.add_elements(path, &delta.adds, value_type)?;
                self.delete_elements(path, &delta.deletes, value_type)?;
            }
            CollectionDelta::List(delta) => {
                self.append_list(path, &delta.appends, value_type)?;
            }
        }
        Ok(self)
    }

    /// Register a condition tree over logical field paths.
    pub fn condition<T: Serialize>(&mut self, condition: &condition::ConditionExpr<T>) -> Result<&mut Self> {
        let expression = condition.render(self.table, &mut self.aliases)?;
        match condition {
            condition::ConditionExpr::Any(children) if children.len() > 1 => {
                self.conditions.push(format!("({expression})"));
            }
            _ => self.conditions.push(expression),
        }
        Ok(self)
    }

    /// Register a key condition on an already resolved attribute path.
    pub fn key_condition<T: Serialize>(
        &mut self,
        path: &[String],
        condition: &condition::Condition<T>,
    ) -> Result<&mut Self> {
        if !condition.is_key_condition() {
            return Err(Error::contract(format!(
                "unsupported key condition on `{}`",
                path.join(".")
            )));
        }
        let path = self.aliases.path(path);
        let expression = condition.render(&path, &mut self.aliases)?;
        self.key_conditions.push(expression);
        Ok(self)
    }

    /// Register `path = value`.
    pub fn condition_equals(&mut self, path: &[String], value: AttributeValue) -> &mut Self {
        let path = self.aliases.path(path);
        let value = self.aliases.value(value);
        self.conditions.push(format!("{path} = {value}"));
        self
    }

    /// Register `attribute_not_exists(path)`.
    pub fn condition_not_exists(&mut self, path: &[String]) -> &mut Self {
        let path = self.aliases.path(path);
        self.conditions.push(format!("attribute_not_exists({path})"));
        self
    }

    /// Register `(attribute_not_exists(path) OR path < value)`.
    pub fn condition_absent_or_less(&mut self, path: &[String], value: AttributeValue) -> &mut Self {
        let path = self.aliases.path(path);
        let value = self.aliases.value(value);
        self.conditions
            .push(format!("(attribute_not_exists({path}) OR {path} < {value})"));
        self
    }

    /// Add a path to the projection.
    pub fn project(&mut self, path: &[String]) -> &mut Self {
        let path = self.aliases.path(path);
        if !self.projection.contains(&path) {
            self.projection.push(path);
        }
        self
    }

    /// Absorb the clauses and aliases of another builder.
    pub fn merge(&mut self, other: Self) -> Result<&mut Self> {
        self.aliases.merge(other.aliases)?;
        self.set.extend(other.set);
        self.remove.extend(other.remove);
        self.add.extend(other.add);
        self.delete.extend(other.delete);
        self.conditions.extend(other.conditions);
        self.key_conditions.extend(other.key_conditions);
        for path in other.projection {
            if !self.projection.contains(&path) {
                self.projection.push(path);
            }
        }
        Ok(self)
    }

    /// Whether no update clause has been registered.
    pub fn has_updates(&self) -> bool {
        !(self.set.is_empty() && self.remove.is_empty() && self.add.is_empty() && self.delete.is_empty())
    }

    /// Render the collected clauses.
    pub fn build(self) -> CompiledExpression {
        let mut groups = Vec::with_capacity(4);
        for (keyword, clauses) in [
            ("SET", &self.set),
            ("REMOVE", &self.remove),
            ("ADD", &self.add),
            ("DELETE", &self.delete),
        ] {
            if !clauses.is_empty() {
                groups.push(format!("{keyword} {}", clauses.join(", ")));
            }
        }
        let update_expression = (!groups.is_empty()).then(|| groups.join(" "));
        let condition_expression = (!self.conditions.is_empty()).then(|| self.conditions.join(" AND "));
        let key_condition_expression = (!self.key_conditions.is_empty()).then(|| self.key_conditions.join(" AND "));
        let projection_expression = (!self.projection.is_empty()).then(|| self.projection.join(", "));
        let (names, values) = self.aliases.into_maps();
        CompiledExpression {
            update_expression,
            condition_expression,
            key_condition_expression,
            projection_expression,
            expression_attribute_names: (!names.is_empty()).then_some(names),
            expression_attribute_values: (!values.is_empty()).then_some(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        merge::{ListDelta, MapDelta, SetDelta},
        schema::description::TableDescription,
    };

    use indexmap::{IndexMap, IndexSet};
    use rstest::rstest;
    use serde_json::json;

    fn table() -> TableSchema {
        let description: TableDescription = serde_json::from_value(json!({
            "name": "t",
            "root_type": "Root",
            "hash_key": "id",
            "version": 1,
            "types": [
                {
                    "name": "Root",
                    "fields": [
                        {"name": "id", "element_type": "string"},
                        {"name": "name", "wire_name": "nm", "element_type": "string"},
                        {"name": "stats", "kind": "map", "element_type": "long"},
                        {"name": "tags", "kind": "set", "element_type": "string"},
                        {"name": "log", "kind": "list", "element_type": "string"},
                        {"name": "address", "element_type": {"object": "Address"}},
                    ]
                },
                {
                    "name": "Address",
                    "fields": [{"name": "city", "element_type": "string"}]
                }
            ]
        }))
        .unwrap();
        TableSchema::try_from(description).unwrap()
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|segment| segment.to_string()).collect()
    }

    #[rstest]
    #[case::field("name", vec!["nm"])]
    #[case::map_entry("stats.wins", vec!["stats", "wins"])]
    #[case::nested_object("address.city", vec!["address", "city"])]
    #[case::reserved("_v", vec!["_v"])]
    fn test_resolve_path(#[case] dotted: &str, #[case] expected: Vec<&str>) {
        assert_eq!(resolve_path(&table(), dotted).unwrap(), path(&expected));
    }

    #[rstest]
    #[case::undeclared("nope")]
    #[case::below_scalar("name.first")]
    #[case::undeclared_nested("address.zip")]
    fn test_resolve_path_rejects(#[case] dotted: &str) {
        assert!(matches!(
            resolve_path(&table(), dotted),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_clause_groups_are_ordered_and_space_separated() {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        builder.remove_field(&path(&["nm"]));
        builder
            .increment_number(&path(&["score"]), Number::Int(5), &ElementType::Long)
            .unwrap();
        builder.set_attribute(&path(&["nm"]), AttributeValue::S("x".to_string()));
        builder
            .delete_elements(&path(&["tags"]), &["a".into()], &ValueType::set(ElementType::String))
            .unwrap();
        let compiled = builder.build();
        assert_eq!(
            compiled.update_expression.as_deref(),
            Some("SET #n0 = :v1 REMOVE #n0 ADD #n1 :v0 DELETE #n2 :v2")
        );
        assert_eq!(compiled.condition_expression, None);
    }

    #[test]
    fn test_distinct_paths_get_distinct_aliases() {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        let fields = ["a", "b", "c", "d", "e"];
        for field in fields {
            builder.set_attribute(&path(&[field]), AttributeValue::Bool(true));
        }
        builder.condition_equals(&path(&["a"]), AttributeValue::Bool(false));
        let names = builder.build().expression_attribute_names.unwrap();
        assert_eq!(names.len(), fields.len());
        let mut segments: Vec<_> = names.values().cloned().collect();
        segments.sort();
        assert_eq!(segments, path(&fields));
    }

    #[test]
    fn test_nested_increment_uses_if_not_exists() {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        builder
            .increment_number(&path(&["stats", "wins"]), Number::Int(2), &ElementType::Long)
            .unwrap();
        assert_eq!(
            builder.build().update_expression.as_deref(),
            Some("SET #n0.#n1 = if_not_exists(#n0.#n1, :v1) + :v0")
        );
    }

    #[test]
    fn test_increment_of_non_number_is_contract_violation() {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        let error = builder
            .increment_number(&path(&["nm"]), Number::Int(1), &ElementType::String)
            .unwrap_err();
        assert!(matches!(error, Error::ContractViolation(_)));
    }

    #[test]
    fn test_collection_without_element_type_is_contract_violation() {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        let untyped = ValueType {
            kind: FieldKind::List,
            element: None,
        };
        let delta = CollectionDelta::List(ListDelta {
            appends: vec!["x".into()],
            clear: false,
        });
        let error = builder
            .merge_collection(&path(&["log"]), &untyped, &Value::List(vec!["a".into()]), &delta)
            .unwrap_err();
        assert!(matches!(error, Error::ContractViolation(_)));
    }

    #[rstest]
    #[case::map_entries(
        ValueType::map(ElementType::Long),
        Value::from(vec![("a", 1)]),
        CollectionDelta::Map(MapDelta {
            updates: IndexMap::from([("b".to_string(), Value::from(2))]),
            deltas: IndexMap::from([("a".to_string(), Number::Int(3))]),
            deletes: IndexSet::from(["c".to_string()]),
            clear: false,
        }),
        "SET #n0.#n1 = :v0, #n0.#n2 = if_not_exists(#n0.#n2, :v2) + :v1 REMOVE #n0.#n3"
    )]
    #[case::map_on_empty_base_is_whole(
        ValueType::map(ElementType::Long),
        Value::Map(IndexMap::new()),
        CollectionDelta::Map(MapDelta {
            updates: IndexMap::from([("b".to_string(), Value::from(2))]),
            ..Default::default()
        }),
        "SET #n0 = :v0"
    )]
    #[case::set_add(
        ValueType::set(ElementType::String),
        Value::Set(vec!["a".into()]),
        CollectionDelta::Set(SetDelta { adds: vec!["b".into()], ..Default::default() }),
        "ADD #n0 :v0"
    )]
    #[case::set_add_and_delete_is_whole(
        ValueType::set(ElementType::String),
        Value::Set(vec!["a".into()]),
        CollectionDelta::Set(SetDelta { adds: vec!["b".into()], deletes: vec!["a".into()], clear: false }),
        "SET #n0 = :v0"
    )]
    #[case::list_append(
        ValueType::list(ElementType::String),
        Value::List(vec!["a".into()]),
        CollectionDelta::List(ListDelta { appends: vec!["b".into()], clear: false }),
        "SET #n0 = list_append(if_not_exists(#n0, :v0), :v1)"
    )]
    #[case::clear_is_whole(
        ValueType::list(ElementType::String),
        Value::List(vec!["a".into()]),
        CollectionDelta::List(ListDelta { appends: Vec::new(), clear: true }),
        "SET #n0 = :v0"
    )]
    fn test_merge_collection(
        #[case] value_type: ValueType,
        #[case] base: Value,
        #[case] delta: CollectionDelta,
        #[case] expected: &str,
    ) {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        builder
            .merge_collection(&path(&["f"]), &value_type, &base, &delta)
            .unwrap();
        assert_eq!(builder.build().update_expression.as_deref(), Some(expected));
    }

    #[test]
    fn test_merged_builders_keep_disjoint_aliases() {
        let table = table();
        let mut parent = ExpressionBuilder::new(&table, "");
        parent.set_attribute(&path(&["nm"]), AttributeValue::S("x".to_string()));
        let mut child = parent.nested();
        child.set_attribute(&path(&["address", "city"]), AttributeValue::S("y".to_string()));
        parent.merge(child).unwrap();
        let compiled = parent.build();
        assert_eq!(
            compiled.update_expression.as_deref(),
            Some("SET #n0 = :v0, #c0_n0.#c0_n1 = :c0_v0")
        );
        assert_eq!(compiled.expression_attribute_names.unwrap().len(), 3);
    }

    #[test]
    fn test_conditions_are_joined_with_and() {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        builder.condition_equals(&path(&["_v"]), AttributeValue::N("1".to_string()));
        builder.condition_not_exists(&path(&["id"]));
        builder
            .condition(&condition::ConditionExpr::Any(vec![
                condition::ConditionExpr::leaf("name", condition::Condition::Exists),
                condition::ConditionExpr::leaf("name", condition::Condition::<Value>::NotExists),
            ]))
            .unwrap();
        assert_eq!(
            builder.build().condition_expression.as_deref(),
            Some("#n0 = :v0 AND attribute_not_exists(#n1) AND (attribute_exists(#n2) OR attribute_not_exists(#n2))")
        );
    }

    #[test]
    fn test_key_conditions_render_apart_from_filters() {
        let table = table();
        let mut builder = ExpressionBuilder::new(&table, "");
        builder
            .key_condition(&path(&["id"]), &condition::Condition::Equals(Value::from("p1")))
            .unwrap();
        builder
            .condition(&condition::ConditionExpr::leaf("name", condition::Condition::<Value>::Exists))
            .unwrap();
        let compiled = builder.build();
        assert_eq!(compiled.key_condition_expression.as_deref(), Some("#n0 = :v0"));
        assert_eq!(compiled.condition_expression.as_deref(), Some("attribute_exists(#n1)"));
    }

    #[test]
    fn test_key_condition_rejects_non_key_tests() {
        let table = table();
        let error = ExpressionBuilder::new(&table, "")
            .key_condition(&path(&["id"]), &condition::Condition::<Value>::Exists)
            .unwrap_err();
        assert!(matches!(error, Error::ContractViolation(_)));
    }
}
