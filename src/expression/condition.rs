use crate::{
    error::{Error, Result},
    expression::{self, alias::AliasGenerator},
    record::Value,
    schema::TableSchema,
};

use aws_sdk_dynamodb::types;
use serde::Serialize;
use serde_dynamo::to_attribute_value;
use std::ops;

/// Logical operator for combining conditions.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalOperator {
    /// All conditions must hold.
    And,
    /// At least one condition must hold.
    Or,
}

impl ops::Deref for LogicalOperator {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// Comparison operator, used for size checks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Comparator {
    /// `=`
    Equals,
    /// `<>`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
}

impl ops::Deref for Comparator {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Equals => "=",
            Self::NotEqual => "<>",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
        }
    }
}

/// A test applied to one attribute.
///
/// ```rust
/// use dynamodb_mapper::expression::condition::{Comparator, Condition};
/// use dynamodb_mapper::record::Value;
///
/// let equals = Condition::Equals(Value::from("active"));
/// let greater: Condition<i64> = Condition::GreaterThan(100);
/// let non_empty: Condition = Condition::Size(Comparator::GreaterThan, 0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Condition<T = Value> {
    /// The string attribute starts with a prefix.
    BeginsWith(String),
    /// The attribute lies between two values, inclusive.
    Between(T, T),
    /// The string contains a substring, or the set or list contains an element.
    Contains(T),
    /// The attribute equals a value.
    Equals(T),
    /// The attribute is greater than a value.
    GreaterThan(T),
    /// The attribute is greater than or equal to a value.
    GreaterThanOrEqual(T),
    /// The attribute equals one of the values.
    In(Vec<T>),
    /// The attribute is less than a value.
    LessThan(T),
    /// The attribute is less than or equal to a value.
    LessThanOrEqual(T),
    /// The attribute does not contain a value.
    NotContains(T),
    /// The attribute differs from a value.
    NotEqual(T),
    /// The attribute, or map entry, exists.
    Exists,
    /// The attribute, or map entry, does not exist.
    NotExists,
    /// The size of the string, binary or collection compares to a number.
    Size(Comparator, usize),
}

fn bind<T: Serialize>(aliases: &mut AliasGenerator, value: &T) -> Result<String> {
    let value: types::AttributeValue = to_attribute_value(value)?;
    Ok(aliases.value(value))
}

impl<T: Serialize> Condition<T> {
    /// Whether the backend accepts this test on a range key.
    pub fn is_key_condition(&self) -> bool {
        matches!(
            self,
            Self::BeginsWith(_)
                | Self::Between(..)
                | Self::Equals(_)
                | Self::GreaterThan(_)
                | Self::GreaterThanOrEqual(_)
                | Self::LessThan(_)
                | Self::LessThanOrEqual(_)
        )
    }

    pub(crate) fn render(&self, path: &str, aliases: &mut AliasGenerator) -> Result<String> {
        let expression = match self {
            Self::BeginsWith(prefix) => {
                let value = aliases.value(types::AttributeValue::S(prefix.clone()));
                format!("begins_with({path}, {value})")
            }
            Self::Between(low, high) => {
                let low = bind(aliases, low)?;
                let high = bind(aliases, high)?;
                format!("{path} BETWEEN {low} AND {high}")
            }
            Self::Contains(value) => format!("contains({path}, {})", bind(aliases, value)?),
            Self::Equals(value) => format!("{path} = {}", bind(aliases, value)?),
            Self::GreaterThan(value) => format!("{path} > {}", bind(aliases, value)?),
            Self::GreaterThanOrEqual(value) => format!("{path} >= {}", bind(aliases, value)?),
            Self::In(values) => {
                if values.is_empty() {
                    return Err(Error::contract(format!("IN condition on {path} has no values")));
                }
                let placeholders = values
                    .iter()
                    .map(|value| bind(aliases, value))
                    .collect::<Result<Vec<_>>>()?;
                format!("{path} IN ({})", placeholders.join(", "))
            }
            Self::LessThan(value) => format!("{path} < {}", bind(aliases, value)?),
            Self::LessThanOrEqual(value) => format!("{path} <= {}", bind(aliases, value)?),
            Self::NotContains(value) => format!("NOT contains({path}, {})", bind(aliases, value)?),
            Self::NotEqual(value) => format!("{path} <> {}", bind(aliases, value)?),
            Self::Exists => format!("attribute_exists({path})"),
            Self::NotExists => format!("attribute_not_exists({path})"),
            Self::Size(comparator, size) => {
                let size = aliases.value(types::AttributeValue::N(size.to_string()));
                format!("size({path}) {} {size}", &**comparator)
            }
        };
        Ok(expression)
    }
}

/// A condition on one attribute, named by its dotted logical path.
///
/// Path segments are resolved through the table's schema: fields map to their
/// wire names, and segments below a map field are taken as entry keys.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyCondition<T = Value> {
    /// Dotted logical path, e.g. `stats.wins`.
    pub name: String,
    /// The test to apply.
    pub condition: Condition<T>,
}

impl<T: Serialize> KeyCondition<T> {
    pub(crate) fn render(&self, table: &TableSchema, aliases: &mut AliasGenerator) -> Result<String> {
        let segments = expression::resolve_path(table, &self.name)?;
        let path = aliases.path(&segments);
        self.condition.render(&path, aliases)
    }
}

/// A tree of conditions.
///
/// ```rust
/// use dynamodb_mapper::expression::condition::{Condition, ConditionExpr, KeyCondition};
/// use dynamodb_mapper::record::Value;
///
/// let active_or_new: ConditionExpr = ConditionExpr::Any(vec![
///     ConditionExpr::leaf("status", Condition::Equals(Value::from("active"))),
///     ConditionExpr::leaf("status", Condition::NotExists),
/// ]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionExpr<T = Value> {
    /// One attribute condition.
    Leaf(KeyCondition<T>),
    /// Every child holds.
    All(Vec<ConditionExpr<T>>),
    /// Some child holds.
    Any(Vec<ConditionExpr<T>>),
    /// The child does not hold.
    Not(Box<ConditionExpr<T>>),
}

impl<T> ConditionExpr<T> {
    /// A single attribute condition.
    pub fn leaf(name: impl Into<String>, condition: Condition<T>) -> Self {
        Self::Leaf(KeyCondition {
            name: name.into(),
            condition,
        })
    }

    fn is_composite(&self) -> bool {
        match self {
            Self::All(children) | Self::Any(children) => children.len() > 1,
            Self::Leaf(_) | Self::Not(_) => false,
        }
    }
}

impl<T> From<KeyCondition<T>> for ConditionExpr<T> {
    fn from(condition: KeyCondition<T>) -> Self {
        Self::Leaf(condition)
    }
}

impl<T: Serialize> ConditionExpr<T> {
    fn render_children(
        children: &[Self],
        operator: LogicalOperator,
        table: &TableSchema,
        aliases: &mut AliasGenerator,
    ) -> Result<String> {
        if children.is_empty() {
            return Err(Error::contract("empty condition group"));
        }
        let mut rendered = Vec::with_capacity(children.len());
        for child in children {
            let expression = child.render(table, aliases)?;
            if child.is_composite() {
                rendered.push(format!("({expression})"));
            } else {
                rendered.push(expression);
            }
        }
        Ok(rendered.join(&*operator))
    }

    pub(crate) fn render(&self, table: &TableSchema, aliases: &mut AliasGenerator) -> Result<String> {
        match self {
            Self::Leaf(condition) => condition.render(table, aliases),
            Self::All(children) => Self::render_children(children, LogicalOperator::And, table, aliases),
            Self::Any(children) => Self::render_children(children, LogicalOperator::Or, table, aliases),
            Self::Not(child) => {
                let expression = child.render(table, aliases)?;
                Ok(format!("NOT ({expression})"))
            }
        }
    }
}
