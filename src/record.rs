//! Dynamic record values.
//!
//! A [`Record`] is an immutable instance of one schema type. Values are a
//! closed set of shapes matched exhaustively by the codec and the update
//! compiler.

use crate::{
    codec,
    error::{Error, Result},
    schema::{ElementType, TableSchema},
};

use indexmap::IndexMap;
use serde::{
    Serialize, Serializer,
    de::DeserializeOwned,
    ser::{SerializeMap, SerializeSeq},
};
use std::{cmp, fmt};

/// A number, kept integral when it was written as one.
#[derive(Clone, Copy, Debug)]
pub enum Number {
    /// Integral value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
}

impl Number {
    /// The value as an integer, truncating floats.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Int(value) => *value,
            Self::Float(value) => *value as i64,
        }
    }

    /// The value as a float.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(value) => *value as f64,
            Self::Float(value) => *value,
        }
    }

    /// Zero in the representation of the given numeric type.
    pub fn zero(element: &ElementType) -> Self {
        match element {
            ElementType::Float | ElementType::Double => Self::Float(0.0),
            _ => Self::Int(0),
        }
    }

    /// Parse the backend's textual number form.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(value) = text.parse::<i64>() {
            return Some(Self::Int(value));
        }
        text.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Self::Float)
    }

    /// The backend's textual number form.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
        }
    }

    /// Coerce into the representation and range of the given numeric type.
    pub fn narrow(self, element: &ElementType) -> Self {
        match element {
            ElementType::Integer => Self::Int(self.as_i64() as i32 as i64),
            ElementType::Long => Self::Int(self.as_i64()),
            ElementType::Float => Self::Float(self.as_f64() as f32 as f64),
            ElementType::Double => Self::Float(self.as_f64()),
            _ => self,
        }
    }

    /// Add two numbers in the width of the given numeric type.
    ///
    /// `integer` wraps at 32 bits, `long` at 64 bits, `float` rounds through `f32`.
    pub fn add(self, other: Self, element: &ElementType) -> Self {
        match element {
            ElementType::Integer => {
                Self::Int((self.as_i64() as i32).wrapping_add(other.as_i64() as i32) as i64)
            }
            ElementType::Long => Self::Int(self.as_i64().wrapping_add(other.as_i64())),
            ElementType::Float => Self::Float((self.as_f64() as f32 + other.as_f64() as f32) as f64),
            ElementType::Double => Self::Float(self.as_f64() + other.as_f64()),
            _ => match (self, other) {
                (Self::Int(left), Self::Int(right)) => Self::Int(left.wrapping_add(right)),
                (left, right) => Self::Float(left.as_f64() + right.as_f64()),
            },
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => left == right,
            (left, right) => left.as_f64() == right.as_f64(),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => Some(left.cmp(right)),
            (left, right) => left.as_f64().partial_cmp(&right.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One field value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent or explicitly null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number of any declared width.
    Number(Number),
    /// String.
    String(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Nested value object.
    Object(Record),
    /// Ordered list.
    List(Vec<Value>),
    /// Unordered set; equality ignores order.
    Set(Vec<Value>),
    /// String-keyed map; equality ignores order.
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Whether the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's shape, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::Object(_) => "object",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }

    /// The number, if this is one.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// The nested record, if this is one.
    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Self::Object(record) => Some(record),
            _ => None,
        }
    }

    /// The elements of a list or set.
    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Self::List(values) | Self::Set(values) => Some(values),
            _ => None,
        }
    }

    /// The entries of a map.
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Number(left), Self::Number(right)) => left == right,
            (Self::String(left), Self::String(right)) => left == right,
            (Self::Binary(left), Self::Binary(right)) => left == right,
            (Self::Object(left), Self::Object(right)) => left == right,
            (Self::List(left), Self::List(right)) => left == right,
            (Self::Set(left), Self::Set(right)) => {
                left.len() == right.len()
                    && left.iter().all(|value| right.contains(value))
                    && right.iter().all(|value| left.contains(value))
            }
            (Self::Map(left), Self::Map(right)) => left == right,
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Number(Number::Int(value)) => serializer.serialize_i64(*value),
            Self::Number(Number::Float(value)) => serializer.serialize_f64(*value),
            Self::String(value) => serializer.serialize_str(value),
            Self::Binary(value) => serializer.serialize_bytes(value),
            Self::Object(record) => {
                let mut map = serializer.serialize_map(Some(record.fields.len()))?;
                for (name, value) in &record.fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Self::List(values) | Self::Set(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value.into())
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Self::Number(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Object(value)
    }
}

impl<V: Into<Value>> From<Vec<(&str, V)>> for Value {
    fn from(entries: Vec<(&str, V)>) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.into()))
                .collect(),
        )
    }
}

/// An instance of one schema type.
///
/// Records are immutable once built; changes to a stored record go through an
/// [`Update`](crate::update::Update).
///
/// ```rust
/// use dynamodb_mapper::record::{Record, Value};
///
/// let player = Record::new("Player")
///     .with("id", "p1")
///     .with("name", "Player One")
///     .with("score", 10);
/// assert_eq!(player.get("score"), Some(&Value::from(10)));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    type_name: String,
    fields: IndexMap<String, Value>,
    revision: i64,
}

impl Record {
    /// An empty record of the named type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// This record with one more field value. `Null` leaves the field unset.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field.into(), value.into());
        self
    }

    /// This record with the given observed revision.
    pub fn with_revision(mut self, revision: i64) -> Self {
        self.revision = revision;
        self
    }

    /// The record's type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The value of a field, if set.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// All set fields.
    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    /// The revision observed when the record was loaded, 0 for new records.
    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub(crate) fn set(&mut self, field: String, value: Value) {
        if value.is_null() {
            self.fields.shift_remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub(crate) fn set_revision(&mut self, revision: i64) {
        self.revision = revision;
    }

    /// Build a record of the table's root type from any serializable struct.
    ///
    /// Struct fields are matched to logical field names.
    pub fn from_serde<T: Serialize>(table: &TableSchema, value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)
            .map_err(|error| Error::codec(format!("cannot serialize record: {error}")))?;
        codec::record_from_json(table, &table.root_type, &json)
    }

    /// Convert this record into any deserializable struct.
    pub fn to_serde<T: DeserializeOwned>(&self, table: &TableSchema) -> Result<T> {
        let json = codec::value_to_json(table, &Value::Object(self.clone()), codec::JsonMode::All)?;
        serde_json::from_value(json)
            .map_err(|error| Error::codec(format!("cannot deserialize record: {error}")))
    }

    /// JSON export, leaving out fields that opt out of serialization.
    pub fn to_json(&self, table: &TableSchema) -> Result<serde_json::Value> {
        codec::value_to_json(table, &Value::Object(self.clone()), codec::JsonMode::Export)
    }
}

/// Identity of a stored item: hash key and optional range key values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordKey {
    /// Partition key value.
    pub hash: Value,
    /// Sort key value, for composite keys.
    pub range: Option<Value>,
}

impl RecordKey {
    /// A key with only a partition component.
    pub fn new(hash: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    /// A composite key.
    pub fn composite(hash: impl Into<Value>, range: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::integer_wraps(ElementType::Integer, Number::Int(i32::MAX as i64), Number::Int(1), Number::Int(i32::MIN as i64))]
    #[case::long(ElementType::Long, Number::Int(10), Number::Int(5), Number::Int(15))]
    #[case::long_wraps(ElementType::Long, Number::Int(i64::MAX), Number::Int(1), Number::Int(i64::MIN))]
    #[case::float_rounds(ElementType::Float, Number::Float(0.1), Number::Float(0.2), Number::Float((0.1f32 + 0.2f32) as f64))]
    #[case::double(ElementType::Double, Number::Float(1.5), Number::Int(2), Number::Float(3.5))]
    fn test_number_add(
        #[case] element: ElementType,
        #[case] left: Number,
        #[case] right: Number,
        #[case] expected: Number,
    ) {
        assert_eq!(left.add(right, &element), expected);
    }

    #[rstest]
    #[case::integer("42", Some(Number::Int(42)))]
    #[case::negative("-7", Some(Number::Int(-7)))]
    #[case::float("1.25", Some(Number::Float(1.25)))]
    #[case::garbage("abc", None)]
    fn test_number_parse(#[case] text: &str, #[case] expected: Option<Number>) {
        assert_eq!(Number::parse(text), expected);
    }

    #[test]
    fn test_set_equality_ignores_order() {
        assert_eq!(
            Value::Set(vec!["a".into(), "b".into()]),
            Value::Set(vec!["b".into(), "a".into()])
        );
        assert_ne!(
            Value::List(vec!["a".into(), "b".into()]),
            Value::List(vec!["b".into(), "a".into()])
        );
    }

    #[test]
    fn test_with_null_leaves_field_unset() {
        let record = Record::new("T").with("a", 1).with("a", Value::Null);
        assert_eq!(record.get("a"), None);
    }

    #[test]
    fn test_number_equality_across_representations() {
        assert_eq!(Number::Int(15), Number::Float(15.0));
        assert_eq!(Number::Float(15.0).to_wire(), "15");
    }
}
