//! Schema model: tables, types, fields and indexes.
//!
//! A [`Registry`] is built once from a declarative [`SchemaDescription`](description::SchemaDescription),
//! validated, and then shared read-only by every other component.

/// Declarative, serde-loadable schema description.
pub mod description;

/// Registry construction and lookup.
pub mod registry;

/// Validated runtime table, type, field and index definitions.
pub mod table;

pub use registry::{Registry, RegistryBuilder};
pub use table::{FieldSchema, IndexSchema, KeyAccessor, KeyField, TableSchema, TypeSchema};

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a field: one value, or a collection of elements.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A single value.
    #[default]
    Scalar,
    /// String-keyed map of elements.
    Map,
    /// Ordered list of elements.
    List,
    /// Unordered set of unique elements.
    Set,
}

/// Type of a scalar value or of a collection's elements.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// UTF-8 string.
    String,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Boolean.
    Boolean,
    /// Raw bytes.
    Binary,
    /// Nested value object of the named type.
    Object(String),
}

impl ElementType {
    /// Whether values of this type are numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Long | Self::Float | Self::Double)
    }

    /// Whether this type can be stored in a native backend set.
    pub fn is_set_element(&self) -> bool {
        matches!(self, Self::String | Self::Binary) || self.is_numeric()
    }

    /// Whether this type can be used as a primary or index key.
    pub fn is_key(&self) -> bool {
        self.is_set_element()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Long => f.write_str("long"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::Boolean => f.write_str("boolean"),
            Self::Binary => f.write_str("binary"),
            Self::Object(name) => write!(f, "object {name}"),
        }
    }
}

/// Full type of a value: its shape and the type of its elements.
///
/// Collections must declare an element type before they can be encoded or
/// mutated; a missing one is a [`Error::ContractViolation`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ValueType {
    /// The shape.
    pub kind: FieldKind,
    /// The scalar type, or the collection's element type.
    pub element: Option<ElementType>,
}

impl ValueType {
    /// A scalar of the given type.
    pub fn scalar(element: ElementType) -> Self {
        Self {
            kind: FieldKind::Scalar,
            element: Some(element),
        }
    }

    /// A list of the given element type.
    pub fn list(element: ElementType) -> Self {
        Self {
            kind: FieldKind::List,
            element: Some(element),
        }
    }

    /// A set of the given element type.
    pub fn set(element: ElementType) -> Self {
        Self {
            kind: FieldKind::Set,
            element: Some(element),
        }
    }

    /// A map of the given element type.
    pub fn map(element: ElementType) -> Self {
        Self {
            kind: FieldKind::Map,
            element: Some(element),
        }
    }

    /// Whether this is a collection shape.
    pub fn is_collection(&self) -> bool {
        self.kind != FieldKind::Scalar
    }

    /// The declared element type.
    pub fn element(&self) -> Result<&ElementType> {
        self.element.as_ref().ok_or_else(|| {
            Error::contract(format!("{:?} value declared without an element type", self.kind))
        })
    }

    /// The type of one element of this value.
    pub fn element_type(&self) -> Result<Self> {
        self.element().cloned().map(Self::scalar)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let element = match &self.element {
            Some(element) => element.to_string(),
            None => "?".to_string(),
        };
        match self.kind {
            FieldKind::Scalar => f.write_str(&element),
            FieldKind::Map => write!(f, "map<{element}>"),
            FieldKind::List => write!(f, "list<{element}>"),
            FieldKind::Set => write!(f, "set<{element}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::scalar(ValueType::scalar(ElementType::Long), "long")]
    #[case::map(ValueType::map(ElementType::Integer), "map<integer>")]
    #[case::set_of_strings(ValueType::set(ElementType::String), "set<string>")]
    #[case::list_of_objects(
        ValueType::list(ElementType::Object("Item".to_string())),
        "list<object Item>"
    )]
    #[case::undeclared(
        ValueType {
            kind: FieldKind::List,
            element: None,
        },
        "list<?>"
    )]
    fn test_value_type_display(#[case] value_type: ValueType, #[case] expected: &str) {
        assert_eq!(value_type.to_string(), expected);
    }

    #[test]
    fn test_missing_element_type_is_contract_violation() {
        let value_type = ValueType {
            kind: FieldKind::Set,
            element: None,
        };
        assert!(matches!(
            value_type.element(),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_element_type_deserializes_from_snake_case() {
        let element: ElementType = serde_json::from_value(serde_json::json!("long")).unwrap();
        assert_eq!(element, ElementType::Long);
        let element: ElementType =
            serde_json::from_value(serde_json::json!({"object": "Address"})).unwrap();
        assert_eq!(element, ElementType::Object("Address".to_string()));
    }
}
