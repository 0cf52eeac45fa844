use crate::{
    error::{Error, Result},
    schema::{ElementType, FieldKind},
};

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Declarative description of every table a registry serves.
///
/// ```rust
/// use dynamodb_mapper::schema::description::SchemaDescription;
///
/// let description = SchemaDescription::from_json(r#"{
///     "tables": [{
///         "name": "players",
///         "root_type": "Player",
///         "hash_key": "id",
///         "version": 1,
///         "types": [{
///             "name": "Player",
///             "fields": [
///                 {"name": "id", "element_type": "string"},
///                 {"name": "score", "element_type": "long"}
///             ]
///         }]
///     }]
/// }"#).unwrap();
/// assert_eq!(description.tables[0].name, "players");
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SchemaDescription {
    /// Table definitions, in declaration order.
    pub tables: Vec<TableDescription>,
}

impl SchemaDescription {
    /// Parse a description from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|error| Error::schema(format!("malformed schema description: {error}")))
    }

    /// Parse a description from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|error| Error::schema(format!("malformed schema description: {error}")))
    }
}

/// One table: its key, version, types and indexes.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TableDescription {
    /// Backend table name.
    pub name: String,
    /// Owning package or namespace.
    #[serde(default)]
    pub namespace: String,
    /// Name of the type stored one-per-item.
    pub root_type: String,
    /// Root field holding the partition key.
    pub hash_key: String,
    /// Root field holding the sort key, for composite keys.
    #[serde(default)]
    pub range_key: Option<String>,
    /// Current schema version. Stored items below it are migrated on load.
    pub version: u32,
    /// Whether writes carry and check a revision counter.
    #[serde(default)]
    pub optimistic_locking: bool,
    /// Whether stale items are migrated on load.
    #[serde(default)]
    pub migrations: bool,
    /// Attribute holding the schema version. Defaults to `_v`.
    #[serde(default)]
    pub version_attribute: Option<String>,
    /// Attribute holding the revision counter. Defaults to `_rev`.
    #[serde(default)]
    pub revision_attribute: Option<String>,
    /// Root and nested types.
    pub types: Vec<TypeDescription>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDescription>,
}

/// A named type and its ordered fields.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TypeDescription {
    /// Type name, unique within the table.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldDescription>,
}

/// One field of a type.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FieldDescription {
    /// Logical name used by application code.
    pub name: String,
    /// Attribute name in the stored item. Defaults to `name`.
    #[serde(default)]
    pub wire_name: Option<String>,
    /// Scalar or collection shape.
    #[serde(default)]
    pub kind: FieldKind,
    /// Scalar type, or the collection's element type.
    #[serde(default)]
    pub element_type: Option<ElementType>,
    /// Value used when the field is absent.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Whether the field is stored.
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Whether the field is included in JSON exports.
    #[serde(default = "default_true")]
    pub serialize: bool,
    /// Whether updates always write the whole value.
    #[serde(default)]
    pub replace_on_write: bool,
    /// Whether numeric and collection deltas compile to relative clauses.
    #[serde(default)]
    pub delta_merge: bool,
    /// Whether the collection is stored as a gzip-compressed blob.
    #[serde(default)]
    pub compress: bool,
    /// Whether a list of objects is stored as a map keyed by each element's `id`.
    #[serde(default)]
    pub rekey_by_id: bool,
    /// Whether this field is the table's time-to-live attribute.
    #[serde(default)]
    pub expiry: bool,
}

impl Default for FieldDescription {
    fn default() -> Self {
        Self {
            name: String::new(),
            wire_name: None,
            kind: FieldKind::Scalar,
            element_type: None,
            default: None,
            persist: true,
            serialize: true,
            replace_on_write: false,
            delta_merge: false,
            compress: false,
            rekey_by_id: false,
            expiry: false,
        }
    }
}

/// A secondary index.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct IndexDescription {
    /// Index name.
    pub name: String,
    /// Root field holding the index partition key.
    pub hash_key: String,
    /// Root field holding the index sort key.
    #[serde(default)]
    pub range_key: Option<String>,
    /// Root fields projected into the index, beyond the keys.
    #[serde(default)]
    pub projection: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_field_defaults() {
        let field: FieldDescription = serde_json::from_value(json!({"name": "a"})).unwrap();
        assert_eq!(
            field,
            FieldDescription {
                name: "a".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_malformed_description_is_schema_error() {
        let error = SchemaDescription::from_json("{\"tables\": 3}").unwrap_err();
        assert!(matches!(error, Error::SchemaValidation(_)));
    }

    #[test]
    fn test_full_table() {
        let description = SchemaDescription::from_value(json!({
            "tables": [{
                "name": "orders",
                "namespace": "shop",
                "root_type": "Order",
                "hash_key": "customer",
                "range_key": "placed",
                "version": 3,
                "optimistic_locking": true,
                "migrations": true,
                "types": [{
                    "name": "Order",
                    "fields": [
                        {"name": "customer", "wire_name": "c", "element_type": "string"},
                        {"name": "placed", "element_type": "long"},
                        {"name": "lines", "kind": "map", "element_type": {"object": "Line"}},
                    ]
                }],
                "indexes": [{"name": "by_placed", "hash_key": "placed"}]
            }]
        }))
        .unwrap();
        let table = &description.tables[0];
        assert_eq!(table.range_key.as_deref(), Some("placed"));
        assert_eq!(table.types[0].fields[0].wire_name.as_deref(), Some("c"));
        assert_eq!(table.types[0].fields[2].kind, FieldKind::Map);
        assert_eq!(table.indexes[0].projection, Vec::<String>::new());
    }
}
