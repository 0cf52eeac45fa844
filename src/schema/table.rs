use crate::{
    codec,
    common::Item,
    error::{Error, Result},
    record::{Record, RecordKey, Value},
    schema::{
        ElementType, FieldKind, ValueType,
        description::{FieldDescription, IndexDescription, TableDescription},
    },
};

use indexmap::IndexMap;
use std::collections;

const DEFAULT_VERSION_ATTRIBUTE: &str = "_v";
const DEFAULT_REVISION_ATTRIBUTE: &str = "_rev";

/// A validated field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    /// Logical name.
    pub name: String,
    /// Stored attribute name.
    pub wire_name: String,
    /// Declared shape and element type.
    pub value_type: ValueType,
    /// Value used when the field is absent.
    pub default: Option<Value>,
    /// Whether the field is stored.
    pub persist: bool,
    /// Whether the field is included in JSON exports.
    pub serialize: bool,
    /// Whether updates always write the whole value.
    pub replace_on_write: bool,
    /// Whether deltas compile to relative clauses.
    pub delta_merge: bool,
    /// Whether the collection is stored gzip-compressed.
    pub compress: bool,
    /// Whether a list of objects is stored keyed by element id.
    pub rekey_by_id: bool,
    /// Whether this is the time-to-live attribute.
    pub expiry: bool,
}

impl FieldSchema {
    /// Whether an update to this field may be expressed relative to the stored value.
    ///
    /// Fields that are compressed, re-keyed or replaced on write are always
    /// written whole.
    pub fn writes_relative(&self) -> bool {
        self.delta_merge && !self.replace_on_write && !self.compress && !self.rekey_by_id
    }

    /// The value an absent attribute decodes to.
    pub fn absent_value(&self) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match self.value_type.kind {
            FieldKind::Scalar => Value::Null,
            FieldKind::Map => Value::Map(IndexMap::new()),
            FieldKind::List => Value::List(Vec::new()),
            FieldKind::Set => Value::Set(Vec::new()),
        }
    }
}

/// A validated type: an ordered list of uniquely named fields.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeSchema {
    /// Type name.
    pub name: String,
    fields: Vec<FieldSchema>,
    by_name: collections::HashMap<String, usize>,
}

impl TypeSchema {
    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Look up a field by logical name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.by_name.get(name).map(|index| &self.fields[*index])
    }

    pub(crate) fn require_field(&self, name: &str) -> Result<&FieldSchema> {
        self.field(name)
            .ok_or_else(|| Error::contract(format!("type `{}` has no field `{name}`", self.name)))
    }
}

/// A key component resolved to its field, attribute and type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyField {
    /// Logical field name on the root type.
    pub field: String,
    /// Stored attribute name.
    pub attribute: String,
    /// Key type.
    pub element: ElementType,
}

/// Key accessors resolved once at registry construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyAccessor {
    /// Partition key.
    pub hash: KeyField,
    /// Sort key, for composite keys.
    pub range: Option<KeyField>,
}

impl KeyAccessor {
    /// Read the key of a root record.
    pub fn key_of(&self, record: &Record) -> Result<RecordKey> {
        let read = |key: &KeyField| match record.get(&key.field) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(Error::contract(format!(
                "record of type `{}` has no value for key field `{}`",
                record.type_name(),
                key.field
            ))),
        };
        let hash = read(&self.hash)?;
        let range = self.range.as_ref().map(read).transpose()?;
        Ok(RecordKey { hash, range })
    }

    /// Encode a key as the backend's key attribute map.
    pub fn to_item(&self, record_key: &RecordKey) -> Result<Item> {
        check_key_value(&self.hash, &record_key.hash)?;
        let mut item = Item::from([(
            self.hash.attribute.clone(),
            codec::encode_key_value(&record_key.hash, &self.hash.element)?,
        )]);
        match (&self.range, &record_key.range) {
            (Some(range), Some(value)) => {
                check_key_value(range, value)?;
                item.insert(
                    range.attribute.clone(),
                    codec::encode_key_value(value, &range.element)?,
                );
            }
            (None, None) => {}
            (Some(range), None) => {
                return Err(Error::contract(format!(
                    "key is missing its range component `{}`",
                    range.field
                )));
            }
            (None, Some(_)) => {
                return Err(Error::contract("key has a range component the table does not declare"));
            }
        }
        Ok(item)
    }

    /// Decode a key from a stored item.
    pub fn from_item(&self, item: &Item) -> Result<RecordKey> {
        let read = |key: &KeyField| {
            let attribute = item.get(&key.attribute).ok_or_else(|| {
                Error::codec(format!("item has no key attribute `{}`", key.attribute))
            })?;
            codec::decode_key_value(attribute, &key.element)
        };
        let hash = read(&self.hash)?;
        let range = self.range.as_ref().map(read).transpose()?;
        Ok(RecordKey { hash, range })
    }
}

fn check_key_value(key: &KeyField, value: &Value) -> Result<()> {
    let matches = match (&key.element, value) {
        (ElementType::String, Value::String(_)) | (ElementType::Binary, Value::Binary(_)) => true,
        (element, Value::Number(_)) => element.is_numeric(),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(Error::codec(format!(
            "key field `{}` expects {}, got {}",
            key.field,
            key.element,
            value.kind_name()
        )))
    }
}

/// A validated secondary index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Index key accessors.
    pub keys: KeyAccessor,
    /// Root fields projected into the index, beyond the keys.
    pub projection: Vec<String>,
}

/// A validated table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    /// Backend table name.
    pub name: String,
    /// Owning package or namespace.
    pub namespace: String,
    /// Name of the root type.
    pub root_type: String,
    /// Current schema version.
    pub version: u32,
    /// Whether writes carry and check a revision counter.
    pub optimistic_locking: bool,
    /// Whether stale items are migrated on load.
    pub migrations_enabled: bool,
    /// Attribute holding the schema version.
    pub version_attribute: String,
    /// Attribute holding the revision counter.
    pub revision_attribute: String,
    /// Primary key accessors.
    pub keys: KeyAccessor,
    /// Secondary indexes.
    pub indexes: Vec<IndexSchema>,
    /// Stored attribute of the time-to-live field.
    pub expiry_attribute: Option<String>,
    types: IndexMap<String, TypeSchema>,
}

impl TableSchema {
    /// The type stored one-per-item.
    pub fn root(&self) -> &TypeSchema {
        &self.types[&self.root_type]
    }

    /// All types of the table, root included.
    pub fn types(&self) -> impl Iterator<Item = &TypeSchema> {
        self.types.values()
    }

    /// Look up a type by name.
    pub fn type_schema(&self, name: &str) -> Result<&TypeSchema> {
        self.types
            .get(name)
            .ok_or_else(|| Error::contract(format!("table `{}` has no type `{name}`", self.name)))
    }

    /// Look up a secondary index by name.
    pub fn index(&self, name: &str) -> Result<&IndexSchema> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| Error::contract(format!("table `{}` has no index `{name}`", self.name)))
    }

    /// Key accessors of the table, or of one of its indexes.
    pub fn key_accessor(&self, index: Option<&str>) -> Result<&KeyAccessor> {
        match index {
            Some(index) => Ok(&self.index(index)?.keys),
            None => Ok(&self.keys),
        }
    }

    /// The key attribute map of a root record.
    pub fn key_item(&self, record: &Record) -> Result<Item> {
        self.keys.to_item(&self.keys.key_of(record)?)
    }

    /// Whether an attribute name is reserved for mapper bookkeeping.
    pub fn is_reserved_attribute(&self, attribute: &str) -> bool {
        attribute == self.version_attribute
            || (self.optimistic_locking && attribute == self.revision_attribute)
    }
}

fn resolve_key(root: &TypeSchema, table: &str, field: &str, role: &str) -> Result<KeyField> {
    let schema = root.field(field).ok_or_else(|| {
        Error::schema(format!("table `{table}` {role} refers to undeclared field `{field}`"))
    })?;
    if !schema.persist {
        return Err(Error::schema(format!(
            "table `{table}` {role} field `{field}` is not persisted"
        )));
    }
    match (&schema.value_type.kind, &schema.value_type.element) {
        (FieldKind::Scalar, Some(element)) if element.is_key() => Ok(KeyField {
            field: schema.name.clone(),
            attribute: schema.wire_name.clone(),
            element: element.clone(),
        }),
        _ => Err(Error::schema(format!(
            "table `{table}` {role} field `{field}` must be a string, number or binary scalar"
        ))),
    }
}

fn build_field(
    table: &str,
    type_name: &str,
    description: FieldDescription,
) -> Result<(FieldSchema, Option<serde_json::Value>)> {
    let name = description.name;
    if name.is_empty() {
        return Err(Error::schema(format!("type `{type_name}` has a field with no name")));
    }
    let wire_name = description.wire_name.unwrap_or_else(|| name.clone());
    if wire_name.is_empty() || wire_name.contains('.') {
        return Err(Error::schema(format!(
            "field `{type_name}.{name}` has invalid wire name `{wire_name}`"
        )));
    }
    let value_type = ValueType {
        kind: description.kind,
        element: description.element_type,
    };
    let Some(element) = &value_type.element else {
        return Err(Error::schema(format!(
            "field `{type_name}.{name}` declares no element type"
        )));
    };
    if description.compress && !value_type.is_collection() {
        return Err(Error::schema(format!(
            "field `{type_name}.{name}` requests compression but is not a collection"
        )));
    }
    if value_type.kind == FieldKind::Set && !element.is_set_element() {
        return Err(Error::schema(format!(
            "field `{type_name}.{name}` is a set of {element}; sets hold strings, numbers or binary"
        )));
    }
    if description.rekey_by_id
        && !(value_type.kind == FieldKind::List && matches!(element, ElementType::Object(_)))
    {
        return Err(Error::schema(format!(
            "field `{type_name}.{name}` re-keys by id but is not a list of objects"
        )));
    }
    if description.expiry
        && !(value_type.kind == FieldKind::Scalar
            && matches!(element, ElementType::Integer | ElementType::Long))
    {
        return Err(Error::schema(format!(
            "expiry field `{type_name}.{name}` of table `{table}` must be an integer or long scalar"
        )));
    }
    let field = FieldSchema {
        name,
        wire_name,
        value_type,
        default: None,
        persist: description.persist,
        serialize: description.serialize,
        replace_on_write: description.replace_on_write,
        delta_merge: description.delta_merge,
        compress: description.compress,
        rekey_by_id: description.rekey_by_id,
        expiry: description.expiry,
    };
    Ok((field, description.default))
}

fn check_acyclic(
    types: &IndexMap<String, TypeSchema>,
    type_name: &str,
    stack: &mut Vec<String>,
) -> Result<()> {
    stack.push(type_name.to_string());
    for field in types[type_name].fields() {
        if let Some(ElementType::Object(child)) = &field.value_type.element {
            if stack.iter().any(|visited| visited == child) {
                return Err(Error::schema(format!(
                    "type graph is cyclic: {} -> {child}",
                    stack.join(" -> ")
                )));
            }
            check_acyclic(types, child, stack)?;
        }
    }
    stack.pop();
    Ok(())
}

fn build_index(root: &TypeSchema, table: &str, description: IndexDescription) -> Result<IndexSchema> {
    let role = format!("index `{}`", description.name);
    let hash = resolve_key(root, table, &description.hash_key, &role)?;
    let range = description
        .range_key
        .as_deref()
        .map(|range_key| resolve_key(root, table, range_key, &role))
        .transpose()?;
    for projected in &description.projection {
        match root.field(projected) {
            Some(field) if field.persist => {}
            _ => {
                return Err(Error::schema(format!(
                    "table `{table}` {role} projects undeclared or transient field `{projected}`"
                )));
            }
        }
    }
    Ok(IndexSchema {
        name: description.name,
        keys: KeyAccessor { hash, range },
        projection: description.projection,
    })
}

impl TryFrom<TableDescription> for TableSchema {
    type Error = Error;

    fn try_from(description: TableDescription) -> Result<Self> {
        let table = description.name;
        if table.is_empty() {
            return Err(Error::schema("table with no name"));
        }
        let version_attribute = description
            .version_attribute
            .unwrap_or_else(|| DEFAULT_VERSION_ATTRIBUTE.to_string());
        let revision_attribute = description
            .revision_attribute
            .unwrap_or_else(|| DEFAULT_REVISION_ATTRIBUTE.to_string());
        if version_attribute == revision_attribute {
            return Err(Error::schema(format!(
                "table `{table}` uses `{version_attribute}` for both version and revision"
            )));
        }
        let mut types = IndexMap::with_capacity(description.types.len());
        let mut defaults = Vec::new();
        let mut expiry_attribute = None;
        for type_description in description.types {
            let type_name = type_description.name;
            if types.contains_key(&type_name) {
                return Err(Error::schema(format!(
                    "table `{table}` declares type `{type_name}` twice"
                )));
            }
            let mut fields = Vec::with_capacity(type_description.fields.len());
            let mut by_name = collections::HashMap::with_capacity(type_description.fields.len());
            let mut wire_names = collections::HashSet::new();
            for field_description in type_description.fields {
                let (field, default) = build_field(&table, &type_name, field_description)?;
                if by_name.contains_key(&field.name) {
                    return Err(Error::schema(format!(
                        "duplicate field name `{}` in type `{type_name}`",
                        field.name
                    )));
                }
                if field.persist {
                    if !wire_names.insert(field.wire_name.clone()) {
                        return Err(Error::schema(format!(
                            "duplicate wire name `{}` in type `{type_name}`",
                            field.wire_name
                        )));
                    }
                    if field.wire_name == version_attribute
                        || field.wire_name == revision_attribute
                    {
                        return Err(Error::schema(format!(
                            "field `{type_name}.{}` uses reserved attribute `{}`",
                            field.name, field.wire_name
                        )));
                    }
                }
                if field.expiry {
                    if type_name != description.root_type {
                        return Err(Error::schema(format!(
                            "expiry field `{type_name}.{}` must belong to the root type",
                            field.name
                        )));
                    }
                    if expiry_attribute.is_some() {
                        return Err(Error::schema(format!(
                            "table `{table}` declares more than one expiry field"
                        )));
                    }
                    expiry_attribute = Some(field.wire_name.clone());
                }
                if let Some(default) = default {
                    defaults.push((type_name.clone(), fields.len(), default));
                }
                by_name.insert(field.name.clone(), fields.len());
                fields.push(field);
            }
            let type_schema = TypeSchema {
                name: type_name.clone(),
                fields,
                by_name,
            };
            types.insert(type_name, type_schema);
        }
        let Some(root) = types.get(&description.root_type) else {
            return Err(Error::schema(format!(
                "table `{table}` root type `{}` is not declared",
                description.root_type
            )));
        };
        for type_schema in types.values() {
            for field in type_schema.fields() {
                let Some(ElementType::Object(child)) = &field.value_type.element else {
                    continue;
                };
                let Some(child_schema) = types.get(child) else {
                    return Err(Error::schema(format!(
                        "field `{}.{}` refers to undeclared type `{child}`",
                        type_schema.name, field.name
                    )));
                };
                if field.rekey_by_id && child_schema.field("id").is_none_or(|id| {
                    id.value_type.kind != FieldKind::Scalar
                        || !id.value_type.element.as_ref().is_some_and(ElementType::is_key)
                }) {
                    return Err(Error::schema(format!(
                        "field `{}.{}` re-keys by id but type `{child}` has no scalar `id` field",
                        type_schema.name, field.name
                    )));
                }
            }
        }
        check_acyclic(&types, &description.root_type, &mut Vec::new())?;
        let hash = resolve_key(root, &table, &description.hash_key, "hash key")?;
        let range = description
            .range_key
            .as_deref()
            .map(|range_key| resolve_key(root, &table, range_key, "range key"))
            .transpose()?;
        let mut indexes: Vec<IndexSchema> = Vec::with_capacity(description.indexes.len());
        for index_description in description.indexes {
            if indexes.iter().any(|index| index.name == index_description.name) {
                return Err(Error::schema(format!(
                    "table `{table}` declares index `{}` twice",
                    index_description.name
                )));
            }
            indexes.push(build_index(root, &table, index_description)?);
        }
        let mut schema = Self {
            name: table,
            namespace: description.namespace,
            root_type: description.root_type,
            version: description.version,
            optimistic_locking: description.optimistic_locking,
            migrations_enabled: description.migrations,
            version_attribute,
            revision_attribute,
            keys: KeyAccessor { hash, range },
            indexes,
            expiry_attribute,
            types,
        };
        let mut resolved = Vec::with_capacity(defaults.len());
        for (type_name, position, json) in defaults {
            let field = &schema.types[&type_name].fields[position];
            let value = codec::value_from_json(&schema, &json, &field.value_type).map_err(|error| {
                Error::schema(format!(
                    "default of field `{type_name}.{}` does not match its type: {error}",
                    field.name
                ))
            })?;
            resolved.push((type_name, position, value));
        }
        for (type_name, position, value) in resolved {
            if let Some(type_schema) = schema.types.get_mut(&type_name) {
                type_schema.fields[position].default = Some(value);
            }
        }
        Ok(schema)
    }
}
