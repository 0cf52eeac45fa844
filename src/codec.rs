//! Conversion between records and stored items.
//!
//! Every function matches exhaustively over [`FieldKind`] and [`ElementType`].
//! Stored items carry the schema-version attribute and, with optimistic
//! locking, the revision attribute next to the persisted fields.

use crate::{
    common::Item,
    error::{Error, Result},
    record::{Number, Record, Value},
    schema::{ElementType, FieldKind, FieldSchema, TableSchema, TypeSchema, ValueType},
};

use aws_sdk_dynamodb::{primitives::Blob, types::AttributeValue};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use indexmap::IndexMap;
use std::{
    cmp, collections,
    io::{Read, Write},
};

/// Which fields a JSON rendering includes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum JsonMode {
    /// Every set field.
    All,
    /// Fields whose `serialize` flag is set.
    Export,
    /// Persisted fields, for compressed blobs.
    Storage,
}

/// Encode a root record, stamping the table's current version.
pub fn encode_record(table: &TableSchema, record: &Record) -> Result<Item> {
    if record.type_name() != table.root_type {
        return Err(Error::contract(format!(
            "table `{}` stores `{}` records, got `{}`",
            table.name,
            table.root_type,
            record.type_name()
        )));
    }
    let mut item = encode_object(table, table.root(), record)?;
    item.insert(
        table.version_attribute.clone(),
        AttributeValue::N(table.version.to_string()),
    );
    if table.optimistic_locking {
        item.insert(
            table.revision_attribute.clone(),
            AttributeValue::N(record.revision().to_string()),
        );
    }
    Ok(item)
}

/// Decode a root record. A missing revision attribute decodes as revision 0.
pub fn decode_record(table: &TableSchema, item: &Item) -> Result<Record> {
    let mut record = decode_object(table, table.root(), item)?;
    if table.optimistic_locking {
        record.set_revision(stored_revision(table, item)?);
    }
    Ok(record)
}

/// The schema version stamped on a stored item, if any.
pub fn stored_version(table: &TableSchema, item: &Item) -> Result<Option<u32>> {
    match item.get(&table.version_attribute) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::N(text)) => text.trim().parse().map(Some).map_err(|_| {
            Error::codec(format!(
                "version attribute `{}` holds `{text}`",
                table.version_attribute
            ))
        }),
        Some(other) => Err(Error::codec(format!(
            "version attribute `{}` is not a number: {other:?}",
            table.version_attribute
        ))),
    }
}

pub(crate) fn stored_revision(table: &TableSchema, item: &Item) -> Result<i64> {
    match item.get(&table.revision_attribute) {
        None | Some(AttributeValue::Null(_)) => Ok(0),
        Some(AttributeValue::N(text)) => text.trim().parse().map_err(|_| {
            Error::codec(format!(
                "revision attribute `{}` holds `{text}`",
                table.revision_attribute
            ))
        }),
        Some(other) => Err(Error::codec(format!(
            "revision attribute `{}` is not a number: {other:?}",
            table.revision_attribute
        ))),
    }
}

/// Encode the persisted fields of one object. Unset fields are left out.
pub fn encode_object(table: &TableSchema, schema: &TypeSchema, record: &Record) -> Result<Item> {
    for name in record.fields().keys() {
        schema.require_field(name)?;
    }
    let mut item = collections::HashMap::with_capacity(schema.fields().len());
    for field in schema.fields().iter().filter(|field| field.persist) {
        match record.get(&field.name) {
            None | Some(Value::Null) => {}
            Some(value) => {
                item.insert(field.wire_name.clone(), encode_field(table, field, value)?);
            }
        }
    }
    Ok(item)
}

/// Decode one object, filling absent fields from their defaults.
pub fn decode_object(table: &TableSchema, schema: &TypeSchema, item: &Item) -> Result<Record> {
    let mut record = Record::new(schema.name.clone());
    for field in schema.fields() {
        let value = match item.get(&field.wire_name) {
            Some(attribute) if field.persist => decode_field(table, field, attribute)?,
            _ => field.absent_value(),
        };
        record.set(field.name.clone(), value);
    }
    Ok(record)
}

/// Encode one field value, applying its storage flags.
pub fn encode_field(table: &TableSchema, field: &FieldSchema, value: &Value) -> Result<AttributeValue> {
    if field.compress {
        let json = value_to_json(table, value, JsonMode::Storage)?;
        return compress(&json).map(|bytes| AttributeValue::B(Blob::new(bytes)));
    }
    if field.rekey_by_id {
        return encode_rekeyed(table, field, value);
    }
    encode_value(table, value, &field.value_type)
}

/// Decode one field value, reversing its storage flags.
pub fn decode_field(table: &TableSchema, field: &FieldSchema, attribute: &AttributeValue) -> Result<Value> {
    match attribute {
        AttributeValue::B(blob) if field.compress => {
            let json = decompress(blob.as_ref())?;
            value_from_json(table, &json, &field.value_type)
        }
        AttributeValue::M(entries) if field.rekey_by_id => decode_rekeyed(table, field, entries),
        attribute => decode_value(table, attribute, &field.value_type),
    }
}

/// Encode a value of the given type.
pub fn encode_value(table: &TableSchema, value: &Value, value_type: &ValueType) -> Result<AttributeValue> {
    let element = value_type.element()?;
    match value_type.kind {
        FieldKind::Scalar => encode_scalar(table, value, element),
        FieldKind::List => match value {
            Value::List(values) | Value::Set(values) => values
                .iter()
                .map(|value| encode_scalar(table, value, element))
                .collect::<Result<_>>()
                .map(AttributeValue::L),
            Value::Null => Ok(AttributeValue::L(Vec::new())),
            other => Err(mismatch(value_type, other)),
        },
        FieldKind::Map => match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), encode_scalar(table, value, element)?)))
                .collect::<Result<_>>()
                .map(AttributeValue::M),
            Value::Null => Ok(AttributeValue::M(collections::HashMap::new())),
            other => Err(mismatch(value_type, other)),
        },
        FieldKind::Set => match value {
            Value::Set(values) | Value::List(values) => encode_set(values, element),
            Value::Null => Ok(AttributeValue::L(Vec::new())),
            other => Err(mismatch(value_type, other)),
        },
    }
}

/// Decode a value of the given type.
pub fn decode_value(table: &TableSchema, attribute: &AttributeValue, value_type: &ValueType) -> Result<Value> {
    let element = value_type.element()?;
    match value_type.kind {
        FieldKind::Scalar => decode_scalar(table, attribute, element),
        FieldKind::List => match attribute {
            AttributeValue::L(values) => values
                .iter()
                .map(|value| decode_scalar(table, value, element))
                .collect::<Result<_>>()
                .map(Value::List),
            AttributeValue::Null(_) => Ok(Value::List(Vec::new())),
            other => Err(wire_mismatch(value_type, other)),
        },
        FieldKind::Map => match attribute {
            AttributeValue::M(entries) => {
                let mut map = entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), decode_scalar(table, value, element)?)))
                    .collect::<Result<IndexMap<_, _>>>()?;
                map.sort_keys();
                Ok(Value::Map(map))
            }
            AttributeValue::Null(_) => Ok(Value::Map(IndexMap::new())),
            other => Err(wire_mismatch(value_type, other)),
        },
        FieldKind::Set => {
            let values = match attribute {
                AttributeValue::Ss(values) => values.iter().cloned().map(Value::String).collect(),
                AttributeValue::Ns(values) => values
                    .iter()
                    .map(|text| decode_number(text, element).map(Value::Number))
                    .collect::<Result<_>>()?,
                AttributeValue::Bs(values) => values
                    .iter()
                    .map(|blob| Value::Binary(blob.as_ref().to_vec()))
                    .collect(),
                AttributeValue::L(values) => values
                    .iter()
                    .map(|value| decode_scalar(table, value, element))
                    .collect::<Result<_>>()?,
                AttributeValue::Null(_) => Vec::new(),
                other => return Err(wire_mismatch(value_type, other)),
            };
            Ok(Value::Set(values))
        }
    }
}

/// Encode a key component, which is always a string, number or binary scalar.
pub fn encode_key_value(value: &Value, element: &ElementType) -> Result<AttributeValue> {
    match (element, value) {
        (ElementType::String, Value::String(value)) => Ok(AttributeValue::S(value.clone())),
        (ElementType::Binary, Value::Binary(bytes)) => Ok(AttributeValue::B(Blob::new(bytes.clone()))),
        (element, Value::Number(number)) if element.is_numeric() => {
            Ok(AttributeValue::N(number.narrow(element).to_wire()))
        }
        (element, value) => Err(Error::codec(format!(
            "key of type {element} cannot hold a {}",
            value.kind_name()
        ))),
    }
}

/// Decode a key component.
pub fn decode_key_value(attribute: &AttributeValue, element: &ElementType) -> Result<Value> {
    match (element, attribute) {
        (ElementType::String, AttributeValue::S(value)) => Ok(Value::String(value.clone())),
        (ElementType::Binary, AttributeValue::B(blob)) => Ok(Value::Binary(blob.as_ref().to_vec())),
        (element, AttributeValue::N(text)) if element.is_numeric() => {
            decode_number(text, element).map(Value::Number)
        }
        (element, attribute) => Err(Error::codec(format!(
            "key of type {element} stored as {attribute:?}"
        ))),
    }
}

fn encode_scalar(table: &TableSchema, value: &Value, element: &ElementType) -> Result<AttributeValue> {
    match (element, value) {
        (_, Value::Null) => Ok(AttributeValue::Null(true)),
        (ElementType::String, Value::String(value)) => Ok(AttributeValue::S(value.clone())),
        (ElementType::Boolean, Value::Bool(value)) => Ok(AttributeValue::Bool(*value)),
        (ElementType::Binary, Value::Binary(bytes)) => Ok(AttributeValue::B(Blob::new(bytes.clone()))),
        (
            ElementType::Integer | ElementType::Long | ElementType::Float | ElementType::Double,
            Value::Number(number),
        ) => Ok(AttributeValue::N(number.narrow(element).to_wire())),
        (ElementType::Object(type_name), Value::Object(record)) => {
            if record.type_name() != type_name {
                return Err(Error::codec(format!(
                    "expected object {type_name}, got object {}",
                    record.type_name()
                )));
            }
            let schema = table.type_schema(type_name)?;
            encode_object(table, schema, record).map(AttributeValue::M)
        }
        (element, value) => Err(Error::codec(format!(
            "expected {element}, got {}",
            value.kind_name()
        ))),
    }
}

fn decode_scalar(table: &TableSchema, attribute: &AttributeValue, element: &ElementType) -> Result<Value> {
    match (element, attribute) {
        (_, AttributeValue::Null(_)) => Ok(Value::Null),
        (ElementType::String, AttributeValue::S(value)) => Ok(Value::String(value.clone())),
        (ElementType::Boolean, AttributeValue::Bool(value)) => Ok(Value::Bool(*value)),
        (ElementType::Binary, AttributeValue::B(blob)) => Ok(Value::Binary(blob.as_ref().to_vec())),
        (
            ElementType::Integer | ElementType::Long | ElementType::Float | ElementType::Double,
            AttributeValue::N(text),
        ) => decode_number(text, element).map(Value::Number),
        (ElementType::Object(type_name), AttributeValue::M(entries)) => {
            let schema = table.type_schema(type_name)?;
            decode_object(table, schema, entries).map(Value::Object)
        }
        (element, attribute) => Err(Error::codec(format!(
            "expected {element}, stored {attribute:?}"
        ))),
    }
}

fn decode_number(text: &str, element: &ElementType) -> Result<Number> {
    Number::parse(text)
        .map(|number| number.narrow(element))
        .ok_or_else(|| Error::codec(format!("`{text}` is not a number")))
}

fn encode_set(values: &[Value], element: &ElementType) -> Result<AttributeValue> {
    if values.is_empty() {
        return Ok(AttributeValue::L(Vec::new()));
    }
    match element {
        ElementType::String => {
            let mut strings = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    Value::String(value) if !strings.contains(value) => strings.push(value.clone()),
                    Value::String(_) => {}
                    other => return Err(Error::codec(format!("expected string, got {}", other.kind_name()))),
                }
            }
            Ok(AttributeValue::Ss(strings))
        }
        ElementType::Binary => {
            let mut blobs: Vec<Blob> = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    Value::Binary(bytes) => {
                        if !blobs.iter().any(|blob| blob.as_ref() == bytes.as_slice()) {
                            blobs.push(Blob::new(bytes.clone()));
                        }
                    }
                    other => return Err(Error::codec(format!("expected binary, got {}", other.kind_name()))),
                }
            }
            Ok(AttributeValue::Bs(blobs))
        }
        element if element.is_numeric() => {
            let mut numbers: Vec<Number> = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    Value::Number(number) => {
                        let number = number.narrow(element);
                        if !numbers.contains(&number) {
                            numbers.push(number);
                        }
                    }
                    other => return Err(Error::codec(format!("expected number, got {}", other.kind_name()))),
                }
            }
            Ok(AttributeValue::Ns(numbers.iter().map(Number::to_wire).collect()))
        }
        element => Err(Error::contract(format!("a set cannot hold {element} elements"))),
    }
}

fn rekey_id(record: &Record) -> Result<String> {
    match record.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_wire()),
        Some(Value::Binary(id)) => Ok(id.iter().map(|byte| format!("{byte:02x}")).collect()),
        _ => Err(Error::codec(format!(
            "object {} has no usable `id` to key it by",
            record.type_name()
        ))),
    }
}

fn id_order(left: &Value, right: &Value) -> cmp::Ordering {
    let id = |value: &Value| value.as_object().and_then(|record| record.get("id")).cloned();
    match (id(left), id(right)) {
        (Some(Value::Number(left)), Some(Value::Number(right))) => {
            left.partial_cmp(&right).unwrap_or(cmp::Ordering::Equal)
        }
        (Some(Value::String(left)), Some(Value::String(right))) => left.cmp(&right),
        (Some(Value::Binary(left)), Some(Value::Binary(right))) => left.cmp(&right),
        _ => cmp::Ordering::Equal,
    }
}

fn encode_rekeyed(table: &TableSchema, field: &FieldSchema, value: &Value) -> Result<AttributeValue> {
    let ElementType::Object(type_name) = field.value_type.element()? else {
        return Err(Error::contract(format!("field `{}` re-keys non-object elements", field.name)));
    };
    let schema = table.type_schema(type_name)?;
    let values = match value {
        Value::List(values) => values.as_slice(),
        Value::Null => &[],
        other => return Err(mismatch(&field.value_type, other)),
    };
    let mut entries = collections::HashMap::with_capacity(values.len());
    for value in values {
        let Value::Object(record) = value else {
            return Err(mismatch(&field.value_type, value));
        };
        entries.insert(rekey_id(record)?, AttributeValue::M(encode_object(table, schema, record)?));
    }
    Ok(AttributeValue::M(entries))
}

fn decode_rekeyed(
    table: &TableSchema,
    field: &FieldSchema,
    entries: &collections::HashMap<String, AttributeValue>,
) -> Result<Value> {
    let element = field.value_type.element()?;
    let mut values = entries
        .values()
        .map(|attribute| decode_scalar(table, attribute, element))
        .collect::<Result<Vec<_>>>()?;
    values.sort_by(id_order);
    Ok(Value::List(values))
}

fn compress(json: &serde_json::Value) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(json).map_err(|error| Error::codec(error.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&bytes)
        .map_err(|error| Error::codec(format!("gzip failed: {error}")))?;
    encoder
        .finish()
        .map_err(|error| Error::codec(format!("gzip failed: {error}")))
}

fn decompress(bytes: &[u8]) -> Result<serde_json::Value> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|error| Error::codec(format!("gunzip failed: {error}")))?;
    serde_json::from_slice(&json).map_err(|error| Error::codec(error.to_string()))
}

fn mismatch(value_type: &ValueType, value: &Value) -> Error {
    Error::codec(format!("expected {value_type}, got {}", value.kind_name()))
}

fn wire_mismatch(value_type: &ValueType, attribute: &AttributeValue) -> Error {
    Error::codec(format!("expected {value_type}, stored {attribute:?}"))
}

/// Render a value as JSON. Nested objects use logical field names.
pub(crate) fn value_to_json(table: &TableSchema, value: &Value, mode: JsonMode) -> Result<serde_json::Value> {
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(value) => serde_json::Value::Bool(*value),
        Value::Number(Number::Int(value)) => serde_json::Value::from(*value),
        Value::Number(Number::Float(value)) => serde_json::Number::from_f64(*value)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(value) => serde_json::Value::String(value.clone()),
        Value::Binary(bytes) => serde_json::Value::from(bytes.clone()),
        Value::List(values) | Value::Set(values) => serde_json::Value::Array(
            values
                .iter()
                .map(|value| value_to_json(table, value, mode))
                .collect::<Result<_>>()?,
        ),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), value_to_json(table, value, mode)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Object(record) => {
            let schema = table.type_schema(record.type_name())?;
            let mut object = serde_json::Map::with_capacity(record.fields().len());
            for field in schema.fields() {
                let included = match mode {
                    JsonMode::All => true,
                    JsonMode::Export => field.serialize,
                    JsonMode::Storage => field.persist,
                };
                if let Some(value) = record.get(&field.name).filter(|_| included) {
                    object.insert(field.name.clone(), value_to_json(table, value, mode)?);
                }
            }
            serde_json::Value::Object(object)
        }
    };
    Ok(json)
}

/// Read a JSON value as a value of the given type.
pub(crate) fn value_from_json(
    table: &TableSchema,
    json: &serde_json::Value,
    value_type: &ValueType,
) -> Result<Value> {
    let element = value_type.element()?;
    match (value_type.kind, json) {
        (_, serde_json::Value::Null) => Ok(Value::Null),
        (FieldKind::Scalar, json) => scalar_from_json(table, json, element),
        (FieldKind::List, serde_json::Value::Array(values)) => values
            .iter()
            .map(|value| scalar_from_json(table, value, element))
            .collect::<Result<_>>()
            .map(Value::List),
        (FieldKind::Set, serde_json::Value::Array(values)) => values
            .iter()
            .map(|value| scalar_from_json(table, value, element))
            .collect::<Result<_>>()
            .map(Value::Set),
        (FieldKind::Map, serde_json::Value::Object(entries)) => entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), scalar_from_json(table, value, element)?)))
            .collect::<Result<_>>()
            .map(Value::Map),
        (_, json) => Err(Error::codec(format!("expected {value_type}, got JSON {json}"))),
    }
}

fn scalar_from_json(table: &TableSchema, json: &serde_json::Value, element: &ElementType) -> Result<Value> {
    match (element, json) {
        (_, serde_json::Value::Null) => Ok(Value::Null),
        (ElementType::String, serde_json::Value::String(value)) => Ok(Value::String(value.clone())),
        (ElementType::Boolean, serde_json::Value::Bool(value)) => Ok(Value::Bool(*value)),
        (
            ElementType::Integer | ElementType::Long | ElementType::Float | ElementType::Double,
            serde_json::Value::Number(number),
        ) => {
            let number = match number.as_i64() {
                Some(value) => Number::Int(value),
                None => Number::Float(number.as_f64().unwrap_or_default()),
            };
            Ok(Value::Number(number.narrow(element)))
        }
        (ElementType::Binary, serde_json::Value::Array(bytes)) => bytes
            .iter()
            .map(|byte| {
                byte.as_u64()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(|| Error::codec(format!("`{byte}` is not a byte")))
            })
            .collect::<Result<_>>()
            .map(Value::Binary),
        (ElementType::Object(type_name), json) => record_from_json(table, type_name, json).map(Value::Object),
        (element, json) => Err(Error::codec(format!("expected {element}, got JSON {json}"))),
    }
}

/// Read a JSON object as a record of the named type.
pub(crate) fn record_from_json(table: &TableSchema, type_name: &str, json: &serde_json::Value) -> Result<Record> {
    let serde_json::Value::Object(entries) = json else {
        return Err(Error::codec(format!("expected object {type_name}, got JSON {json}")));
    };
    let schema = table.type_schema(type_name)?;
    let mut record = Record::new(type_name);
    for (name, value) in entries {
        let field = schema
            .field(name)
            .ok_or_else(|| Error::codec(format!("type `{type_name}` has no field `{name}`")))?;
        record.set(name.clone(), value_from_json(table, value, &field.value_type)?);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::description::TableDescription;

    use rstest::rstest;
    use serde_json::json;

    fn table() -> TableSchema {
        let description: TableDescription = serde_json::from_value(json!({
            "name": "players",
            "root_type": "Player",
            "hash_key": "id",
            "version": 3,
            "optimistic_locking": true,
            "types": [
                {
                    "name": "Player",
                    "fields": [
                        {"name": "id", "element_type": "string"},
                        {"name": "name", "wire_name": "n", "element_type": "string"},
                        {"name": "score", "element_type": "long"},
                        {"name": "level", "element_type": "integer", "default": 1},
                        {"name": "tags", "kind": "set", "element_type": "string"},
                        {"name": "stats", "kind": "map", "element_type": "integer"},
                        {"name": "history", "kind": "list", "element_type": "string", "compress": true},
                        {"name": "items", "kind": "list", "element_type": {"object": "Gear"}, "rekey_by_id": true},
                        {"name": "session", "element_type": "string", "persist": false},
                        {"name": "secret", "element_type": "string", "serialize": false},
                    ]
                },
                {
                    "name": "Gear",
                    "fields": [
                        {"name": "id", "element_type": "long"},
                        {"name": "label", "element_type": "string"},
                    ]
                }
            ]
        }))
        .unwrap();
        TableSchema::try_from(description).unwrap()
    }

    fn gear(id: i64, label: &str) -> Value {
        Value::Object(Record::new("Gear").with("id", id).with("label", label))
    }

    #[test]
    fn test_record_round_trip() {
        let table = table();
        let record = Record::new("Player")
            .with("id", "p1")
            .with("name", "Player One")
            .with("score", 10)
            .with("tags", Value::Set(vec!["a".into(), "b".into()]))
            .with("stats", vec![("wins", 3)])
            .with("history", Value::List(vec!["x".into(), "y".into()]))
            .with("items", Value::List(vec![gear(2, "b"), gear(1, "a")]))
            .with_revision(4);
        let item = encode_record(&table, &record).unwrap();
        assert_eq!(item["n"], AttributeValue::S("Player One".to_string()));
        assert_eq!(item["_v"], AttributeValue::N("3".to_string()));
        assert_eq!(item["_rev"], AttributeValue::N("4".to_string()));
        assert!(matches!(item["history"], AttributeValue::B(_)));
        assert!(matches!(item["items"], AttributeValue::M(_)));
        let decoded = decode_record(&table, &item).unwrap();
        assert_eq!(decoded.revision(), 4);
        assert_eq!(decoded.get("level"), Some(&Value::from(1)));
        assert_eq!(decoded.get("history"), record.get("history"));
        assert_eq!(
            decoded.get("items"),
            Some(&Value::List(vec![gear(1, "a"), gear(2, "b")]))
        );
        assert_eq!(decoded.get("tags"), record.get("tags"));
        assert_eq!(decoded.get("session"), None);
    }

    #[rstest]
    #[case::empty_set(ValueType::set(ElementType::String), Value::Set(Vec::new()), AttributeValue::L(Vec::new()))]
    #[case::string_set(
        ValueType::set(ElementType::String),
        Value::Set(vec!["a".into(), "a".into()]),
        AttributeValue::Ss(vec!["a".to_string()])
    )]
    #[case::number_set(
        ValueType::set(ElementType::Integer),
        Value::Set(vec![1.into(), 2.into()]),
        AttributeValue::Ns(vec!["1".to_string(), "2".to_string()])
    )]
    #[case::integer_narrows(
        ValueType::scalar(ElementType::Integer),
        Value::from(i64::from(i32::MAX) + 1),
        AttributeValue::N(i32::MIN.to_string())
    )]
    fn test_encode_value(#[case] value_type: ValueType, #[case] value: Value, #[case] expected: AttributeValue) {
        assert_eq!(encode_value(&table(), &value, &value_type).unwrap(), expected);
    }

    #[test]
    fn test_empty_set_decodes_from_list() {
        let value = decode_value(
            &table(),
            &AttributeValue::L(Vec::new()),
            &ValueType::set(ElementType::String),
        )
        .unwrap();
        assert_eq!(value, Value::Set(Vec::new()));
    }

    #[test]
    fn test_type_mismatch_is_codec_error() {
        let error = encode_value(
            &table(),
            &Value::from("x"),
            &ValueType::scalar(ElementType::Long),
        )
        .unwrap_err();
        assert!(matches!(error, Error::Codec(_)));
    }

    #[test]
    fn test_unknown_field_is_contract_violation() {
        let table = table();
        let record = Record::new("Player").with("id", "p1").with("nope", 1);
        assert!(matches!(
            encode_record(&table, &record),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_json_export_honours_serialize_flag() {
        let table = table();
        let record = Record::new("Player").with("id", "p1").with("secret", "s");
        assert_eq!(record.to_json(&table).unwrap(), json!({"id": "p1"}));
    }

    #[test]
    fn test_stored_version_missing_and_present() {
        let table = table();
        assert_eq!(stored_version(&table, &Item::new()).unwrap(), None);
        let item = Item::from([("_v".to_string(), AttributeValue::N("2".to_string()))]);
        assert_eq!(stored_version(&table, &item).unwrap(), Some(2));
    }
}
