//! Pending field-level mutations against one loaded record.
//!
//! An [`Update`] records mutations as deltas over its base record. The same
//! deltas produce both the [`view`](Update::view) of the record as it will be
//! once written and the clauses of the compiled update expression.

use crate::{
    codec,
    common::Item,
    error::{Error, Result},
    expression::{CompiledExpression, ExpressionBuilder},
    merge::{self, CollectionDelta, ListDelta, MapDelta, ScalarDelta, SetDelta},
    record::{Number, Record, Value},
    schema::{ElementType, FieldKind, FieldSchema, TableSchema},
};

use aws_sdk_dynamodb::types::AttributeValue;
use indexmap::IndexMap;
use std::{ops, sync::Arc};

/// Pending change to one field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldMutation {
    /// Replacement, removal or numeric delta of the whole value.
    Scalar(ScalarDelta),
    /// Membership change of a collection.
    Collection(CollectionDelta),
    /// Field-level changes inside a nested object.
    Object(Box<ObjectUpdate>),
}

impl FieldMutation {
    fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(delta) => delta.is_empty(),
            Self::Collection(delta) => delta.is_empty(),
            Self::Object(update) => update.is_empty(),
        }
    }
}

fn empty_delta(kind: FieldKind) -> Option<CollectionDelta> {
    match kind {
        FieldKind::Scalar => None,
        FieldKind::Map => Some(CollectionDelta::Map(MapDelta::default())),
        FieldKind::Set => Some(CollectionDelta::Set(SetDelta::default())),
        FieldKind::List => Some(CollectionDelta::List(ListDelta::default())),
    }
}

/// Mutations of one object, root or nested.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectUpdate {
    table: Arc<TableSchema>,
    type_name: String,
    root: bool,
    base: Record,
    mutations: IndexMap<String, FieldMutation>,
}

impl ObjectUpdate {
    fn new(table: Arc<TableSchema>, base: Record, root: bool) -> Result<Self> {
        let type_name = base.type_name().to_string();
        table.type_schema(&type_name)?;
        Ok(Self {
            table,
            type_name,
            root,
            base,
            mutations: IndexMap::new(),
        })
    }

    /// The record the mutations apply to.
    pub fn base(&self) -> &Record {
        &self.base
    }

    /// Pending mutations by logical field name, in first-touch order.
    pub fn mutations(&self) -> &IndexMap<String, FieldMutation> {
        &self.mutations
    }

    /// Whether no mutation changes anything.
    pub fn is_empty(&self) -> bool {
        self.mutations.values().all(FieldMutation::is_empty)
    }

    fn field(&self, name: &str) -> Result<FieldSchema> {
        let field = self.table.type_schema(&self.type_name)?.require_field(name)?;
        if self.root && self.is_key(field) {
            return Err(Error::contract(format!(
                "key field `{name}` of `{}` cannot be updated",
                self.table.name
            )));
        }
        Ok(field.clone())
    }

    fn is_key(&self, field: &FieldSchema) -> bool {
        let keys = &self.table.keys;
        keys.hash.field == field.name || keys.range.as_ref().is_some_and(|range| range.field == field.name)
    }

    fn base_value(&self, field: &FieldSchema) -> Value {
        self.base.get(&field.name).cloned().unwrap_or(Value::Null)
    }

    /// Replace a field's whole value. `Null` removes it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let field = self.field(name)?;
        let value = value.into();
        let delta = if value.is_null() {
            ScalarDelta {
                remove: true,
                ..Default::default()
            }
        } else {
            ScalarDelta {
                set: Some(value),
                ..Default::default()
            }
        };
        self.mutations.insert(field.name, FieldMutation::Scalar(delta));
        Ok(self)
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Result<&mut Self> {
        self.set(name, Value::Null)
    }

    /// Add `amount` to a numeric field. An absent value counts as zero.
    pub fn increment(&mut self, name: &str, amount: impl Into<Number>) -> Result<&mut Self> {
        let field = self.field(name)?;
        let element = field.value_type.element()?.clone();
        if field.value_type.kind != FieldKind::Scalar || !element.is_numeric() {
            return Err(Error::contract(format!(
                "cannot increment `{name}` of type {}",
                field.value_type
            )));
        }
        let amount = amount.into();
        let mutation = self
            .mutations
            .entry(field.name)
            .or_insert_with(|| FieldMutation::Scalar(ScalarDelta::default()));
        let FieldMutation::Scalar(delta) = mutation else {
            return Err(Error::contract(format!("`{name}` already has a non-scalar mutation")));
        };
        if delta.remove {
            *delta = ScalarDelta {
                set: Some(Value::Number(Number::zero(&element).add(amount, &element))),
                ..Default::default()
            };
        } else if let Some(value) = &delta.set {
            let value = merge::merge_scalar(
                value,
                &ScalarDelta {
                    delta: Some(amount),
                    ..Default::default()
                },
                &element,
            )?;
            delta.set = Some(value);
        } else {
            delta.delta = Some(match delta.delta {
                Some(pending) => pending.add(amount, &element),
                None => amount.narrow(&element),
            });
        }
        Ok(self)
    }

    fn collection(
        &mut self,
        name: &str,
        kind: FieldKind,
        change: impl FnOnce(&mut CollectionDelta, &ElementType) -> Result<()>,
    ) -> Result<&mut Self> {
        let field = self.field(name)?;
        if field.value_type.kind != kind {
            return Err(Error::contract(format!(
                "`{name}` is a {}, not a {kind:?} collection",
                field.value_type
            )));
        }
        let element = field.value_type.element()?.clone();
        let Some(empty) = empty_delta(kind) else {
            return Err(Error::contract(format!("`{name}` is not a collection")));
        };
        let mutation = self
            .mutations
            .entry(field.name)
            .or_insert_with(|| FieldMutation::Collection(empty.clone()));
        match mutation {
            FieldMutation::Collection(delta) => change(delta, &element),
            FieldMutation::Scalar(whole) => {
                let mut delta = empty;
                change(&mut delta, &element)?;
                let current = match (&whole.set, whole.remove) {
                    (Some(value), _) => value.clone(),
                    _ => Value::Null,
                };
                *whole = ScalarDelta {
                    set: Some(delta.merge(&current, &element)?),
                    ..Default::default()
                };
                Ok(())
            }
            FieldMutation::Object(_) => Err(Error::contract(format!("`{name}` is not a collection"))),
        }?;
        Ok(self)
    }

    /// Write one map entry.
    pub fn put_entry(&mut self, name: &str, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        let key = key.into();
        let value = value.into();
        self.collection(name, FieldKind::Map, |delta, _| {
            if let CollectionDelta::Map(delta) = delta {
                delta.deletes.shift_remove(&key);
                delta.deltas.shift_remove(&key);
                delta.updates.insert(key, value);
            }
            Ok(())
        })
    }

    /// Add `amount` to one numeric map entry. An absent entry counts as zero.
    pub fn increment_entry(&mut self, name: &str, key: impl Into<String>, amount: impl Into<Number>) -> Result<&mut Self> {
        let key = key.into();
        let amount = amount.into();
        self.collection(name, FieldKind::Map, |delta, element| {
            if !element.is_numeric() {
                return Err(Error::contract(format!("cannot increment an entry of a {element} map")));
            }
            if let CollectionDelta::Map(delta) = delta {
                if delta.deletes.shift_remove(&key) {
                    let value = Number::zero(element).add(amount, element);
                    delta.updates.insert(key, Value::Number(value));
                } else if let Some(value) = delta.updates.get_mut(&key) {
                    let merged = merge::merge_scalar(
                        value,
                        &ScalarDelta {
                            delta: Some(amount),
                            ..Default::default()
                        },
                        element,
                    )?;
                    *value = merged;
                } else {
                    let pending = delta.deltas.get(&key).copied();
                    let total = match pending {
                        Some(pending) => pending.add(amount, element),
                        None => amount.narrow(element),
                    };
                    delta.deltas.insert(key, total);
                }
            }
            Ok(())
        })
    }

    /// Remove one map entry.
    pub fn delete_entry(&mut self, name: &str, key: impl Into<String>) -> Result<&mut Self> {
        let key = key.into();
        self.collection(name, FieldKind::Map, |delta, _| {
            if let CollectionDelta::Map(delta) = delta {
                delta.updates.shift_remove(&key);
                delta.deltas.shift_remove(&key);
                delta.deletes.insert(key);
            }
            Ok(())
        })
    }

    /// Add one element to a set.
    pub fn add_element(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        self.collection(name, FieldKind::Set, |delta, _| {
            if let CollectionDelta::Set(delta) = delta {
                delta.deletes.retain(|deleted| deleted != &value);
                if !delta.adds.contains(&value) {
                    delta.adds.push(value);
                }
            }
            Ok(())
        })
    }

    /// Remove one element from a set.
    pub fn delete_element(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        self.collection(name, FieldKind::Set, |delta, _| {
            if let CollectionDelta::Set(delta) = delta {
                delta.adds.retain(|added| added != &value);
                if !delta.deletes.contains(&value) {
                    delta.deletes.push(value);
                }
            }
            Ok(())
        })
    }

    /// Append elements to a list.
    pub fn append<V: Into<Value>>(&mut self, name: &str, values: impl IntoIterator<Item = V>) -> Result<&mut Self> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.collection(name, FieldKind::List, |delta, _| {
            if let CollectionDelta::List(delta) = delta {
                delta.appends.extend(values);
            }
            Ok(())
        })
    }

    /// Discard every element of a collection, including pending additions.
    pub fn clear(&mut self, name: &str) -> Result<&mut Self> {
        let field = self.field(name)?;
        let Some(mut delta) = empty_delta(field.value_type.kind) else {
            return Err(Error::contract(format!("cannot clear scalar field `{name}`")));
        };
        match &mut delta {
            CollectionDelta::Map(delta) => delta.clear = true,
            CollectionDelta::Set(delta) => delta.clear = true,
            CollectionDelta::List(delta) => delta.clear = true,
        }
        self.mutations.insert(field.name, FieldMutation::Collection(delta));
        Ok(self)
    }

    /// The mutations of a nested object field.
    ///
    /// An absent nested object starts out empty and is written whole.
    pub fn object(&mut self, name: &str) -> Result<&mut ObjectUpdate> {
        let field = self.field(name)?;
        let (FieldKind::Scalar, Some(ElementType::Object(type_name))) =
            (&field.value_type.kind, &field.value_type.element)
        else {
            return Err(Error::contract(format!("`{name}` is not a nested object")));
        };
        let base = match self.base_value(&field) {
            Value::Object(record) => record,
            _ => Record::new(type_name.clone()),
        };
        if !self.mutations.contains_key(&field.name) {
            let nested = ObjectUpdate::new(Arc::clone(&self.table), base, false)?;
            self.mutations
                .insert(field.name.clone(), FieldMutation::Object(Box::new(nested)));
        }
        match self.mutations.get_mut(&field.name) {
            Some(FieldMutation::Object(nested)) => Ok(nested.as_mut()),
            _ => Err(Error::contract(format!(
                "`{name}` was replaced whole; mutate the replacement value instead"
            ))),
        }
    }

    fn latest(&self, field: &FieldSchema, mutation: &FieldMutation) -> Result<Value> {
        let base = self.base_value(field);
        match mutation {
            FieldMutation::Scalar(delta) => merge::merge_scalar(&base, delta, field.value_type.element()?),
            FieldMutation::Collection(delta) => delta.merge(&base, field.value_type.element()?),
            FieldMutation::Object(nested) => nested.view().map(Value::Object),
        }
    }

    /// The record as it will be once the mutations are written.
    ///
    /// A removed field reads back as its default, as a decoded item would.
    pub fn view(&self) -> Result<Record> {
        let schema = self.table.type_schema(&self.type_name)?;
        let mut record = self.base.clone();
        for (name, mutation) in &self.mutations {
            let field = schema.require_field(name)?;
            let value = match self.latest(field, mutation)? {
                Value::Null if field.persist => field.absent_value(),
                value => value,
            };
            record.set(name.clone(), value);
        }
        Ok(record)
    }

    /// Emit the clauses of every mutation under `path`.
    pub fn compile(&self, builder: &mut ExpressionBuilder<'_>, path: &[String]) -> Result<()> {
        let schema = self.table.type_schema(&self.type_name)?;
        for (name, mutation) in &self.mutations {
            let field = schema.require_field(name)?;
            if !field.persist || mutation.is_empty() {
                continue;
            }
            let mut field_path = path.to_vec();
            field_path.push(field.wire_name.clone());
            let base = self.base_value(field);
            match mutation {
                FieldMutation::Scalar(ScalarDelta { remove: true, .. }) => {
                    builder.remove_field(&field_path);
                }
                FieldMutation::Scalar(ScalarDelta { set: Some(value), .. }) => {
                    builder.set_field(&field_path, field, value)?;
                }
                FieldMutation::Scalar(ScalarDelta { delta: Some(amount), .. }) if field.writes_relative() => {
                    builder.increment_number(&field_path, *amount, field.value_type.element()?)?;
                }
                FieldMutation::Collection(delta) if field.writes_relative() => {
                    builder.merge_collection(&field_path, &field.value_type, &base, delta)?;
                }
                FieldMutation::Object(nested) if !base.is_null() => {
                    let mut child = builder.nested();
                    nested.compile(&mut child, &field_path)?;
                    builder.merge(child)?;
                }
                FieldMutation::Scalar(_) | FieldMutation::Collection(_) | FieldMutation::Object(_) => {
                    let latest = self.latest(field, mutation)?;
                    builder.set_field(&field_path, field, &latest)?;
                }
            }
        }
        Ok(())
    }
}

/// A pending, single-use set of mutations against one stored record.
///
/// Sending consumes the update. It is not `Clone`, so one update reaches the
/// backend at most once.
///
/// ```rust
/// use dynamodb_mapper::record::{Record, Value};
/// use dynamodb_mapper::schema::Registry;
/// use dynamodb_mapper::update::Update;
///
/// let registry = Registry::from_json(r#"{"tables": [{
///     "name": "players", "root_type": "Player", "hash_key": "id", "version": 1,
///     "types": [{"name": "Player", "fields": [
///         {"name": "id", "element_type": "string"},
///         {"name": "score", "element_type": "long", "delta_merge": true}
///     ]}]
/// }]}"#).unwrap();
/// let table = registry.table("players").unwrap().clone();
///
/// let base = Record::new("Player").with("id", "p1").with("score", 10);
/// let mut update = Update::new(table, base).unwrap();
/// update.increment("score", 5).unwrap();
/// assert_eq!(update.view().unwrap().get("score"), Some(&Value::from(15)));
/// ```
#[derive(Debug, PartialEq)]
pub struct Update {
    key: Item,
    object: ObjectUpdate,
}

impl Update {
    /// An update against a root record of the table.
    pub fn new(table: Arc<TableSchema>, base: Record) -> Result<Self> {
        if base.type_name() != table.root_type {
            return Err(Error::contract(format!(
                "table `{}` stores `{}` records, got `{}`",
                table.name,
                table.root_type,
                base.type_name()
            )));
        }
        let key = table.key_item(&base)?;
        let object = ObjectUpdate::new(table, base, true)?;
        Ok(Self { key, object })
    }

    /// The table the update targets.
    pub fn table(&self) -> &Arc<TableSchema> {
        &self.object.table
    }

    /// The stored key of the record.
    pub fn key(&self) -> &Item {
        &self.key
    }

    /// Whether sending the update changes the stored item.
    ///
    /// False when every mutation is empty or touches only non-persisted fields.
    pub fn writes(&self) -> Result<bool> {
        let mut builder = ExpressionBuilder::new(self.table(), "");
        self.object.compile(&mut builder, &[])?;
        Ok(builder.has_updates())
    }

    /// The record as it will be once written, revision included.
    pub fn view(&self) -> Result<Record> {
        let mut record = self.object.view()?;
        if self.table().optimistic_locking && self.writes()? {
            record.set_revision(self.object.base.revision() + 1);
        }
        Ok(record)
    }

    /// Compile the mutations into one update expression.
    ///
    /// The write is conditioned on the stored item being at the table's
    /// schema version and, with optimistic locking, at the observed revision.
    /// Tables with migrations disabled accept any version up to their own,
    /// since their stale items are never upgraded.
    pub fn compile(&self) -> Result<CompiledExpression> {
        let table = self.table();
        let mut builder = ExpressionBuilder::new(table, "");
        self.object.compile(&mut builder, &[])?;
        if !builder.has_updates() {
            return Ok(builder.build());
        }
        let version_path = [table.version_attribute.clone()];
        if table.migrations_enabled {
            builder.condition_equals(&version_path, AttributeValue::N(table.version.to_string()));
        } else {
            let above = AttributeValue::N((u64::from(table.version) + 1).to_string());
            builder.condition_absent_or_less(&version_path, above);
        }
        if table.optimistic_locking {
            let observed = self.object.base.revision();
            let revision = [table.revision_attribute.clone()];
            builder.set_attribute(&revision, AttributeValue::N((observed + 1).to_string()));
            if observed != 0 {
                builder.condition_equals(&revision, AttributeValue::N(observed.to_string()));
            }
        }
        Ok(builder.build())
    }

    pub(crate) fn decode(&self, item: &Item) -> Result<Record> {
        codec::decode_record(self.table(), item)
    }
}

impl ops::Deref for Update {
    type Target = ObjectUpdate;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl ops::DerefMut for Update {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.object
    }
}
