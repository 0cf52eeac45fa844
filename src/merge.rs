//! Pure reconciliation of a base value with pending deltas.
//!
//! The same functions back both [`Update::view`](crate::update::Update::view)
//! and the clause selection of the update compiler, so the virtual view of a
//! record always matches what the backend ends up storing.

use crate::{
    error::{Error, Result},
    record::{Number, Value},
    schema::ElementType,
};

use indexmap::{IndexMap, IndexSet};

/// Pending change to a scalar field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScalarDelta {
    /// Replacement value. Wins over `delta`.
    pub set: Option<Value>,
    /// Accumulated numeric delta.
    pub delta: Option<Number>,
    /// Whether the field is removed.
    pub remove: bool,
}

impl ScalarDelta {
    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.set.is_none() && self.delta.is_none() && !self.remove
    }
}

/// Pending change to a map field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapDelta {
    /// Entries written with an explicit value.
    pub updates: IndexMap<String, Value>,
    /// Accumulated numeric deltas per entry.
    pub deltas: IndexMap<String, Number>,
    /// Entries removed. Deletes win over updates of the same key.
    pub deletes: IndexSet<String>,
    /// Whether the base entries are discarded first.
    pub clear: bool,
}

/// Pending change to a set field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetDelta {
    /// Elements added.
    pub adds: Vec<Value>,
    /// Elements removed. Deletes win over adds of the same element.
    pub deletes: Vec<Value>,
    /// Whether the base elements are discarded first.
    pub clear: bool,
}

/// Pending change to a list field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListDelta {
    /// Elements appended after the base elements.
    pub appends: Vec<Value>,
    /// Whether the base elements are discarded first.
    pub clear: bool,
}

/// Pending change to a collection field.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionDelta {
    /// A map change.
    Map(MapDelta),
    /// A set change.
    Set(SetDelta),
    /// A list change.
    List(ListDelta),
}

impl CollectionDelta {
    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Map(delta) => {
                !delta.clear
                    && delta.updates.is_empty()
                    && delta.deltas.is_empty()
                    && delta.deletes.is_empty()
            }
            Self::Set(delta) => !delta.clear && delta.adds.is_empty() && delta.deletes.is_empty(),
            Self::List(delta) => !delta.clear && delta.appends.is_empty(),
        }
    }

    /// Whether the base value is discarded.
    pub fn clears(&self) -> bool {
        match self {
            Self::Map(delta) => delta.clear,
            Self::Set(delta) => delta.clear,
            Self::List(delta) => delta.clear,
        }
    }

    /// Reconcile the delta with a base value.
    pub fn merge(&self, base: &Value, element: &ElementType) -> Result<Value> {
        match self {
            Self::Map(delta) => merge_map(base, delta, element),
            Self::Set(delta) => merge_set(base, delta),
            Self::List(delta) => merge_list(base, delta),
        }
    }
}

fn add_to(base: Option<&Value>, delta: Number, element: &ElementType) -> Result<Value> {
    let base = match base {
        None | Some(Value::Null) => Number::zero(element),
        Some(Value::Number(number)) => *number,
        Some(other) => {
            return Err(Error::codec(format!(
                "cannot add a number to a {}",
                other.kind_name()
            )));
        }
    };
    Ok(Value::Number(base.add(delta, element)))
}

/// `set`, else `base + delta` with an absent base counting as zero, else `base`.
pub fn merge_scalar(base: &Value, delta: &ScalarDelta, element: &ElementType) -> Result<Value> {
    if delta.remove {
        return Ok(Value::Null);
    }
    if let Some(value) = &delta.set {
        return Ok(value.clone());
    }
    match delta.delta {
        Some(amount) => add_to(Some(base), amount, element),
        None => Ok(base.clone()),
    }
}

/// `(base ∪ updated ∪ incremented) − deleted`, starting from empty when cleared.
pub fn merge_map(base: &Value, delta: &MapDelta, element: &ElementType) -> Result<Value> {
    let mut entries = match (base, delta.clear) {
        (_, true) | (Value::Null, _) => IndexMap::new(),
        (Value::Map(entries), false) => entries.clone(),
        (other, false) => {
            return Err(Error::codec(format!("expected map, got {}", other.kind_name())));
        }
    };
    for (key, value) in &delta.updates {
        entries.insert(key.clone(), value.clone());
    }
    for (key, amount) in &delta.deltas {
        if delta.updates.contains_key(key) {
            continue;
        }
        let value = add_to(entries.get(key), *amount, element)?;
        entries.insert(key.clone(), value);
    }
    entries.retain(|key, _| !delta.deletes.contains(key));
    Ok(Value::Map(entries))
}

/// `(base ∪ added) − deleted`, starting from empty when cleared.
pub fn merge_set(base: &Value, delta: &SetDelta) -> Result<Value> {
    let mut elements = match (base, delta.clear) {
        (_, true) | (Value::Null, _) => Vec::new(),
        (Value::Set(elements) | Value::List(elements), false) => elements.clone(),
        (other, false) => {
            return Err(Error::codec(format!("expected set, got {}", other.kind_name())));
        }
    };
    for value in &delta.adds {
        if !elements.contains(value) {
            elements.push(value.clone());
        }
    }
    elements.retain(|value| !delta.deletes.contains(value));
    Ok(Value::Set(elements))
}

/// Base elements followed by appended elements, or only the appended ones when cleared.
pub fn merge_list(base: &Value, delta: &ListDelta) -> Result<Value> {
    let mut elements = match (base, delta.clear) {
        (_, true) | (Value::Null, _) => Vec::new(),
        (Value::List(elements), false) => elements.clone(),
        (other, false) => {
            return Err(Error::codec(format!("expected list, got {}", other.kind_name())));
        }
    };
    elements.extend(delta.appends.iter().cloned());
    Ok(Value::List(elements))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn map(entries: Vec<(&str, i64)>) -> Value {
        Value::from(entries)
    }

    #[rstest]
    #[case::untouched(Value::from(10), ScalarDelta::default(), Value::from(10))]
    #[case::set(Value::from(10), ScalarDelta { set: Some(Value::from(3)), ..Default::default() }, Value::from(3))]
    #[case::set_wins_over_delta(
        Value::from(10),
        ScalarDelta { set: Some(Value::from(3)), delta: Some(Number::Int(5)), remove: false },
        Value::from(3)
    )]
    #[case::delta(Value::from(10), ScalarDelta { delta: Some(Number::Int(5)), ..Default::default() }, Value::from(15))]
    #[case::delta_on_absent(Value::Null, ScalarDelta { delta: Some(Number::Int(5)), ..Default::default() }, Value::from(5))]
    #[case::remove(Value::from(10), ScalarDelta { remove: true, ..Default::default() }, Value::Null)]
    fn test_merge_scalar(#[case] base: Value, #[case] delta: ScalarDelta, #[case] expected: Value) {
        assert_eq!(merge_scalar(&base, &delta, &ElementType::Long).unwrap(), expected);
    }

    #[rstest]
    #[case::untouched(map(vec![("a", 1)]), MapDelta::default(), map(vec![("a", 1)]))]
    #[case::union(
        map(vec![("a", 1)]),
        MapDelta {
            updates: IndexMap::from([("b".to_string(), Value::from(2))]),
            deltas: IndexMap::from([("a".to_string(), Number::Int(4)), ("c".to_string(), Number::Int(1))]),
            ..Default::default()
        },
        map(vec![("a", 5), ("b", 2), ("c", 1)])
    )]
    #[case::delete_wins(
        map(vec![("a", 1)]),
        MapDelta {
            updates: IndexMap::from([("b".to_string(), Value::from(2))]),
            deletes: IndexSet::from(["a".to_string(), "b".to_string()]),
            ..Default::default()
        },
        map(vec![])
    )]
    #[case::clear_then_put(
        map(vec![("a", 1)]),
        MapDelta {
            updates: IndexMap::from([("b".to_string(), Value::from(2))]),
            clear: true,
            ..Default::default()
        },
        map(vec![("b", 2)])
    )]
    fn test_merge_map(#[case] base: Value, #[case] delta: MapDelta, #[case] expected: Value) {
        assert_eq!(merge_map(&base, &delta, &ElementType::Long).unwrap(), expected);
    }

    #[rstest]
    #[case::untouched(vec!["a"], SetDelta::default(), vec!["a"])]
    #[case::add_and_delete(
        vec!["a", "b"],
        SetDelta { adds: vec!["c".into()], deletes: vec!["a".into()], clear: false },
        vec!["b", "c"]
    )]
    #[case::delete_wins(vec![], SetDelta { adds: vec!["c".into()], deletes: vec!["c".into()], clear: false }, vec![])]
    #[case::clear(vec!["a"], SetDelta { clear: true, ..Default::default() }, vec![])]
    fn test_merge_set(#[case] base: Vec<&str>, #[case] delta: SetDelta, #[case] expected: Vec<&str>) {
        let base = Value::Set(base.into_iter().map(Value::from).collect());
        let expected = Value::Set(expected.into_iter().map(Value::from).collect());
        assert_eq!(merge_set(&base, &delta).unwrap(), expected);
    }

    #[rstest]
    #[case::untouched(vec!["a"], ListDelta::default(), vec!["a"])]
    #[case::append(vec!["a"], ListDelta { appends: vec!["b".into(), "a".into()], clear: false }, vec!["a", "b", "a"])]
    #[case::clear(vec!["a"], ListDelta { appends: vec!["b".into()], clear: true }, vec!["b"])]
    fn test_merge_list(#[case] base: Vec<&str>, #[case] delta: ListDelta, #[case] expected: Vec<&str>) {
        let base = Value::List(base.into_iter().map(Value::from).collect());
        let expected = Value::List(expected.into_iter().map(Value::from).collect());
        assert_eq!(merge_list(&base, &delta).unwrap(), expected);
    }

    #[test]
    fn test_integer_delta_wraps_in_declared_width() {
        let delta = ScalarDelta {
            delta: Some(Number::Int(1)),
            ..Default::default()
        };
        assert_eq!(
            merge_scalar(&Value::from(i32::MAX), &delta, &ElementType::Integer).unwrap(),
            Value::from(i32::MIN)
        );
    }
}
