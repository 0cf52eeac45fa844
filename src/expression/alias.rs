use crate::error::{Error, Result};

use aws_sdk_dynamodb::types;
use indexmap::IndexMap;
use std::collections;

/// Hands out `#name` and `:value` placeholders for one expression.
///
/// Each distinct path segment gets exactly one alias; asking again for the
/// same segment returns the memoized alias. Aliases carry the generator's
/// prefix so generators with different prefixes can be merged.
///
/// ```rust
/// use dynamodb_mapper::expression::alias::AliasGenerator;
///
/// let mut aliases = AliasGenerator::new("u");
/// assert_eq!(aliases.path(["stats", "wins"]), "#un0.#un1");
/// assert_eq!(aliases.path(["stats"]), "#un0");
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AliasGenerator {
    prefix: String,
    segments: IndexMap<String, String>,
    names: collections::HashMap<String, String>,
    values: collections::HashMap<String, types::AttributeValue>,
    next_value: usize,
}

impl AliasGenerator {
    /// A generator whose aliases start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// The alias prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The alias of one path segment.
    pub fn name(&mut self, segment: &str) -> String {
        if let Some(alias) = self.segments.get(segment) {
            return alias.clone();
        }
        let alias = format!("#{}n{}", self.prefix, self.segments.len());
        self.segments.insert(segment.to_string(), alias.clone());
        self.names.insert(alias.clone(), segment.to_string());
        alias
    }

    /// The aliased form of a path given as segments.
    pub fn path<I, S>(&mut self, segments: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .map(|segment| self.name(segment.as_ref()))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// A fresh placeholder bound to `value`.
    pub fn value(&mut self, value: types::AttributeValue) -> String {
        let alias = format!(":{}v{}", self.prefix, self.next_value);
        self.next_value += 1;
        self.values.insert(alias.clone(), value);
        alias
    }

    /// Absorb the aliases of another generator.
    ///
    /// Fails when the two generators share a prefix, since their aliases
    /// could then collide.
    pub fn merge(&mut self, other: Self) -> Result<()> {
        if other.prefix == self.prefix {
            return Err(Error::contract(format!(
                "cannot merge alias generators sharing prefix `{}`",
                self.prefix
            )));
        }
        for (alias, segment) in other.names {
            if self.names.insert(alias.clone(), segment).is_some() {
                return Err(Error::contract(format!("alias `{alias}` is defined twice")));
            }
        }
        for (alias, value) in other.values {
            if self.values.insert(alias.clone(), value).is_some() {
                return Err(Error::contract(format!("alias `{alias}` is defined twice")));
            }
        }
        Ok(())
    }

    /// Name aliases, alias → segment.
    pub fn names(&self) -> &collections::HashMap<String, String> {
        &self.names
    }

    /// Value aliases, alias → value.
    pub fn values(&self) -> &collections::HashMap<String, types::AttributeValue> {
        &self.values
    }

    pub(crate) fn into_maps(
        self,
    ) -> (
        collections::HashMap<String, String>,
        collections::HashMap<String, types::AttributeValue>,
    ) {
        (self.names, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_are_memoized() {
        let mut aliases = AliasGenerator::new("");
        assert_eq!(aliases.path(["a", "b"]), "#n0.#n1");
        assert_eq!(aliases.path(["b", "a"]), "#n1.#n0");
        assert_eq!(aliases.names().len(), 2);
    }

    #[test]
    fn test_values_are_never_reused() {
        let mut aliases = AliasGenerator::new("x");
        let first = aliases.value(types::AttributeValue::N("1".to_string()));
        let second = aliases.value(types::AttributeValue::N("1".to_string()));
        assert_eq!((first.as_str(), second.as_str()), (":xv0", ":xv1"));
    }

    #[test]
    fn test_merge_requires_distinct_prefixes() {
        let mut left = AliasGenerator::new("a");
        left.name("f");
        let mut right = AliasGenerator::new("b");
        right.name("f");
        right.value(types::AttributeValue::Bool(true));
        left.merge(right).unwrap();
        assert_eq!(left.names().len(), 2);
        assert_eq!(left.values().len(), 1);
        let error = left.merge(AliasGenerator::new("a")).unwrap_err();
        assert!(matches!(error, Error::ContractViolation(_)));
    }
}
