//! Lazy, on-read schema migration.
//!
//! A stored item is [`Current`](MigrationState::Current) when its version
//! equals the table version, [`Stale`](MigrationState::Stale) when older and
//! [`Incompatible`](MigrationState::Incompatible) when newer. Stale items are
//! upgraded in two passes over every step above the stored version: all
//! `migrate` calls first, then all `post_migrate` calls, both in ascending
//! (version, sequence) order.

use crate::{
    codec,
    common::Item,
    error::{Error, Result},
    schema::TableSchema,
};

use aws_sdk_dynamodb::types::AttributeValue;
use std::{collections, sync};

/// One migration step, applied to raw stored items.
pub trait Migration: Send + Sync {
    /// The schema version this step upgrades to.
    fn version(&self) -> u32;

    /// Order among steps targeting the same version.
    fn sequence(&self) -> u32 {
        0
    }

    /// Primary changes of the step.
    fn migrate(&self, item: &mut Item) -> Result<()>;

    /// Derived changes, run after every step's primary changes.
    fn post_migrate(&self, _item: &mut Item) -> Result<()> {
        Ok(())
    }
}

/// How a stored version relates to the table version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MigrationState {
    /// Stored at the table version.
    Current,
    /// Stored at an older version.
    Stale {
        /// The stored version.
        stored: u32,
    },
    /// Stored at a newer version than this registry knows.
    Incompatible {
        /// The stored version.
        stored: u32,
    },
}

impl MigrationState {
    /// Classify a stored version.
    pub fn of(table: &TableSchema, stored: u32) -> Self {
        match stored.cmp(&table.version) {
            std::cmp::Ordering::Equal => Self::Current,
            std::cmp::Ordering::Less => Self::Stale { stored },
            std::cmp::Ordering::Greater => Self::Incompatible { stored },
        }
    }
}

/// Outcome of [`Migrator::upgrade`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Upgrade {
    /// Nothing to do.
    Current,
    /// The item is stale but the table has migrations disabled; it was left as stored.
    Unmigrated {
        /// The stored version.
        stored: u32,
    },
    /// The item was upgraded in memory and stamped with the table version.
    Migrated {
        /// The version the item was stored at.
        from: u32,
    },
}

/// Applies registered migration steps to loaded items.
#[derive(Debug, Default)]
pub struct Migrator {
    warned: sync::Mutex<collections::HashSet<String>>,
}

impl Migrator {
    /// A migrator that has not warned about any table yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn warn_missing_version(&self, table: &TableSchema) {
        let mut warned = self.warned.lock().unwrap_or_else(sync::PoisonError::into_inner);
        if warned.insert(table.name.clone()) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                table = %table.name,
                attribute = %table.version_attribute,
                "item has no schema version, treating it as version 0"
            );
        }
    }

    /// Bring a stored item up to the table version.
    ///
    /// A missing version attribute counts as version 0. An item newer than the
    /// table is rejected untouched.
    pub fn upgrade(
        &self,
        table: &TableSchema,
        steps: &[sync::Arc<dyn Migration>],
        item: &mut Item,
    ) -> Result<Upgrade> {
        let stored = match codec::stored_version(table, item)? {
            Some(stored) => stored,
            None => {
                self.warn_missing_version(table);
                0
            }
        };
        match MigrationState::of(table, stored) {
            MigrationState::Current => Ok(Upgrade::Current),
            MigrationState::Incompatible { stored } => Err(Error::UnsupportedSchemaVersion {
                table: table.name.clone(),
                stored,
                supported: table.version,
            }),
            MigrationState::Stale { stored } if !table.migrations_enabled => {
                Ok(Upgrade::Unmigrated { stored })
            }
            MigrationState::Stale { stored } => {
                let pending: Vec<_> = steps.iter().filter(|step| step.version() > stored).collect();
                for step in &pending {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        table = %table.name,
                        version = step.version(),
                        sequence = step.sequence(),
                        "applying migration"
                    );
                    step.migrate(item)?;
                }
                for step in &pending {
                    step.post_migrate(item)?;
                }
                item.insert(
                    table.version_attribute.clone(),
                    AttributeValue::N(table.version.to_string()),
                );
                Ok(Upgrade::Migrated { from: stored })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::description::TableDescription;

    use rstest::rstest;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Step {
        version: u32,
        sequence: u32,
        log: Log,
    }

    impl Migration for Step {
        fn version(&self) -> u32 {
            self.version
        }

        fn sequence(&self) -> u32 {
            self.sequence
        }

        fn migrate(&self, item: &mut Item) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("migrate {}.{}", self.version, self.sequence));
            item.insert(
                format!("m{}", self.version),
                AttributeValue::Bool(true),
            );
            Ok(())
        }

        fn post_migrate(&self, _item: &mut Item) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("post {}.{}", self.version, self.sequence));
            Ok(())
        }
    }

    fn table(migrations: bool) -> TableSchema {
        let description: TableDescription = serde_json::from_value(json!({
            "name": "t",
            "root_type": "Root",
            "hash_key": "id",
            "version": 3,
            "migrations": migrations,
            "types": [{"name": "Root", "fields": [{"name": "id", "element_type": "string"}]}]
        }))
        .unwrap();
        TableSchema::try_from(description).unwrap()
    }

    fn steps(log: &Log) -> Vec<Arc<dyn Migration>> {
        [(1, 0), (2, 0), (2, 1), (3, 0)]
            .into_iter()
            .map(|(version, sequence)| {
                Arc::new(Step {
                    version,
                    sequence,
                    log: log.clone(),
                }) as Arc<dyn Migration>
            })
            .collect()
    }

    fn item(version: Option<u32>) -> Item {
        let mut item = Item::from([("id".to_string(), AttributeValue::S("a".to_string()))]);
        if let Some(version) = version {
            item.insert("_v".to_string(), AttributeValue::N(version.to_string()));
        }
        item
    }

    #[rstest]
    #[case::from_one(
        Some(1),
        Upgrade::Migrated { from: 1 },
        vec!["migrate 2.0", "migrate 2.1", "migrate 3.0", "post 2.0", "post 2.1", "post 3.0"]
    )]
    #[case::legacy_without_version(
        None,
        Upgrade::Migrated { from: 0 },
        vec![
            "migrate 1.0", "migrate 2.0", "migrate 2.1", "migrate 3.0",
            "post 1.0", "post 2.0", "post 2.1", "post 3.0",
        ]
    )]
    #[case::current(Some(3), Upgrade::Current, vec![])]
    fn test_upgrade_applies_pending_steps_in_two_passes(
        #[case] version: Option<u32>,
        #[case] expected: Upgrade,
        #[case] expected_log: Vec<&str>,
    ) {
        let log = Log::default();
        let mut item = item(version);
        let upgrade = Migrator::new()
            .upgrade(&table(true), &steps(&log), &mut item)
            .unwrap();
        assert_eq!(upgrade, expected);
        assert_eq!(*log.lock().unwrap(), expected_log);
        assert_eq!(item["_v"], AttributeValue::N("3".to_string()));
    }

    #[test]
    fn test_newer_item_is_incompatible() {
        let log = Log::default();
        let mut item = item(Some(4));
        let before = item.clone();
        let error = Migrator::new()
            .upgrade(&table(true), &steps(&log), &mut item)
            .unwrap_err();
        assert!(matches!(
            error,
            Error::UnsupportedSchemaVersion { stored: 4, supported: 3, .. }
        ));
        assert_eq!(item, before);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disabled_migrations_leave_item_untouched() {
        let log = Log::default();
        let mut item = item(Some(1));
        let upgrade = Migrator::new()
            .upgrade(&table(false), &steps(&log), &mut item)
            .unwrap();
        assert_eq!(upgrade, Upgrade::Unmigrated { stored: 1 });
        assert_eq!(item["_v"], AttributeValue::N("1".to_string()));
    }
}
