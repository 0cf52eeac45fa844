use crate::{
    error::{Error, Result},
    migration::Migration,
    schema::{
        description::SchemaDescription,
        table::TableSchema,
    },
};

use indexmap::IndexMap;
use std::{collections, fmt, sync::Arc};

/// Validated, immutable schema of every table, with their migrations.
///
/// Built once and shared read-only, usually behind an [`Arc`].
pub struct Registry {
    tables: IndexMap<String, Arc<TableSchema>>,
    migrations: collections::HashMap<String, Vec<Arc<dyn Migration>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let migrations: collections::BTreeMap<_, _> = self
            .migrations
            .iter()
            .map(|(table, steps)| {
                let steps: Vec<_> = steps
                    .iter()
                    .map(|step| (step.version(), step.sequence()))
                    .collect();
                (table, steps)
            })
            .collect();
        f.debug_struct("Registry")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("migrations", &migrations)
            .finish()
    }
}

impl Registry {
    /// Start building a registry from a description.
    pub fn builder(description: SchemaDescription) -> RegistryBuilder {
        RegistryBuilder {
            description,
            migrations: Vec::new(),
        }
    }

    /// Build a registry with no migrations.
    pub fn from_description(description: SchemaDescription) -> Result<Self> {
        Self::builder(description).build()
    }

    /// Build a registry with no migrations from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_description(SchemaDescription::from_json(json)?)
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Result<&Arc<TableSchema>> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::contract(format!("table `{name}` is not registered")))
    }

    /// All tables, in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values()
    }

    /// Migration steps of a table, in ascending (version, sequence) order.
    pub fn migrations(&self, table: &str) -> &[Arc<dyn Migration>] {
        self.migrations
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Collects migrations before validating the whole registry.
///
/// ```rust
/// use dynamodb_mapper::{common::Item, error::Result, migration::Migration};
/// use dynamodb_mapper::schema::{Registry, description::SchemaDescription};
/// use aws_sdk_dynamodb::types::AttributeValue;
///
/// struct AddLevel;
///
/// impl Migration for AddLevel {
///     fn version(&self) -> u32 {
///         2
///     }
///
///     fn migrate(&self, item: &mut Item) -> Result<()> {
///         item.entry("level".to_string())
///             .or_insert(AttributeValue::N("1".to_string()));
///         Ok(())
///     }
/// }
///
/// let description = SchemaDescription::from_json(r#"{"tables": [{
///     "name": "players", "root_type": "Player", "hash_key": "id", "version": 2,
///     "migrations": true,
///     "types": [{"name": "Player", "fields": [
///         {"name": "id", "element_type": "string"},
///         {"name": "level", "element_type": "integer"}
///     ]}]
/// }]}"#).unwrap();
/// let registry = Registry::builder(description)
///     .migration("players", AddLevel)
///     .build()
///     .unwrap();
/// assert_eq!(registry.migrations("players").len(), 1);
/// ```
pub struct RegistryBuilder {
    description: SchemaDescription,
    migrations: Vec<(String, Arc<dyn Migration>)>,
}

impl RegistryBuilder {
    /// Register a migration step for a table.
    pub fn migration(mut self, table: impl Into<String>, migration: impl Migration + 'static) -> Self {
        self.migrations.push((table.into(), Arc::new(migration)));
        self
    }

    /// Validate the description and the migrations.
    pub fn build(self) -> Result<Registry> {
        let mut tables = IndexMap::with_capacity(self.description.tables.len());
        for table_description in self.description.tables {
            let table = TableSchema::try_from(table_description)?;
            if tables.contains_key(&table.name) {
                return Err(Error::schema(format!("table `{}` is declared twice", table.name)));
            }
            tables.insert(table.name.clone(), Arc::new(table));
        }
        let mut migrations: collections::HashMap<String, Vec<Arc<dyn Migration>>> =
            collections::HashMap::new();
        for (table_name, migration) in self.migrations {
            let Some(table) = tables.get(&table_name) else {
                return Err(Error::schema(format!(
                    "migration registered for unknown table `{table_name}`"
                )));
            };
            let version = migration.version();
            if version == 0 || version > table.version {
                return Err(Error::schema(format!(
                    "migration for table `{table_name}` targets version {version}, outside 1..={}",
                    table.version
                )));
            }
            migrations.entry(table_name).or_default().push(migration);
        }
        for steps in migrations.values_mut() {
            steps.sort_by_key(|step| (step.version(), step.sequence()));
        }
        Ok(Registry { tables, migrations })
    }
}
