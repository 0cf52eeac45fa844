#![deny(missing_docs)]

//! # DynamoDB Mapper
//!
//! A schema-driven record mapper for Amazon DynamoDB tables.
//!
//! ## Overview
//!
//! Tables, their record types and their secondary indexes are declared once
//! in a [`Registry`](schema::Registry). From there the crate:
//! - Converts dynamic [`Record`](record::Record)s to and from stored items
//! - Compiles field-level mutations into update expressions with every path and
//!   value aliased, so reserved words never reach the backend
//! - Merges counter, set, list and map deltas into a virtual view of the record
//! - Upgrades items stored at older schema versions lazily, on read
//! - Guards writes with an optimistic-locking revision
//! - Throttles each table to a fraction of its provisioned throughput
//!
//! ## Quick Example
//!
//! ```no_run
//! use aws_sdk_dynamodb::Client;
//! use dynamodb_mapper::{
//!     mapper::{Mapper, MapperConfig},
//!     read,
//!     record::{Record, RecordKey},
//!     schema::Registry,
//!     write,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let client = Client::from_conf(aws_sdk_dynamodb::config::Config::builder().build());
//! let registry = Registry::from_json(r#"{"tables": [{
//!     "name": "players", "root_type": "Player", "hash_key": "id", "version": 1,
//!     "optimistic_locking": true,
//!     "types": [{"name": "Player", "fields": [
//!         {"name": "id", "element_type": "string"},
//!         {"name": "score", "element_type": "long", "delta_merge": true},
//!         {"name": "tags", "element_type": "string", "kind": "set"}
//!     ]}]
//! }]}"#)?;
//! let mapper = Mapper::new(Arc::new(client), Arc::new(registry), MapperConfig::default());
//!
//! let player = Record::new("Player").with("id", "p1").with("score", 10);
//! let saved = write::save_item::SaveItem::new("players", player).send(&mapper).await?;
//!
//! // One UpdateItem call, conditioned on the schema version and the observed revision
//! let mut update = mapper.update("players", saved)?;
//! update.increment("score", 5)?;
//! update.add_element("tags", "veteran")?;
//! let updated = write::update_item::UpdateItem::from(update).send(&mapper).await?;
//!
//! let get_item = read::get_item::GetItem {
//!     table_name: "players".to_string(),
//!     key: RecordKey::new("p1"),
//!     ..Default::default()
//! };
//! assert_eq!(get_item.send(&mapper).await?, Some(updated));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`mod@schema`] - Table, type, field and index definitions
//! - [`mod@record`] - Dynamic record values
//! - [`mod@codec`] - Record to item conversion
//! - [`mod@expression`] - Update, condition and projection expressions
//! - [`mod@merge`] - Delta reconciliation
//! - [`mod@update`] - Pending mutations against a loaded record
//! - [`mod@migration`] - Lazy schema migration
//! - [`mod@limiter`] - Per-table throughput limiting
//! - [`mod@mapper`] - The request orchestrator
//! - [`mod@read`] - Read operations (GetItem, Query, Scan, BatchGetItem, TransactGetItems)
//! - [`mod@write`] - Write operations (SaveItem, UpdateItem, DeleteItem, BatchWriteItem, TransactWriteItems)

/// Conversion between records and stored items.
pub mod codec;

/// Helpers shared by read and write operations.
pub mod common;

/// Error types.
pub mod error;

/// Expression compilation and placeholder aliasing.
pub mod expression;

/// Closed-loop rate limiting against provisioned throughput.
pub mod limiter;

/// The request orchestrator.
pub mod mapper;

/// Reconciliation of base values with pending deltas.
pub mod merge;

/// Schema migrations applied on read.
pub mod migration;

/// Read operations for retrieving records from DynamoDB tables.
///
/// Includes operations for:
/// - Getting individual records by key
/// - Querying records with key conditions
/// - Scanning entire tables or indexes
/// - Batch and transactional reads across tables
pub mod read;

/// Dynamic records and values.
pub mod record;

/// Schema model and registry.
pub mod schema;

/// The backend seam.
pub mod store;

/// Field-level updates against loaded records.
pub mod update;

/// Write operations for modifying records in DynamoDB tables.
///
/// Includes operations for:
/// - Saving records, with creation and revision guards
/// - Updating records with compiled update expressions
/// - Deleting records
/// - Batch and transactional writes across tables
pub mod write;
