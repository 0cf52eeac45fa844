//! Read requests.
//!
//! This module provides one request per backend read operation:
//! - Getting individual records by key
//! - Querying the records of one partition of a table or index
//! - Scanning whole tables or indexes
//! - Batch reading records across tables
//! - Reading items in one transaction
//!
//! Every loaded item is migrated to its table's schema version before it is
//! decoded.

/// Batch get item operation for reading many records efficiently.
pub mod batch_get_item;

/// Arguments and results shared by read operations.
pub mod common;

/// Get item operation for reading a single record by key.
pub mod get_item;

/// Query operation for reading records with key conditions.
pub mod query;

/// Scan operation for reading every record of a table or index.
pub mod scan;

/// Transact get items operation for consistent multi-item reads.
pub mod transact_get_items;
