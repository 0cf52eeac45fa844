//! Write requests.
//!
//! This module provides one request per backend write operation:
//! - Saving whole records, with overwrite and optimistic-lock conditions
//! - Sending the compiled mutations of an [`Update`](crate::update::Update)
//! - Deleting items by key
//! - Batch writing records across tables
//! - Writing items in one transaction

/// Batch write item operation for storing and deleting many items.
pub mod batch_write_item;

/// Conditions and encoded request parts shared by write operations.
pub(crate) mod common;

/// Delete item operation for removing items from tables.
pub mod delete_item;

/// Save item operation for creating or replacing whole records.
pub mod save_item;

/// Transact write items operation for atomic multi-item writes.
pub mod transact_write_items;

/// Update item operation for applying field-level mutations.
pub mod update_item;
