//! An in-process [`Store`].
//!
//! Tables are created from a [`Registry`]. Update, condition, key-condition
//! and projection expressions are parsed and evaluated the way the hosted
//! backend does for the subset the mapper emits. Every call is recorded, and
//! batch calls can be told to leave work unprocessed.

mod eval;

use super::{Store, context, tables_context};
use crate::{
    common::Item,
    error::{Error, RequestContext, Result},
    schema::{KeyAccessor, Registry},
};

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    operation::{
        batch_get_item::{BatchGetItemInput, BatchGetItemOutput},
        batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput},
        delete_item::{DeleteItemInput, DeleteItemOutput},
        describe_table::{DescribeTableInput, DescribeTableOutput},
        get_item::{GetItemInput, GetItemOutput},
        put_item::{PutItemInput, PutItemOutput},
        query::{QueryInput, QueryOutput},
        scan::{ScanInput, ScanOutput},
        transact_get_items::{TransactGetItemsInput, TransactGetItemsOutput},
        transact_write_items::{TransactWriteItemsInput, TransactWriteItemsOutput},
        update_item::{UpdateItemInput, UpdateItemOutput},
    },
    types::{
        ConsumedCapacity, GlobalSecondaryIndexDescription, ItemResponse, KeysAndAttributes,
        ProvisionedThroughputDescription, ReturnConsumedCapacity, ReturnValue, TableDescription,
        TransactWriteItem,
    },
};
use eval::{Aliases, EvalResult};
use std::{cmp::Ordering, collections, sync};

/// One recorded backend call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    /// Backend operation name, e.g. `BatchWriteItem`.
    pub operation: &'static str,
    /// Target table, or comma-separated tables for multi-table calls.
    pub table: String,
    /// Keys or write requests carried by the call.
    pub items: usize,
}

#[derive(Clone, Debug)]
struct KeySchema {
    hash: String,
    range: Option<String>,
}

impl From<&KeyAccessor> for KeySchema {
    fn from(keys: &KeyAccessor) -> Self {
        Self {
            hash: keys.hash.attribute.clone(),
            range: keys.range.as_ref().map(|range| range.attribute.clone()),
        }
    }
}

impl KeySchema {
    fn attributes(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.hash).chain(self.range.iter())
    }

    fn key(&self, item: &Item) -> Option<Item> {
        self.attributes()
            .map(|attribute| item.get(attribute).map(|value| (attribute.clone(), value.clone())))
            .collect()
    }
}

enum Outcome<T> {
    Applied(T),
    Rejected,
}

struct PageRequest<'a> {
    exclusive_start_key: Option<&'a Item>,
    limit: Option<i32>,
    filter: Option<&'a str>,
    projection: Option<&'a str>,
    aliases: Aliases<'a>,
    index: Option<&'a KeySchema>,
}

struct Page {
    items: Vec<Item>,
    scanned: usize,
    last_evaluated_key: Option<Item>,
}

#[derive(Clone, Debug)]
struct MemoryTable {
    keys: KeySchema,
    indexes: collections::HashMap<String, KeySchema>,
    items: Vec<Item>,
    throughput: i64,
}

impl MemoryTable {
    fn exact_key(&self, key: &Item) -> EvalResult<Item> {
        match self.keys.key(key) {
            Some(exact) if exact.len() == key.len() => Ok(exact),
            _ => Err(format!("key {key:?} does not match the table key schema")),
        }
    }

    fn index(&self, name: &str) -> EvalResult<&KeySchema> {
        self.indexes
            .get(name)
            .ok_or_else(|| format!("index `{name}` does not exist"))
    }

    fn position(&self, key: &Item) -> Option<usize> {
        self.items
            .iter()
            .position(|item| key.iter().all(|(attribute, value)| item.get(attribute) == Some(value)))
    }

    fn get(&self, key: &Item) -> Option<&Item> {
        self.position(key).map(|position| &self.items[position])
    }

    fn put(&mut self, item: Item, condition: Option<&str>, aliases: Aliases<'_>) -> EvalResult<Outcome<Option<Item>>> {
        let key = self
            .keys
            .key(&item)
            .ok_or_else(|| "item is missing its key attributes".to_string())?;
        let position = self.position(&key);
        let empty = Item::new();
        let existing = position.map_or(&empty, |position| &self.items[position]);
        if !eval::matches(existing, condition, aliases)? {
            return Ok(Outcome::Rejected);
        }
        let old = match position {
            Some(position) => Some(std::mem::replace(&mut self.items[position], item)),
            None => {
                self.items.push(item);
                None
            }
        };
        Ok(Outcome::Applied(old))
    }

    fn update(
        &mut self,
        key: &Item,
        expression: &str,
        condition: Option<&str>,
        aliases: Aliases<'_>,
    ) -> EvalResult<Outcome<(Option<Item>, Item)>> {
        let key = self.exact_key(key)?;
        let position = self.position(&key);
        let existing = position.map(|position| self.items[position].clone());
        if !eval::matches(existing.as_ref().unwrap_or(&Item::new()), condition, aliases)? {
            return Ok(Outcome::Rejected);
        }
        let base = existing.clone().unwrap_or_else(|| key.clone());
        let updated = eval::apply_update(&base, expression, aliases)?;
        if self.keys.key(&updated).as_ref() != Some(&key) {
            return Err("an update cannot change key attributes".to_string());
        }
        match position {
            Some(position) => self.items[position] = updated.clone(),
            None => self.items.push(updated.clone()),
        }
        Ok(Outcome::Applied((existing, updated)))
    }

    fn delete(&mut self, key: &Item, condition: Option<&str>, aliases: Aliases<'_>) -> EvalResult<Outcome<Option<Item>>> {
        let key = self.exact_key(key)?;
        let position = self.position(&key);
        let empty = Item::new();
        let existing = position.map_or(&empty, |position| &self.items[position]);
        if !eval::matches(existing, condition, aliases)? {
            return Ok(Outcome::Rejected);
        }
        Ok(Outcome::Applied(position.map(|position| self.items.remove(position))))
    }

    fn check(&self, key: &Item, condition: &str, aliases: Aliases<'_>) -> EvalResult<Outcome<()>> {
        let key = self.exact_key(key)?;
        let empty = Item::new();
        let existing = self.get(&key).unwrap_or(&empty);
        if eval::matches(existing, Some(condition), aliases)? {
            Ok(Outcome::Applied(()))
        } else {
            Ok(Outcome::Rejected)
        }
    }

    fn page(&self, candidates: Vec<&Item>, request: PageRequest<'_>) -> EvalResult<Page> {
        let begin = match request.exclusive_start_key {
            Some(start) => {
                candidates
                    .iter()
                    .position(|item| start.iter().all(|(attribute, value)| item.get(attribute) == Some(value)))
                    .ok_or_else(|| "exclusive start key does not match any item".to_string())?
                    + 1
            }
            None => 0,
        };
        let limit = request
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(0));
        let evaluated: Vec<&Item> = candidates[begin..].iter().take(limit).copied().collect();
        let last_evaluated_key = match evaluated.last() {
            Some(last) if begin + evaluated.len() < candidates.len() => {
                let mut key = self.keys.key(last).unwrap_or_default();
                if let Some(index) = request.index {
                    key.extend(index.key(last).unwrap_or_default());
                }
                Some(key)
            }
            _ => None,
        };
        let filter = request
            .filter
            .map(|filter| eval::parse_condition(filter, request.aliases))
            .transpose()?;
        let mut items = Vec::with_capacity(evaluated.len());
        for item in &evaluated {
            if let Some(filter) = &filter
                && !filter.matches(item)?
            {
                continue;
            }
            items.push(eval::project(item, request.projection, request.aliases)?);
        }
        Ok(Page {
            items,
            scanned: evaluated.len(),
            last_evaluated_key,
        })
    }
}

#[derive(Debug, Default)]
struct State {
    tables: collections::HashMap<String, MemoryTable>,
    calls: Vec<Call>,
    unprocessed_rounds: u32,
}

impl State {
    fn record(&mut self, operation: &'static str, table: impl Into<String>, items: usize) {
        self.calls.push(Call {
            operation,
            table: table.into(),
            items,
        });
    }

    fn table(&self, name: &str, context: &RequestContext) -> Result<&MemoryTable> {
        self.tables.get(name).ok_or_else(|| not_found(name, context))
    }

    fn table_mut(&mut self, name: &str, context: &RequestContext) -> Result<&mut MemoryTable> {
        self.tables.get_mut(name).ok_or_else(|| not_found(name, context))
    }

    fn take_unprocessed_round(&mut self) -> bool {
        if self.unprocessed_rounds == 0 {
            return false;
        }
        self.unprocessed_rounds -= 1;
        true
    }
}

fn not_found(name: &str, context: &RequestContext) -> Error {
    Error::TableNotFound {
        message: format!("ResourceNotFoundException: table `{name}` does not exist"),
        context: Box::new(context.clone()),
    }
}

fn invalid(message: String, context: &RequestContext) -> Error {
    Error::BackendUnavailable {
        message: format!("ValidationException: {message}"),
        context: Box::new(context.clone()),
    }
}

fn conflict(context: &RequestContext) -> Error {
    Error::WriteConflict {
        context: Box::new(context.clone()),
    }
}

fn checked<T>(result: EvalResult<T>, context: &RequestContext) -> Result<T> {
    result.map_err(|message| invalid(message, context))
}

fn capacity(table: &str, units: usize, requested: &Option<ReturnConsumedCapacity>) -> Option<ConsumedCapacity> {
    match requested {
        Some(ReturnConsumedCapacity::Total | ReturnConsumedCapacity::Indexes) => Some(
            ConsumedCapacity::builder()
                .table_name(table)
                .capacity_units(units.max(1) as f64)
                .build(),
        ),
        _ => None,
    }
}

fn returned(values: &Option<ReturnValue>, old: Option<Item>, new: Option<Item>) -> Option<Item> {
    match values {
        Some(ReturnValue::AllOld | ReturnValue::UpdatedOld) => old,
        Some(ReturnValue::AllNew | ReturnValue::UpdatedNew) => new,
        _ => None,
    }
}

fn lookup<'t>(
    tables: &'t mut collections::HashMap<String, MemoryTable>,
    name: &str,
    context: &RequestContext,
) -> Result<&'t mut MemoryTable> {
    tables.get_mut(name).ok_or_else(|| not_found(name, context))
}

fn transact_write(
    tables: &mut collections::HashMap<String, MemoryTable>,
    item: &TransactWriteItem,
    context: &RequestContext,
) -> Result<bool> {
    let outcome = if let Some(put) = &item.put {
        let aliases = Aliases::new(
            put.expression_attribute_names.as_ref(),
            put.expression_attribute_values.as_ref(),
        );
        let outcome =
            lookup(tables, &put.table_name, context)?.put(put.item.clone(), put.condition_expression.as_deref(), aliases);
        checked(outcome, context)?.map()
    } else if let Some(update) = &item.update {
        let aliases = Aliases::new(
            update.expression_attribute_names.as_ref(),
            update.expression_attribute_values.as_ref(),
        );
        let outcome = lookup(tables, &update.table_name, context)?.update(
            &update.key,
            &update.update_expression,
            update.condition_expression.as_deref(),
            aliases,
        );
        checked(outcome, context)?.map()
    } else if let Some(delete) = &item.delete {
        let aliases = Aliases::new(
            delete.expression_attribute_names.as_ref(),
            delete.expression_attribute_values.as_ref(),
        );
        let outcome = lookup(tables, &delete.table_name, context)?.delete(
            &delete.key,
            delete.condition_expression.as_deref(),
            aliases,
        );
        checked(outcome, context)?.map()
    } else if let Some(check) = &item.condition_check {
        let aliases = Aliases::new(
            check.expression_attribute_names.as_ref(),
            check.expression_attribute_values.as_ref(),
        );
        let outcome = lookup(tables, &check.table_name, context)?.check(&check.key, &check.condition_expression, aliases);
        checked(outcome, context)?.map()
    } else {
        return Err(invalid("transaction item has no action".to_string(), context));
    };
    Ok(outcome)
}

impl<T> Outcome<T> {
    fn map(self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// In-process store holding the tables of one registry.
///
/// ```rust
/// use dynamodb_mapper::schema::Registry;
/// use dynamodb_mapper::store::memory::MemoryStore;
///
/// let registry = Registry::from_json(r#"{"tables": [{
///     "name": "players", "root_type": "Player", "hash_key": "id", "version": 1,
///     "types": [{"name": "Player", "fields": [{"name": "id", "element_type": "string"}]}]
/// }]}"#).unwrap();
/// let store = MemoryStore::new(&registry);
/// assert!(store.items("players").is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: sync::Mutex<State>,
}

impl MemoryStore {
    /// Empty tables for every table of the registry, without provisioned throughput.
    pub fn new(registry: &Registry) -> Self {
        Self::with_throughput(registry, 0)
    }

    /// Empty tables reporting `units` of provisioned read and write capacity.
    pub fn with_throughput(registry: &Registry, units: i64) -> Self {
        let tables = registry
            .tables()
            .map(|table| {
                let indexes = table
                    .indexes
                    .iter()
                    .map(|index| (index.name.clone(), KeySchema::from(&index.keys)))
                    .collect();
                let memory_table = MemoryTable {
                    keys: KeySchema::from(&table.keys),
                    indexes,
                    items: Vec::new(),
                    throughput: units,
                };
                (table.name.clone(), memory_table)
            })
            .collect();
        Self {
            state: sync::Mutex::new(State {
                tables,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(sync::PoisonError::into_inner)
    }

    /// Store a raw item, bypassing every condition.
    pub fn insert(&self, table: &str, item: Item) -> Result<()> {
        let context = RequestContext::table(table);
        let mut state = self.lock();
        let outcome = state.table_mut(table, &context)?.put(item, None, Aliases::default());
        checked(outcome, &context).map(|_| ())
    }

    /// The raw item stored under a key.
    pub fn item(&self, table: &str, key: &Item) -> Option<Item> {
        self.lock().tables.get(table)?.get(key).cloned()
    }

    /// Every raw item of a table, in insertion order.
    pub fn items(&self, table: &str) -> Vec<Item> {
        self.lock()
            .tables
            .get(table)
            .map(|table| table.items.clone())
            .unwrap_or_default()
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make the next `rounds` batch calls process only half of each table's requests.
    pub fn fail_unprocessed(&self, rounds: u32) {
        self.lock().unprocessed_rounds = rounds;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput> {
        let context = context(&input.table_name, &input.key, &None, &None, &input.expression_attribute_names, &None);
        let name = input.table_name.clone().unwrap_or_default();
        let mut state = self.lock();
        state.record("GetItem", &name, 1);
        let table = state.table(&name, &context)?;
        let key = checked(table.exact_key(&input.key.clone().unwrap_or_default()), &context)?;
        let aliases = Aliases::new(input.expression_attribute_names.as_ref(), None);
        let item = table
            .get(&key)
            .map(|item| eval::project(item, input.projection_expression.as_deref(), aliases))
            .transpose();
        Ok(GetItemOutput::builder()
            .set_item(checked(item, &context)?)
            .set_consumed_capacity(capacity(&name, 1, &input.return_consumed_capacity))
            .build())
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput> {
        let context = context(
            &input.table_name,
            &None,
            &None,
            &input.condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let name = input.table_name.clone().unwrap_or_default();
        let mut state = self.lock();
        state.record("PutItem", &name, 1);
        let aliases = Aliases::new(
            input.expression_attribute_names.as_ref(),
            input.expression_attribute_values.as_ref(),
        );
        let outcome = state.table_mut(&name, &context)?.put(
            input.item.clone().unwrap_or_default(),
            input.condition_expression.as_deref(),
            aliases,
        );
        match checked(outcome, &context)? {
            Outcome::Applied(old) => Ok(PutItemOutput::builder()
                .set_attributes(returned(&input.return_values, old, None))
                .set_consumed_capacity(capacity(&name, 1, &input.return_consumed_capacity))
                .build()),
            Outcome::Rejected => Err(conflict(&context)),
        }
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput> {
        let context = context(
            &input.table_name,
            &input.key,
            &input.update_expression,
            &input.condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let name = input.table_name.clone().unwrap_or_default();
        let expression = input
            .update_expression
            .as_deref()
            .ok_or_else(|| invalid("update expression is required".to_string(), &context))?;
        let mut state = self.lock();
        state.record("UpdateItem", &name, 1);
        let aliases = Aliases::new(
            input.expression_attribute_names.as_ref(),
            input.expression_attribute_values.as_ref(),
        );
        let outcome = state.table_mut(&name, &context)?.update(
            &input.key.clone().unwrap_or_default(),
            expression,
            input.condition_expression.as_deref(),
            aliases,
        );
        match checked(outcome, &context)? {
            Outcome::Applied((old, new)) => Ok(UpdateItemOutput::builder()
                .set_attributes(returned(&input.return_values, old, Some(new)))
                .set_consumed_capacity(capacity(&name, 1, &input.return_consumed_capacity))
                .build()),
            Outcome::Rejected => Err(conflict(&context)),
        }
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput> {
        let context = context(
            &input.table_name,
            &input.key,
            &None,
            &input.condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let name = input.table_name.clone().unwrap_or_default();
        let mut state = self.lock();
        state.record("DeleteItem", &name, 1);
        let aliases = Aliases::new(
            input.expression_attribute_names.as_ref(),
            input.expression_attribute_values.as_ref(),
        );
        let outcome = state.table_mut(&name, &context)?.delete(
            &input.key.clone().unwrap_or_default(),
            input.condition_expression.as_deref(),
            aliases,
        );
        match checked(outcome, &context)? {
            Outcome::Applied(old) => Ok(DeleteItemOutput::builder()
                .set_attributes(returned(&input.return_values, old, None))
                .set_consumed_capacity(capacity(&name, 1, &input.return_consumed_capacity))
                .build()),
            Outcome::Rejected => Err(conflict(&context)),
        }
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput> {
        let context = context(
            &input.table_name,
            &None,
            &None,
            &input.key_condition_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let name = input.table_name.clone().unwrap_or_default();
        let mut state = self.lock();
        state.record("Query", &name, 0);
        let table = state.table(&name, &context)?;
        let aliases = Aliases::new(
            input.expression_attribute_names.as_ref(),
            input.expression_attribute_values.as_ref(),
        );
        let index = input
            .index_name
            .as_deref()
            .map(|index| checked(table.index(index), &context))
            .transpose()?;
        let keys = index.unwrap_or(&table.keys);
        let key_condition = input
            .key_condition_expression
            .as_deref()
            .ok_or_else(|| invalid("a query needs a key condition".to_string(), &context))?;
        let key_condition = checked(eval::parse_condition(key_condition, aliases), &context)?;
        let mut candidates = Vec::new();
        for item in &table.items {
            if keys.key(item).is_some() && checked(key_condition.matches(item), &context)? {
                candidates.push(item);
            }
        }
        if let Some(range) = &keys.range {
            candidates.sort_by(|left, right| match (left.get(range), right.get(range)) {
                (Some(left), Some(right)) => eval::compare(left, right).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        }
        if input.scan_index_forward == Some(false) {
            candidates.reverse();
        }
        let page = table.page(
            candidates,
            PageRequest {
                exclusive_start_key: input.exclusive_start_key.as_ref(),
                limit: input.limit,
                filter: input.filter_expression.as_deref(),
                projection: input.projection_expression.as_deref(),
                aliases,
                index,
            },
        );
        let page = checked(page, &context)?;
        Ok(QueryOutput::builder()
            .count(page.items.len() as i32)
            .scanned_count(page.scanned as i32)
            .set_items(Some(page.items))
            .set_last_evaluated_key(page.last_evaluated_key)
            .set_consumed_capacity(capacity(&name, page.scanned, &input.return_consumed_capacity))
            .build())
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput> {
        let context = context(
            &input.table_name,
            &None,
            &None,
            &input.filter_expression,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        );
        let name = input.table_name.clone().unwrap_or_default();
        let mut state = self.lock();
        state.record("Scan", &name, 0);
        let table = state.table(&name, &context)?;
        let aliases = Aliases::new(
            input.expression_attribute_names.as_ref(),
            input.expression_attribute_values.as_ref(),
        );
        let index = input
            .index_name
            .as_deref()
            .map(|index| checked(table.index(index), &context))
            .transpose()?;
        let keys = index.unwrap_or(&table.keys);
        let total_segments = input.total_segments.unwrap_or(1).max(1) as usize;
        let segment = input.segment.unwrap_or(0).max(0) as usize;
        let candidates = table
            .items
            .iter()
            .enumerate()
            .filter(|(position, item)| position % total_segments == segment && keys.key(item).is_some())
            .map(|(_, item)| item)
            .collect();
        let page = table.page(
            candidates,
            PageRequest {
                exclusive_start_key: input.exclusive_start_key.as_ref(),
                limit: input.limit,
                filter: input.filter_expression.as_deref(),
                projection: input.projection_expression.as_deref(),
                aliases,
                index,
            },
        );
        let page = checked(page, &context)?;
        Ok(ScanOutput::builder()
            .count(page.items.len() as i32)
            .scanned_count(page.scanned as i32)
            .set_items(Some(page.items))
            .set_last_evaluated_key(page.last_evaluated_key)
            .set_consumed_capacity(capacity(&name, page.scanned, &input.return_consumed_capacity))
            .build())
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput> {
        let request_items = input.request_items.clone().unwrap_or_default();
        let context = tables_context(request_items.keys().map(String::as_str));
        let mut state = self.lock();
        let total = request_items.values().map(|request| request.keys.len()).sum();
        state.record("BatchGetItem", context.table_name.clone(), total);
        let throttled = state.take_unprocessed_round();
        let mut responses = collections::HashMap::new();
        let mut unprocessed = collections::HashMap::new();
        let mut capacities = Vec::new();
        for (name, request) in request_items {
            let table = state.table(&name, &context)?;
            let processed = if throttled {
                request.keys.len() / 2
            } else {
                request.keys.len()
            };
            let aliases = Aliases::new(request.expression_attribute_names.as_ref(), None);
            let mut found = Vec::with_capacity(processed);
            for key in &request.keys[..processed] {
                let key = checked(table.exact_key(key), &context)?;
                if let Some(item) = table.get(&key) {
                    let item = eval::project(item, request.projection_expression.as_deref(), aliases);
                    found.push(checked(item, &context)?);
                }
            }
            capacities.extend(capacity(&name, processed, &input.return_consumed_capacity));
            if processed < request.keys.len() {
                let remaining = KeysAndAttributes::builder()
                    .set_keys(Some(request.keys[processed..].to_vec()))
                    .set_consistent_read(request.consistent_read)
                    .set_expression_attribute_names(request.expression_attribute_names.clone())
                    .set_projection_expression(request.projection_expression.clone())
                    .build()
                    .map_err(|error| Error::build(error, context.clone()))?;
                unprocessed.insert(name.clone(), remaining);
            }
            responses.insert(name, found);
        }
        Ok(BatchGetItemOutput::builder()
            .set_responses(Some(responses))
            .set_unprocessed_keys((!unprocessed.is_empty()).then_some(unprocessed))
            .set_consumed_capacity((!capacities.is_empty()).then_some(capacities))
            .build())
    }

    async fn batch_write_item(&self, input: BatchWriteItemInput) -> Result<BatchWriteItemOutput> {
        let request_items = input.request_items.clone().unwrap_or_default();
        let context = tables_context(request_items.keys().map(String::as_str));
        let mut state = self.lock();
        let total = request_items.values().map(Vec::len).sum();
        state.record("BatchWriteItem", context.table_name.clone(), total);
        let throttled = state.take_unprocessed_round();
        let mut unprocessed = collections::HashMap::new();
        let mut capacities = Vec::new();
        for (name, requests) in request_items {
            let table = state.table_mut(&name, &context)?;
            let processed = if throttled { requests.len() / 2 } else { requests.len() };
            for request in &requests[..processed] {
                let outcome = match (&request.put_request, &request.delete_request) {
                    (Some(put), None) => table.put(put.item.clone(), None, Aliases::default()).map(Outcome::map),
                    (None, Some(delete)) => table.delete(&delete.key, None, Aliases::default()).map(Outcome::map),
                    _ => Err("a write request needs exactly one of put or delete".to_string()),
                };
                checked(outcome, &context)?;
            }
            capacities.extend(capacity(&name, processed, &input.return_consumed_capacity));
            if processed < requests.len() {
                unprocessed.insert(name, requests[processed..].to_vec());
            }
        }
        Ok(BatchWriteItemOutput::builder()
            .set_unprocessed_items((!unprocessed.is_empty()).then_some(unprocessed))
            .set_consumed_capacity((!capacities.is_empty()).then_some(capacities))
            .build())
    }

    async fn transact_get_items(&self, input: TransactGetItemsInput) -> Result<TransactGetItemsOutput> {
        let items = input.transact_items.clone().unwrap_or_default();
        let context = tables_context(
            items
                .iter()
                .filter_map(|item| item.get.as_ref())
                .map(|get| get.table_name.as_str()),
        );
        let mut state = self.lock();
        state.record("TransactGetItems", context.table_name.clone(), items.len());
        let mut responses = Vec::with_capacity(items.len());
        for item in &items {
            let get = item
                .get
                .as_ref()
                .ok_or_else(|| invalid("transaction item has no get".to_string(), &context))?;
            let table = state.table(&get.table_name, &context)?;
            let key = checked(table.exact_key(&get.key), &context)?;
            let aliases = Aliases::new(get.expression_attribute_names.as_ref(), None);
            let found = table
                .get(&key)
                .map(|item| eval::project(item, get.projection_expression.as_deref(), aliases))
                .transpose();
            responses.push(ItemResponse::builder().set_item(checked(found, &context)?).build());
        }
        Ok(TransactGetItemsOutput::builder().set_responses(Some(responses)).build())
    }

    async fn transact_write_items(&self, input: TransactWriteItemsInput) -> Result<TransactWriteItemsOutput> {
        let items = input.transact_items.clone().unwrap_or_default();
        let context = tables_context(items.iter().filter_map(|item| {
            item.put
                .as_ref()
                .map(|put| put.table_name.as_str())
                .or_else(|| item.update.as_ref().map(|update| update.table_name.as_str()))
                .or_else(|| item.delete.as_ref().map(|delete| delete.table_name.as_str()))
                .or_else(|| item.condition_check.as_ref().map(|check| check.table_name.as_str()))
        }));
        let mut state = self.lock();
        state.record("TransactWriteItems", context.table_name.clone(), items.len());
        let mut tables = state.tables.clone();
        let mut reasons = Vec::with_capacity(items.len());
        for item in &items {
            let applied = transact_write(&mut tables, item, &context)?;
            reasons.push(if applied { "None" } else { "ConditionalCheckFailed" }.to_string());
        }
        if reasons.iter().any(|reason| reason != "None") {
            return Err(Error::TransactionCancelled {
                reasons,
                context: Box::new(context),
            });
        }
        state.tables = tables;
        Ok(TransactWriteItemsOutput::builder().build())
    }

    async fn describe_table(&self, input: DescribeTableInput) -> Result<DescribeTableOutput> {
        let name = input.table_name.clone().unwrap_or_default();
        let context = RequestContext::table(&name);
        let mut state = self.lock();
        state.record("DescribeTable", &name, 0);
        let table = state.table(&name, &context)?;
        let throughput = ProvisionedThroughputDescription::builder()
            .read_capacity_units(table.throughput)
            .write_capacity_units(table.throughput)
            .build();
        let indexes = table
            .indexes
            .keys()
            .map(|index| {
                GlobalSecondaryIndexDescription::builder()
                    .index_name(index)
                    .provisioned_throughput(throughput.clone())
                    .build()
            })
            .collect();
        let description = TableDescription::builder()
            .table_name(&name)
            .provisioned_throughput(throughput)
            .set_global_secondary_indexes(Some(indexes))
            .build();
        Ok(DescribeTableOutput::builder().table(description).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
    use rstest::rstest;

    fn registry() -> Registry {
        Registry::from_json(
            r#"{"tables": [{
                "name": "events", "root_type": "Event", "hash_key": "user", "range_key": "seq",
                "version": 1,
                "types": [{"name": "Event", "fields": [
                    {"name": "user", "element_type": "string"},
                    {"name": "seq", "element_type": "long"},
                    {"name": "kind", "element_type": "string"}
                ]}],
                "indexes": [{"name": "by_kind", "hash_key": "kind", "range_key": "seq"}]
            }]}"#,
        )
        .unwrap()
    }

    fn event(user: &str, seq: i64, kind: &str) -> Item {
        Item::from([
            ("user".to_string(), AttributeValue::S(user.to_string())),
            ("seq".to_string(), AttributeValue::N(seq.to_string())),
            ("kind".to_string(), AttributeValue::S(kind.to_string())),
        ])
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new(&registry());
        for (seq, kind) in [(3, "a"), (1, "b"), (2, "a"), (4, "b")] {
            store.insert("events", event("u1", seq, kind)).unwrap();
        }
        store.insert("events", event("u2", 1, "a")).unwrap();
        store
    }

    fn query(index: Option<&str>, hash: (&str, &str), forward: bool, limit: Option<i32>, start: Option<Item>) -> QueryInput {
        QueryInput::builder()
            .table_name("events")
            .set_index_name(index.map(str::to_string))
            .key_condition_expression("#n0 = :v0")
            .expression_attribute_names("#n0", hash.0)
            .expression_attribute_values(":v0", AttributeValue::S(hash.1.to_string()))
            .scan_index_forward(forward)
            .set_limit(limit)
            .set_exclusive_start_key(start)
            .build()
            .unwrap()
    }

    fn sequences(items: &[Item]) -> Vec<String> {
        items
            .iter()
            .map(|item| match &item["seq"] {
                AttributeValue::N(seq) => seq.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[rstest]
    #[case::forward(None, ("user", "u1"), true, vec!["1", "2", "3", "4"])]
    #[case::backward(None, ("user", "u1"), false, vec!["4", "3", "2", "1"])]
    #[case::index(Some("by_kind"), ("kind", "a"), true, vec!["1", "2", "3"])]
    #[tokio::test]
    async fn test_query_orders_by_range_key(
        #[case] index: Option<&str>,
        #[case] hash: (&str, &str),
        #[case] forward: bool,
        #[case] expected: Vec<&str>,
    ) {
        let output = store().query(query(index, hash, forward, None, None)).await.unwrap();
        assert_eq!(sequences(&output.items.unwrap()), expected);
        assert!(output.last_evaluated_key.is_none());
    }

    #[tokio::test]
    async fn test_query_paginates() {
        let store = store();
        let first = store.query(query(None, ("user", "u1"), true, Some(3), None)).await.unwrap();
        assert_eq!(sequences(first.items.as_deref().unwrap()), vec!["1", "2", "3"]);
        let start = first.last_evaluated_key.unwrap();
        let second = store
            .query(query(None, ("user", "u1"), true, Some(3), Some(start)))
            .await
            .unwrap();
        assert_eq!(sequences(&second.items.unwrap()), vec!["4"]);
        assert!(second.last_evaluated_key.is_none());
    }

    #[tokio::test]
    async fn test_failed_condition_is_a_write_conflict() {
        let store = store();
        let input = PutItemInput::builder()
            .table_name("events")
            .set_item(Some(event("u1", 1, "c")))
            .condition_expression("attribute_not_exists(#n0)")
            .expression_attribute_names("#n0", "user")
            .build()
            .unwrap();
        let error = store.put_item(input).await.unwrap_err();
        assert!(error.is_write_conflict());
        let key = Item::from([
            ("user".to_string(), AttributeValue::S("u1".to_string())),
            ("seq".to_string(), AttributeValue::N("1".to_string())),
        ]);
        assert_eq!(store.item("events", &key).unwrap()["kind"], AttributeValue::S("b".to_string()));
    }

    #[tokio::test]
    async fn test_batch_write_leaves_half_unprocessed_when_told() {
        let store = MemoryStore::new(&registry());
        store.fail_unprocessed(1);
        let requests: Vec<_> = (0..4)
            .map(|seq| {
                WriteRequest::builder()
                    .put_request(PutRequest::builder().set_item(Some(event("u", seq, "a"))).build().unwrap())
                    .build()
            })
            .collect();
        let input = BatchWriteItemInput::builder()
            .request_items("events", requests)
            .build()
            .unwrap();
        let output = store.batch_write_item(input).await.unwrap();
        assert_eq!(output.unprocessed_items.unwrap()["events"].len(), 2);
        assert_eq!(store.items("events").len(), 2);
        assert_eq!(
            store.calls(),
            vec![Call {
                operation: "BatchWriteItem",
                table: "events".to_string(),
                items: 4
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let input = GetItemInput::builder()
            .table_name("missing")
            .key("id", AttributeValue::S("a".to_string()))
            .build()
            .unwrap();
        let error = store().get_item(input).await.unwrap_err();
        assert!(matches!(error, Error::TableNotFound { .. }));
    }
}
