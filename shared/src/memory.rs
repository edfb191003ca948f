//! In-process store gateway
//!
//! Keeps tables in memory behind a single `RwLock`, so every request (and every
//! transaction as a whole) is applied in isolation. Used by the test suite and for
//! running the access layer without a store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::codec::Item;
use crate::errors::StoreError;
use crate::expression::Condition;
use crate::gateway::{
    DeleteRequest, GetRequest, Page, PutRequest, QueryRequest, Request, Response, ScanRequest,
    StoreGateway, TransactWriteItem, UpdateRequest,
};
use crate::key::{KeySchema, PrimaryKey};

/// Entry ceiling the store applies to transactions on its own
const STORE_TRANSACTION_LIMIT: usize = 100;

/// Items per query/scan page when the request sets no smaller limit
const DEFAULT_PAGE_SIZE: usize = 100;

struct MemoryTable {
    schema: KeySchema,
    items: BTreeMap<PrimaryKey, Item>,
}

impl MemoryTable {
    /// Key of a key payload: exactly the two key attributes
    fn key(&self, key: &Item) -> Result<PrimaryKey, StoreError> {
        if key.len() != 2 {
            return Err(StoreError::validation(
                "The provided key element does not match the schema",
            ));
        }
        self.item_key(key)
    }

    /// Key of a full item
    fn item_key(&self, item: &Item) -> Result<PrimaryKey, StoreError> {
        self.schema
            .key_of(item)
            .map_err(|e| StoreError::validation(e.to_string()))
    }

    fn holds(&self, key: &PrimaryKey, condition: Option<&Condition>) -> bool {
        condition.map_or(true, |c| c.evaluate(self.items.get(key)))
    }

    fn put(&mut self, request: PutRequest) -> Result<(), StoreError> {
        let key = self.item_key(&request.item)?;
        if !self.holds(&key, request.condition.as_ref()) {
            return Err(StoreError::condition_failed());
        }
        self.items.insert(key, request.item);
        Ok(())
    }

    fn check_update(&self, request: &UpdateRequest) -> Result<PrimaryKey, StoreError> {
        let key = self.key(&request.key)?;
        if let Some((field, _)) = request
            .set
            .iter()
            .find(|(field, _)| self.schema.is_key_attribute(field))
        {
            return Err(StoreError::validation(format!(
                "Cannot update attribute {}. This attribute is part of the key",
                field
            )));
        }
        Ok(key)
    }

    fn update(&mut self, request: UpdateRequest) -> Result<Item, StoreError> {
        let key = self.check_update(&request)?;
        if !self.holds(&key, request.condition.as_ref()) {
            return Err(StoreError::condition_failed());
        }
        let item = self.items.entry(key).or_insert(request.key);
        Ok(request.set.apply(item))
    }

    fn delete(&mut self, request: DeleteRequest) -> Result<(), StoreError> {
        let key = self.key(&request.key)?;
        if !self.holds(&key, request.condition.as_ref()) {
            return Err(StoreError::condition_failed());
        }
        self.items.remove(&key);
        Ok(())
    }

    fn page<'a>(
        &'a self,
        matching: impl Iterator<Item = (&'a PrimaryKey, &'a Item)>,
        exclusive_start_key: Option<&Item>,
        limit: usize,
    ) -> Result<Page, StoreError> {
        let start = exclusive_start_key.map(|k| self.key(k)).transpose()?;
        let mut remaining = matching
            .filter(|(key, _)| start.as_ref().map_or(true, |s| *key > s))
            .peekable();

        let mut page = Page::default();
        let mut last = None;
        for (key, item) in remaining.by_ref().take(limit) {
            page.items.push(item.clone());
            last = Some(key);
        }
        if remaining.peek().is_some() {
            page.last_evaluated_key = last.map(|k| self.schema.build_key(k));
        }
        Ok(page)
    }
}

/// An in-memory [`StoreGateway`]
pub struct MemoryGateway {
    tables: RwLock<HashMap<String, MemoryTable>>,
    page_size: usize,
    submissions: AtomicUsize,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            submissions: AtomicUsize::new(0),
        }
    }

    /// Cap every query/scan page at `page_size` items
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create an empty table; returns false if it already exists
    pub async fn create_table(&self, name: &str, schema: KeySchema) -> bool {
        let mut tables = self.tables.write().await;
        if tables.contains_key(name) {
            return false;
        }
        tables.insert(
            name.to_string(),
            MemoryTable {
                schema,
                items: BTreeMap::new(),
            },
        );
        true
    }

    pub async fn item_count(&self, name: &str) -> Option<usize> {
        self.tables.read().await.get(name).map(|t| t.items.len())
    }

    /// Number of requests that reached this gateway
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn page_limit(&self, limit: Option<u32>) -> Result<usize, StoreError> {
        match limit {
            Some(0) => Err(StoreError::validation("Limit must be greater than or equal to 1")),
            Some(limit) => Ok((limit as usize).min(self.page_size)),
            None => Ok(self.page_size),
        }
    }

    fn get(tables: &HashMap<String, MemoryTable>, request: &GetRequest) -> Result<Option<Item>, StoreError> {
        let table = lookup(tables, &request.table)?;
        let key = table.key(&request.key)?;
        Ok(table.items.get(&key).cloned())
    }

    fn query(&self, tables: &HashMap<String, MemoryTable>, request: QueryRequest) -> Result<Page, StoreError> {
        let table = lookup(tables, &request.table)?;
        let limit = self.page_limit(request.limit)?;
        let matching = table
            .items
            .iter()
            .filter(|(key, _)| request.condition.matches(key));
        table.page(matching, request.exclusive_start_key.as_ref(), limit)
    }

    fn scan(&self, tables: &HashMap<String, MemoryTable>, request: ScanRequest) -> Result<Page, StoreError> {
        let table = lookup(tables, &request.table)?;
        let limit = self.page_limit(request.limit)?;
        table.page(table.items.iter(), request.exclusive_start_key.as_ref(), limit)
    }

    fn transact_get(
        tables: &HashMap<String, MemoryTable>,
        gets: Vec<GetRequest>,
    ) -> Result<Vec<Option<Item>>, StoreError> {
        check_transaction_size(gets.len())?;

        let mut seen = HashSet::new();
        for get in &gets {
            let key = lookup(tables, &get.table)?.key(&get.key)?;
            if !seen.insert((get.table.clone(), key)) {
                return Err(multiple_operations_on_one_item());
            }
        }

        gets.iter().map(|get| Self::get(tables, get)).collect()
    }

    fn transact_write(
        tables: &mut HashMap<String, MemoryTable>,
        writes: Vec<TransactWriteItem>,
    ) -> Result<(), StoreError> {
        check_transaction_size(writes.len())?;

        // Validate everything and evaluate every condition before touching any item
        let mut seen = HashSet::new();
        let mut reasons = Vec::with_capacity(writes.len());
        for write in &writes {
            let table = lookup(tables, write.table())?;
            let (key, condition) = match write {
                TransactWriteItem::Put(r) => (table.item_key(&r.item)?, r.condition.as_ref()),
                TransactWriteItem::Update(r) => (table.check_update(r)?, r.condition.as_ref()),
                TransactWriteItem::Delete(r) => (table.key(&r.key)?, r.condition.as_ref()),
                TransactWriteItem::ConditionCheck(r) => (table.key(&r.key)?, Some(&r.condition)),
            };
            if !seen.insert((write.table().to_string(), key.clone())) {
                return Err(multiple_operations_on_one_item());
            }
            let reason = (!table.holds(&key, condition)).then(|| "ConditionalCheckFailed".to_string());
            reasons.push(reason);
        }

        if reasons.iter().any(Option::is_some) {
            return Err(StoreError::transaction_canceled(reasons));
        }

        for write in writes {
            let table = lookup_mut(tables, write.table())?;
            match write {
                TransactWriteItem::Put(mut r) => {
                    r.condition = None;
                    table.put(r)?;
                }
                TransactWriteItem::Update(mut r) => {
                    r.condition = None;
                    table.update(r)?;
                }
                TransactWriteItem::Delete(mut r) => {
                    r.condition = None;
                    table.delete(r)?;
                }
                TransactWriteItem::ConditionCheck(_) => {}
            }
        }
        Ok(())
    }
}

fn lookup<'a>(tables: &'a HashMap<String, MemoryTable>, name: &str) -> Result<&'a MemoryTable, StoreError> {
    tables.get(name).ok_or_else(|| StoreError::table_not_found(name))
}

fn lookup_mut<'a>(
    tables: &'a mut HashMap<String, MemoryTable>,
    name: &str,
) -> Result<&'a mut MemoryTable, StoreError> {
    tables.get_mut(name).ok_or_else(|| StoreError::table_not_found(name))
}

fn check_transaction_size(len: usize) -> Result<(), StoreError> {
    if len == 0 || len > STORE_TRANSACTION_LIMIT {
        return Err(StoreError::validation(format!(
            "Member must have length less than or equal to {} and greater than or equal to 1",
            STORE_TRANSACTION_LIMIT
        )));
    }
    Ok(())
}

fn multiple_operations_on_one_item() -> StoreError {
    StoreError::validation("Transaction request cannot include multiple operations on one item")
}

#[async_trait]
impl StoreGateway for MemoryGateway {
    async fn submit(&self, request: Request) -> Result<Response, StoreError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        debug!(operation = request.kind(), "memory gateway request");

        match request {
            Request::Get(r) => {
                let tables = self.tables.read().await;
                Self::get(&tables, &r).map(Response::Item)
            }
            Request::Put(r) => {
                let mut tables = self.tables.write().await;
                lookup_mut(&mut tables, &r.table)?.put(r)?;
                Ok(Response::Written)
            }
            Request::Update(r) => {
                let mut tables = self.tables.write().await;
                lookup_mut(&mut tables, &r.table)?
                    .update(r)
                    .map(Response::Updated)
            }
            Request::Delete(r) => {
                let mut tables = self.tables.write().await;
                lookup_mut(&mut tables, &r.table)?.delete(r)?;
                Ok(Response::Written)
            }
            Request::Query(r) => {
                let tables = self.tables.read().await;
                self.query(&tables, r).map(Response::Page)
            }
            Request::Scan(r) => {
                let tables = self.tables.read().await;
                self.scan(&tables, r).map(Response::Page)
            }
            Request::TransactGet(gets) => {
                let tables = self.tables.read().await;
                Self::transact_get(&tables, gets).map(Response::Items)
            }
            Request::TransactWrite(writes) => {
                let mut tables = self.tables.write().await;
                Self::transact_write(&mut tables, writes)?;
                Ok(Response::Written)
            }
        }
    }
}
