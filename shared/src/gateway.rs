//! Store gateway: the request/response seam between the typed layer and a store
//!
//! Requests carry typed expressions; a wire gateway renders them, an in-process
//! gateway evaluates them directly.

use async_trait::async_trait;

use crate::codec::Item;
use crate::errors::StoreError;
use crate::expression::{Condition, KeyCondition, SetFields};
use crate::key::KeySchema;

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub table: String,
    pub key: Item,
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub table: String,
    pub item: Item,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub table: String,
    pub key: Item,
    pub set: SetFields,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub table: String,
    pub key: Item,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct ConditionCheckRequest {
    pub table: String,
    pub key: Item,
    pub condition: Condition,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    /// Needed to render the key condition against attribute names
    pub schema: KeySchema,
    pub condition: KeyCondition,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Item>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Item>,
}

/// One entry of an atomic write
#[derive(Debug, Clone)]
pub enum TransactWriteItem {
    Put(PutRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    ConditionCheck(ConditionCheckRequest),
}

impl TransactWriteItem {
    pub fn table(&self) -> &str {
        match self {
            TransactWriteItem::Put(r) => &r.table,
            TransactWriteItem::Update(r) => &r.table,
            TransactWriteItem::Delete(r) => &r.table,
            TransactWriteItem::ConditionCheck(r) => &r.table,
        }
    }
}

/// An operation request
#[derive(Debug, Clone)]
pub enum Request {
    Get(GetRequest),
    Put(PutRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    Query(QueryRequest),
    Scan(ScanRequest),
    TransactGet(Vec<GetRequest>),
    TransactWrite(Vec<TransactWriteItem>),
}

impl Request {
    /// Operation name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Get(_) => "GetItem",
            Request::Put(_) => "PutItem",
            Request::Update(_) => "UpdateItem",
            Request::Delete(_) => "DeleteItem",
            Request::Query(_) => "Query",
            Request::Scan(_) => "Scan",
            Request::TransactGet(_) => "TransactGetItems",
            Request::TransactWrite(_) => "TransactWriteItems",
        }
    }
}

/// One page of a query or scan
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Present when the store has more items after this page
    pub last_evaluated_key: Option<Item>,
}

/// An operation response
#[derive(Debug, Clone)]
pub enum Response {
    /// Get: the item, if it exists
    Item(Option<Item>),
    /// Put, Delete, TransactWrite
    Written,
    /// Update: the attributes it set, as stored afterwards
    Updated(Item),
    /// Query, Scan
    Page(Page),
    /// TransactGet: one slot per requested key, in request order
    Items(Vec<Option<Item>>),
}

fn unexpected(expected: &str, got: &Response) -> StoreError {
    StoreError::new(
        "UnexpectedResponse",
        format!("expected {} response, got {:?}", expected, got),
    )
}

impl Response {
    pub fn into_item(self) -> Result<Option<Item>, StoreError> {
        match self {
            Response::Item(item) => Ok(item),
            other => Err(unexpected("item", &other)),
        }
    }

    pub fn into_written(self) -> Result<(), StoreError> {
        match self {
            Response::Written => Ok(()),
            other => Err(unexpected("write", &other)),
        }
    }

    pub fn into_updated(self) -> Result<Item, StoreError> {
        match self {
            Response::Updated(item) => Ok(item),
            other => Err(unexpected("update", &other)),
        }
    }

    pub fn into_page(self) -> Result<Page, StoreError> {
        match self {
            Response::Page(page) => Ok(page),
            other => Err(unexpected("page", &other)),
        }
    }

    pub fn into_items(self) -> Result<Vec<Option<Item>>, StoreError> {
        match self {
            Response::Items(items) => Ok(items),
            other => Err(unexpected("items", &other)),
        }
    }
}

/// Something that can execute operation requests against a store.
///
/// Implementations must be safe to call concurrently; they own any connection
/// state and must not retry on behalf of the caller beyond what the underlying
/// client already does.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn submit(&self, request: Request) -> Result<Response, StoreError>;
}
