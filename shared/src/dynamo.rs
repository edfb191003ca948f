//! DynamoDB gateway
//!
//! Translates typed requests into SDK calls. Expressions are rendered here and
//! nowhere else; every value goes through a `:vN` placeholder.

use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::transact_get_items::TransactGetItemsError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeValue as SdkAttributeValue, CancellationReason, ConditionCheck, Delete, Get, Put,
    ReturnValue, TransactGetItem, TransactWriteItem as SdkTransactWriteItem, Update,
};
use aws_sdk_dynamodb::Client;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

use crate::codec::{AttributeValue, Item};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::expression::{Condition, Placeholders, SetFields};
use crate::gateway::{
    ConditionCheckRequest, DeleteRequest, GetRequest, Page, PutRequest, QueryRequest, Request,
    Response, ScanRequest, StoreGateway, TransactWriteItem, UpdateRequest,
};

type SdkItem = HashMap<String, SdkAttributeValue>;

/// [`StoreGateway`] backed by the AWS SDK client
#[derive(Debug, Clone)]
pub struct DynamoGateway {
    client: Client,
}

impl DynamoGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the store configuration
    pub async fn from_config(config: &StoreConfig) -> Self {
        let sdk_config = config.load_sdk_config().await;
        Self::new(Client::new(&sdk_config))
    }

    /// The underlying client, for table administration
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn get(&self, r: GetRequest) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(r.table)
            .set_key(Some(item_to_sdk(r.key)))
            .send()
            .await
            .map_err(store_error)?;

        output.item.map(item_from_sdk).transpose()
    }

    async fn put(&self, r: PutRequest) -> Result<(), StoreError> {
        let expr = Rendered::new(None, r.condition.as_ref());
        self.client
            .put_item()
            .table_name(r.table)
            .set_item(Some(item_to_sdk(r.item)))
            .set_condition_expression(expr.condition)
            .set_expression_attribute_names(expr.names)
            .set_expression_attribute_values(expr.values)
            .send()
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn update(&self, r: UpdateRequest) -> Result<Item, StoreError> {
        let expr = Rendered::new(Some(&r.set), r.condition.as_ref());
        let output = self
            .client
            .update_item()
            .table_name(r.table)
            .set_key(Some(item_to_sdk(r.key)))
            .set_update_expression(expr.update)
            .set_condition_expression(expr.condition)
            .set_expression_attribute_names(expr.names)
            .set_expression_attribute_values(expr.values)
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(store_error)?;

        Ok(output
            .attributes
            .map(item_from_sdk)
            .transpose()?
            .unwrap_or_default())
    }

    async fn delete(&self, r: DeleteRequest) -> Result<(), StoreError> {
        let expr = Rendered::new(None, r.condition.as_ref());
        self.client
            .delete_item()
            .table_name(r.table)
            .set_key(Some(item_to_sdk(r.key)))
            .set_condition_expression(expr.condition)
            .set_expression_attribute_names(expr.names)
            .set_expression_attribute_values(expr.values)
            .send()
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn query(&self, r: QueryRequest) -> Result<Page, StoreError> {
        let mut placeholders = Placeholders::new();
        let key_condition = r.condition.render(&r.schema, &mut placeholders);
        let (names, values) = placeholders.into_parts();

        let output = self
            .client
            .query()
            .table_name(r.table)
            .key_condition_expression(key_condition)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values.map(item_to_sdk))
            .set_limit(r.limit.map(limit_to_sdk))
            .set_exclusive_start_key(r.exclusive_start_key.map(item_to_sdk))
            .send()
            .await
            .map_err(store_error)?;

        page_from_sdk(output.items, output.last_evaluated_key)
    }

    async fn scan(&self, r: ScanRequest) -> Result<Page, StoreError> {
        let output = self
            .client
            .scan()
            .table_name(r.table)
            .set_limit(r.limit.map(limit_to_sdk))
            .set_exclusive_start_key(r.exclusive_start_key.map(item_to_sdk))
            .send()
            .await
            .map_err(store_error)?;

        page_from_sdk(output.items, output.last_evaluated_key)
    }

    async fn transact_get(&self, gets: Vec<GetRequest>) -> Result<Vec<Option<Item>>, StoreError> {
        let requested = gets.len();
        let items = gets
            .into_iter()
            .map(|r| -> Result<TransactGetItem, StoreError> {
                let get = Get::builder()
                    .table_name(r.table)
                    .set_key(Some(item_to_sdk(r.key)))
                    .build()
                    .map_err(build_error)?;
                Ok(TransactGetItem::builder().get(get).build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let output = self
            .client
            .transact_get_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| {
                let reasons = match e.as_service_error() {
                    Some(TransactGetItemsError::TransactionCanceledException(c)) => {
                        Some(cancellation_reasons(c.cancellation_reasons()))
                    }
                    _ => None,
                };
                with_reasons(store_error(e), reasons)
            })?;

        let responses = output.responses.unwrap_or_default();
        if responses.len() != requested {
            return Err(StoreError::new(
                "UnexpectedResponse",
                format!("{} responses for {} gets", responses.len(), requested),
            ));
        }

        responses
            .into_iter()
            .map(|response| response.item.map(item_from_sdk).transpose())
            .collect()
    }

    async fn transact_write(&self, writes: Vec<TransactWriteItem>) -> Result<(), StoreError> {
        let items = writes
            .into_iter()
            .map(write_to_sdk)
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| {
                let reasons = match e.as_service_error() {
                    Some(TransactWriteItemsError::TransactionCanceledException(c)) => {
                        Some(cancellation_reasons(c.cancellation_reasons()))
                    }
                    _ => None,
                };
                with_reasons(store_error(e), reasons)
            })?;
        Ok(())
    }
}

#[async_trait]
impl StoreGateway for DynamoGateway {
    async fn submit(&self, request: Request) -> Result<Response, StoreError> {
        match request {
            Request::Get(r) => self.get(r).await.map(Response::Item),
            Request::Put(r) => self.put(r).await.map(|_| Response::Written),
            Request::Update(r) => self.update(r).await.map(Response::Updated),
            Request::Delete(r) => self.delete(r).await.map(|_| Response::Written),
            Request::Query(r) => self.query(r).await.map(Response::Page),
            Request::Scan(r) => self.scan(r).await.map(Response::Page),
            Request::TransactGet(gets) => self.transact_get(gets).await.map(Response::Items),
            Request::TransactWrite(writes) => {
                self.transact_write(writes).await.map(|_| Response::Written)
            }
        }
    }
}

// =========================================================================
// Expressions
// =========================================================================

/// Rendered update/condition expressions of one write, with their bindings
struct Rendered {
    update: Option<String>,
    condition: Option<String>,
    names: Option<HashMap<String, String>>,
    values: Option<SdkItem>,
}

impl Rendered {
    fn new(set: Option<&SetFields>, condition: Option<&Condition>) -> Self {
        let mut placeholders = Placeholders::new();
        let update = set.map(|s| s.render(&mut placeholders));
        let condition = condition.map(|c| c.render(&mut placeholders));
        let (names, values) = placeholders.into_parts();
        Self {
            update,
            condition,
            names,
            values: values.map(item_to_sdk),
        }
    }
}

fn write_to_sdk(write: TransactWriteItem) -> Result<SdkTransactWriteItem, StoreError> {
    let item = match write {
        TransactWriteItem::Put(PutRequest {
            table,
            item,
            condition,
        }) => {
            let expr = Rendered::new(None, condition.as_ref());
            let put = Put::builder()
                .table_name(table)
                .set_item(Some(item_to_sdk(item)))
                .set_condition_expression(expr.condition)
                .set_expression_attribute_names(expr.names)
                .set_expression_attribute_values(expr.values)
                .build()
                .map_err(build_error)?;
            SdkTransactWriteItem::builder().put(put).build()
        }
        TransactWriteItem::Update(UpdateRequest {
            table,
            key,
            set,
            condition,
        }) => {
            let expr = Rendered::new(Some(&set), condition.as_ref());
            let update = Update::builder()
                .table_name(table)
                .set_key(Some(item_to_sdk(key)))
                .set_update_expression(expr.update)
                .set_condition_expression(expr.condition)
                .set_expression_attribute_names(expr.names)
                .set_expression_attribute_values(expr.values)
                .build()
                .map_err(build_error)?;
            SdkTransactWriteItem::builder().update(update).build()
        }
        TransactWriteItem::Delete(DeleteRequest {
            table,
            key,
            condition,
        }) => {
            let expr = Rendered::new(None, condition.as_ref());
            let delete = Delete::builder()
                .table_name(table)
                .set_key(Some(item_to_sdk(key)))
                .set_condition_expression(expr.condition)
                .set_expression_attribute_names(expr.names)
                .set_expression_attribute_values(expr.values)
                .build()
                .map_err(build_error)?;
            SdkTransactWriteItem::builder().delete(delete).build()
        }
        TransactWriteItem::ConditionCheck(ConditionCheckRequest {
            table,
            key,
            condition,
        }) => {
            let expr = Rendered::new(None, Some(&condition));
            let check = ConditionCheck::builder()
                .table_name(table)
                .set_key(Some(item_to_sdk(key)))
                .set_condition_expression(expr.condition)
                .set_expression_attribute_names(expr.names)
                .set_expression_attribute_values(expr.values)
                .build()
                .map_err(build_error)?;
            SdkTransactWriteItem::builder().condition_check(check).build()
        }
    };
    Ok(item)
}

// =========================================================================
// Attribute values
// =========================================================================

/// Convert an SDK value; tags this layer does not know are rejected.
///
/// Outbound values use `serde_dynamo`'s `From` impl. Its reverse impl panics on
/// the SDK's unknown variant, so inbound values are matched here.
pub fn from_sdk(value: SdkAttributeValue) -> Result<AttributeValue, StoreError> {
    let value = match value {
        SdkAttributeValue::S(s) => AttributeValue::S(s),
        SdkAttributeValue::N(n) => AttributeValue::N(n),
        SdkAttributeValue::Bool(b) => AttributeValue::Bool(b),
        SdkAttributeValue::B(b) => AttributeValue::B(b.into_inner()),
        SdkAttributeValue::Null(n) => AttributeValue::Null(n),
        SdkAttributeValue::M(m) => AttributeValue::M(item_from_sdk(m)?),
        SdkAttributeValue::L(l) => {
            AttributeValue::L(l.into_iter().map(from_sdk).collect::<Result<_, _>>()?)
        }
        SdkAttributeValue::Ss(ss) => AttributeValue::Ss(ss),
        SdkAttributeValue::Ns(ns) => AttributeValue::Ns(ns),
        SdkAttributeValue::Bs(bs) => AttributeValue::Bs(bs.into_iter().map(Blob::into_inner).collect()),
        other => {
            return Err(StoreError::new(
                "UnknownAttributeType",
                format!("unsupported attribute value {:?}", other),
            ))
        }
    };
    Ok(value)
}

pub fn item_to_sdk(item: Item) -> SdkItem {
    item.into_iter().map(|(k, v)| (k, SdkAttributeValue::from(v))).collect()
}

pub fn item_from_sdk(item: SdkItem) -> Result<Item, StoreError> {
    item.into_iter()
        .map(|(k, v)| -> Result<(String, AttributeValue), StoreError> { Ok((k, from_sdk(v)?)) })
        .collect()
}

fn page_from_sdk(items: Option<Vec<SdkItem>>, last_evaluated_key: Option<SdkItem>) -> Result<Page, StoreError> {
    Ok(Page {
        items: items
            .unwrap_or_default()
            .into_iter()
            .map(item_from_sdk)
            .collect::<Result<_, _>>()?,
        last_evaluated_key: last_evaluated_key
            .filter(|key| !key.is_empty())
            .map(item_from_sdk)
            .transpose()?,
    })
}

fn limit_to_sdk(limit: u32) -> i32 {
    i32::try_from(limit).unwrap_or(i32::MAX)
}

// =========================================================================
// Errors
// =========================================================================

/// Classify an SDK failure. Service errors keep their code; anything that never
/// got a service answer is a transient transport error.
pub(crate) fn store_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            let message = inner
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            StoreError::new(inner.code().unwrap_or("UnknownServiceError"), message)
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::transport(DisplayErrorContext(&err).to_string())
        }
        _ => StoreError::new("ConstructionFailure", DisplayErrorContext(&err).to_string()),
    }
}

pub(crate) fn build_error(err: aws_sdk_dynamodb::error::BuildError) -> StoreError {
    StoreError::validation(err.to_string())
}

/// Per-entry reason codes; the store reports `None` for entries that were fine
fn cancellation_reasons(reasons: &[CancellationReason]) -> Vec<Option<String>> {
    reasons
        .iter()
        .map(|r| r.code().filter(|code| *code != "None").map(str::to_string))
        .collect()
}

fn with_reasons(error: StoreError, reasons: Option<Vec<Option<String>>>) -> StoreError {
    match reasons {
        Some(reasons) => error.with_cancellation_reasons(reasons),
        None => error,
    }
}
