//! Table administration: create, delete, list

use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, KeyType, ProvisionedThroughput, ScalarAttributeType,
    TableStatus,
};
use aws_sdk_dynamodb::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::dynamo::{build_error, store_error};
use crate::errors::{Error, Result, StoreError};
use crate::key::KeySchema;

const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const ACTIVE_POLL_ATTEMPTS: u32 = 60;

/// Provisioned capacity units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    pub read: i64,
    pub write: i64,
}

impl Default for Throughput {
    fn default() -> Self {
        Self { read: 5, write: 5 }
    }
}

/// Create a table keyed by two string attributes and wait until it is active
pub async fn create_table(client: &Client, name: &str, schema: &KeySchema, throughput: Throughput) -> Result<()> {
    let definition = |attribute: &str| {
        AttributeDefinition::builder()
            .attribute_name(attribute)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(build_error)
    };
    let element = |attribute: &str, key_type: KeyType| {
        KeySchemaElement::builder()
            .attribute_name(attribute)
            .key_type(key_type)
            .build()
            .map_err(build_error)
    };

    let capacity = ProvisionedThroughput::builder()
        .read_capacity_units(throughput.read)
        .write_capacity_units(throughput.write)
        .build()
        .map_err(build_error)?;

    client
        .create_table()
        .table_name(name)
        .attribute_definitions(definition(&schema.partition_key)?)
        .attribute_definitions(definition(&schema.sort_key)?)
        .key_schema(element(&schema.partition_key, KeyType::Hash)?)
        .key_schema(element(&schema.sort_key, KeyType::Range)?)
        .provisioned_throughput(capacity)
        .send()
        .await
        .map_err(store_error)?;

    info!(table = name, "created table");
    wait_until_active(client, name).await
}

async fn wait_until_active(client: &Client, name: &str) -> Result<()> {
    for _ in 0..ACTIVE_POLL_ATTEMPTS {
        let output = client
            .describe_table()
            .table_name(name)
            .send()
            .await
            .map_err(store_error)?;

        let status = output.table().and_then(|t| t.table_status());
        if status == Some(&TableStatus::Active) {
            return Ok(());
        }
        debug!(table = name, status = ?status, "waiting for table");
        tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
    }

    Err(Error::Store(StoreError::new(
        "TableNotActive",
        format!("table {} did not become active", name),
    )))
}

/// Delete a table. Returns false if it did not exist.
pub async fn delete_table(client: &Client, name: &str) -> Result<bool> {
    match client.delete_table().table_name(name).send().await {
        Ok(_) => {
            info!(table = name, "deleted table");
            Ok(true)
        }
        Err(e) if e.as_service_error().is_some_and(|se| se.is_resource_not_found_exception()) => {
            debug!(table = name, "table already absent");
            Ok(false)
        }
        Err(e) => Err(store_error(e).into()),
    }
}

/// Table names in the account and region, at most `limit` of them
pub async fn list_tables(client: &Client, limit: Option<i32>) -> Result<Vec<String>> {
    let output = client
        .list_tables()
        .set_limit(limit)
        .send()
        .await
        .map_err(store_error)?;

    Ok(output.table_names.unwrap_or_default())
}

pub async fn table_exists(client: &Client, name: &str) -> Result<bool> {
    match client.describe_table().table_name(name).send().await {
        Ok(_) => Ok(true),
        Err(e) if e.as_service_error().is_some_and(|se| se.is_resource_not_found_exception()) => Ok(false),
        Err(e) => Err(store_error(e).into()),
    }
}
