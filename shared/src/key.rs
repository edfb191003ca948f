//! Composite primary keys
//!
//! Every item is addressed by a partition key and a sort key, both strings.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{get_string, AttributeValue, Item, Record};
use crate::errors::{Error, Result};

/// Attribute names of the two key components of a table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySchema {
    pub partition_key: String,
    pub sort_key: String,
}

impl KeySchema {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }

    /// Build the key payload: exactly the two key attributes
    pub fn build_key(&self, key: &PrimaryKey) -> Item {
        Item::from([
            (
                self.partition_key.clone(),
                AttributeValue::S(key.partition.clone()),
            ),
            (self.sort_key.clone(), AttributeValue::S(key.sort.clone())),
        ])
    }

    /// Extract the primary key of a full item or a key payload
    pub fn key_of(&self, item: &Item) -> Result<PrimaryKey> {
        let partition = get_string(item, &self.partition_key).ok_or_else(|| {
            Error::InvalidKey(format!("missing string attribute `{}`", self.partition_key))
        })?;
        let sort = get_string(item, &self.sort_key).ok_or_else(|| {
            Error::InvalidKey(format!("missing string attribute `{}`", self.sort_key))
        })?;
        PrimaryKey::new(partition, sort)
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.partition_key || name == self.sort_key
    }
}

/// A validated (partition, sort) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey {
    partition: String,
    sort: String,
}

impl PrimaryKey {
    /// Both components must be non-empty
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Result<Self> {
        let partition = partition.into();
        let sort = sort.into();

        if partition.is_empty() {
            return Err(Error::InvalidKey("partition key is empty".to_string()));
        }
        if sort.is_empty() {
            return Err(Error::InvalidKey("sort key is empty".to_string()));
        }

        Ok(Self { partition, sort })
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn sort(&self) -> &str {
        &self.sort
    }

    /// Key payload for a record type's table
    pub fn to_item<R: Record>(&self) -> Item {
        R::key_schema().build_key(self)
    }

    /// Key of a stored item of a record type's table
    pub fn from_item<R: Record>(item: &Item) -> Result<Self> {
        R::key_schema().key_of(item)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.partition, self.sort)
    }
}

/// Build the key payload for `R` from raw partition and sort values
pub fn build_key<R: Record>(partition: &str, sort: &str) -> Result<Item> {
    Ok(PrimaryKey::new(partition, sort)?.to_item::<R>())
}
