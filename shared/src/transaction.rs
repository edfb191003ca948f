//! Atomic multi-item reads and writes
//!
//! A transaction is checked locally (size, distinct keys, valid keys and update
//! expressions) before it is handed to the gateway as a single request. The store
//! either applies every entry or none.

use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::codec::{decode, encode, Record};
use crate::errors::{Error, Result, StoreError};
use crate::expression::{Condition, SetFields};
use crate::gateway::{
    ConditionCheckRequest, DeleteRequest, GetRequest, PutRequest, Request, TransactWriteItem,
    UpdateRequest,
};
use crate::key::PrimaryKey;
use crate::table::Table;

/// Most entries one transaction may carry
pub const MAX_TRANSACTION_ITEMS: usize = 25;

/// One entry of a [`WriteTransaction`]
#[derive(Debug, Clone)]
pub enum WriteEntry<R> {
    Put {
        record: R,
        condition: Option<Condition>,
    },
    Update {
        key: PrimaryKey,
        set: SetFields,
        condition: Option<Condition>,
    },
    Delete {
        key: PrimaryKey,
        condition: Option<Condition>,
    },
    /// Fails the whole transaction unless `condition` holds; writes nothing
    ConditionCheck { key: PrimaryKey, condition: Condition },
}

/// Ordered list of writes applied all-or-nothing
#[derive(Debug, Clone)]
pub struct WriteTransaction<R> {
    entries: Vec<WriteEntry<R>>,
}

impl<R> Default for WriteTransaction<R> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<R: Record> WriteTransaction<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(self, record: R) -> Self {
        self.push(WriteEntry::Put {
            record,
            condition: None,
        })
    }

    pub fn put_if(self, record: R, condition: Condition) -> Self {
        self.push(WriteEntry::Put {
            record,
            condition: Some(condition),
        })
    }

    pub fn update(self, key: PrimaryKey, set: SetFields) -> Self {
        self.push(WriteEntry::Update {
            key,
            set,
            condition: None,
        })
    }

    pub fn update_if(self, key: PrimaryKey, set: SetFields, condition: Condition) -> Self {
        self.push(WriteEntry::Update {
            key,
            set,
            condition: Some(condition),
        })
    }

    pub fn delete(self, key: PrimaryKey) -> Self {
        self.push(WriteEntry::Delete {
            key,
            condition: None,
        })
    }

    pub fn delete_if(self, key: PrimaryKey, condition: Condition) -> Self {
        self.push(WriteEntry::Delete {
            key,
            condition: Some(condition),
        })
    }

    pub fn check(self, key: PrimaryKey, condition: Condition) -> Self {
        self.push(WriteEntry::ConditionCheck { key, condition })
    }

    pub fn push(mut self, entry: WriteEntry<R>) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[WriteEntry<R>] {
        &self.entries
    }

    /// Validate every entry and build the wire entries, in order
    fn into_items(self, table: &str) -> Result<Vec<TransactWriteItem>> {
        check_size(self.entries.len())?;
        let schema = R::key_schema();
        let mut keys = Vec::with_capacity(self.entries.len());
        let mut items = Vec::with_capacity(self.entries.len());

        for entry in self.entries {
            let item = match entry {
                WriteEntry::Put { record, condition } => {
                    keys.push(record.primary_key()?);
                    TransactWriteItem::Put(PutRequest {
                        table: table.to_string(),
                        item: encode(&record)?,
                        condition,
                    })
                }
                WriteEntry::Update { key, set, condition } => {
                    set.validate(&schema, R::FIELDS)?;
                    let item = TransactWriteItem::Update(UpdateRequest {
                        table: table.to_string(),
                        key: schema.build_key(&key),
                        set,
                        condition,
                    });
                    keys.push(key);
                    item
                }
                WriteEntry::Delete { key, condition } => {
                    let item = TransactWriteItem::Delete(DeleteRequest {
                        table: table.to_string(),
                        key: schema.build_key(&key),
                        condition,
                    });
                    keys.push(key);
                    item
                }
                WriteEntry::ConditionCheck { key, condition } => {
                    let item = TransactWriteItem::ConditionCheck(ConditionCheckRequest {
                        table: table.to_string(),
                        key: schema.build_key(&key),
                        condition,
                    });
                    keys.push(key);
                    item
                }
            };
            items.push(item);
        }

        check_distinct(&keys)?;
        Ok(items)
    }
}

/// Lifecycle of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Built,
    Submitted,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Built => "built",
            TransactionState::Submitted => "submitted",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

fn check_size(len: usize) -> Result<()> {
    if len == 0 || len > MAX_TRANSACTION_ITEMS {
        return Err(Error::BatchSize {
            len,
            max: MAX_TRANSACTION_ITEMS,
        });
    }
    Ok(())
}

fn check_distinct(keys: &[PrimaryKey]) -> Result<()> {
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key) {
            return Err(Error::ConflictingKeys {
                partition: key.partition().to_string(),
                sort: key.sort().to_string(),
            });
        }
    }
    Ok(())
}

impl<R: Record> Table<R> {
    /// Read several items as one consistent snapshot.
    ///
    /// Slot `i` of the result belongs to `keys[i]`; missing items are `None`.
    pub async fn transact_get(&self, keys: &[PrimaryKey]) -> Result<Vec<Option<R>>> {
        let entries = keys.len();
        let outcome = self.transact_get_inner(keys).await;
        match &outcome {
            Ok(records) => debug!(
                table = self.name(),
                entries,
                found = records.iter().filter(|r| r.is_some()).count(),
                "transact get"
            ),
            Err(e) => warn!(table = self.name(), entries, reason = %e, "transact get failed"),
        }
        outcome
    }

    async fn transact_get_inner(&self, keys: &[PrimaryKey]) -> Result<Vec<Option<R>>> {
        check_size(keys.len())?;
        check_distinct(keys)?;

        let gets = keys
            .iter()
            .map(|key| GetRequest {
                table: self.name().to_string(),
                key: key.to_item::<R>(),
            })
            .collect();

        let items = self.dispatch(Request::TransactGet(gets)).await?.into_items()?;
        if items.len() != keys.len() {
            return Err(Error::Store(StoreError::new(
                "UnexpectedResponse",
                format!("transact get returned {} slots for {} keys", items.len(), keys.len()),
            )));
        }

        let records = items
            .into_iter()
            .map(|item| item.map(decode::<R>).transpose())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Apply every entry of `transaction` atomically
    pub async fn transact_write(&self, transaction: WriteTransaction<R>) -> Result<()> {
        let entries = transaction.len();
        let items = match transaction.into_items(self.name()) {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    table = self.name(),
                    entries,
                    state = %TransactionState::Aborted,
                    reason = %e,
                    submitted = false,
                    "transaction"
                );
                return Err(e);
            }
        };
        debug!(table = self.name(), entries, state = %TransactionState::Built, "transaction");

        debug!(table = self.name(), entries, state = %TransactionState::Submitted, "transaction");
        match self.dispatch(Request::TransactWrite(items)).await {
            Ok(response) => {
                response.into_written()?;
                info!(table = self.name(), entries, state = %TransactionState::Committed, "transaction");
                Ok(())
            }
            Err(e) => {
                warn!(
                    table = self.name(),
                    entries,
                    state = %TransactionState::Aborted,
                    reason = %e,
                    submitted = true,
                    "transaction"
                );
                Err(e)
            }
        }
    }
}
