//! LikedSongs Core Library
//!
//! Typed access layer over a partition/sort keyed document store:
//! - Attribute codec and record trait
//! - Primary key builder
//! - Single-item operations, queries and scans
//! - Atomic multi-item transactions
//! - DynamoDB and in-memory gateways

pub mod admin;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod dynamo;
pub mod errors;
pub mod expression;
pub mod gateway;
pub mod key;
pub mod memory;
pub mod models;
pub mod table;
pub mod transaction;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use codec::{AttributeValue, Item, Record};
pub use config::StoreConfig;
pub use dynamo::DynamoGateway;
pub use errors::{Error, Result, StoreError};
pub use expression::{Condition, KeyCondition, SetFields, SortCondition};
pub use gateway::StoreGateway;
pub use key::{build_key, KeySchema, PrimaryKey};
pub use memory::MemoryGateway;
pub use models::Song;
pub use table::{PageOptions, ResultPage, Table};
pub use transaction::{WriteTransaction, MAX_TRANSACTION_ITEMS};
