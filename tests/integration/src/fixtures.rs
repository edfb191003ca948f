//! Test fixtures and utilities

use likedsongs_core::admin::{self, Throughput};
use likedsongs_core::{DynamoGateway, Record, Song, StoreConfig, Table};
use std::sync::Arc;
use uuid::Uuid;

const ENDPOINT_ENV: &str = "LIKEDSONGS_ENDPOINT";

/// Generate a unique table name for testing
pub fn unique_table() -> String {
    format!("LikedSongs-test-{}", &Uuid::new_v4().to_string()[..8])
}

/// Generate a unique artist (partition) for testing
pub fn unique_artist() -> String {
    format!("artist-{}", &Uuid::new_v4().to_string()[..8])
}

/// Check if a store endpoint is configured
pub fn endpoint_configured() -> bool {
    dotenvy::dotenv().ok();
    std::env::var(ENDPOINT_ENV).is_ok_and(|v| !v.is_empty())
}

/// Skip test if no store endpoint is configured
#[macro_export]
macro_rules! skip_if_no_endpoint {
    () => {
        if !$crate::fixtures::endpoint_configured() {
            eprintln!("Skipping test: LIKEDSONGS_ENDPOINT not set");
            return;
        }
    };
}

/// A freshly created table, deleted again when dropped.
///
/// The delete runs on drop so a test that panics mid-way still removes its table.
pub struct TestTable {
    pub gateway: DynamoGateway,
    pub table: Table<Song>,
}

impl TestTable {
    pub async fn create() -> Self {
        let config = StoreConfig::from_env().expect("invalid test configuration");
        let gateway = DynamoGateway::from_config(&config).await;
        let name = unique_table();

        admin::create_table(gateway.client(), &name, &Song::key_schema(), Throughput::default())
            .await
            .expect("Failed to create table");

        let table = Table::new(Arc::new(gateway.clone()), name);
        Self { gateway, table }
    }
}

impl Drop for TestTable {
    fn drop(&mut self) {
        let name = self.table.name().to_string();
        // The test's runtime may be unwinding; delete on a fresh one with its own client
        let cleanup = std::thread::spawn(move || {
            let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
                return;
            };
            runtime.block_on(async move {
                let Ok(config) = StoreConfig::from_env() else {
                    return;
                };
                let gateway = DynamoGateway::from_config(&config).await;
                if let Err(e) = admin::delete_table(gateway.client(), &name).await {
                    eprintln!("Failed to delete test table {}: {}", name, e);
                }
            });
        });
        let _ = cleanup.join();
    }
}

/// Three songs by `artist` released on 2021-10-30, 2021-11-13 and 2022-04-28
pub fn songs(artist: &str) -> Vec<Song> {
    vec![
        Song::new(artist, "2021-11-13", "Odyssey", "Indie"),
        Song::new(artist, "2022-04-28", "Pure Shore", "Travel"),
        Song::new(artist, "2021-10-30", "Steady Flight", "Electric Blues"),
    ]
}
