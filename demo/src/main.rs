//! LikedSongs demo
//!
//! Usage:
//! - `likedsongs run` recreate the table and run the full scenario
//! - `likedsongs scan`
//! - `likedsongs get <artist> <release-date>`
//! - `likedsongs query <artist> <after-date>`
//! - `likedsongs update <artist> <release-date> <attribute> <value>`
//! - `likedsongs delete <artist> <release-date>`
//! - `likedsongs tables`

use futures_util::TryStreamExt;
use likedsongs_core::admin::{self, Throughput};
use likedsongs_core::{
    DynamoGateway, Error, Record, Result, SetFields, Song, StoreConfig, Table, WriteTransaction,
};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: likedsongs [run|scan|get|query|update|delete|tables] [args...]";

/// Result of the full scenario
#[derive(Debug, Serialize)]
struct RunReport {
    fetched: Vec<Option<Song>>,
    remaining: Vec<Song>,
}

fn seed_songs() -> Vec<Song> {
    vec![
        Song::new("RMHighlander", "2021-11-13", "Odyssey", "Indie"),
        Song::new("RMHighlander", "2022-04-28", "Pure Shore", "Travel"),
        Song::new("RMHighlander", "2021-10-30", "Steady Flight", "Electric Blues"),
    ]
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| Error::Validation(format!("missing argument <{}>; {}", name, USAGE)))
}

async fn run_scenario(gateway: &DynamoGateway, table: &Table<Song>) -> Result<()> {
    admin::delete_table(gateway.client(), table.name()).await?;
    admin::create_table(gateway.client(), table.name(), &Song::key_schema(), Throughput::default()).await?;

    for song in seed_songs() {
        table.put(&song).await?;
        info!(artist = %song.artist, release_date = %song.release_date, "stored song");
    }

    let fetched = table
        .transact_get(&[
            Song::key("RMHighlander", "2021-11-13")?,
            Song::key("RMHighlander", "2021-10-30")?,
        ])
        .await?;

    let transaction = WriteTransaction::new()
        .delete(Song::key("RMHighlander", "2022-04-28")?)
        .update(
            Song::key("RMHighlander", "2021-11-13")?,
            SetFields::new().set(Song::GENRE, "Rock"),
        );
    table.transact_write(transaction).await?;

    let remaining: Vec<Song> = table.scan().try_collect().await?;
    print_json(&RunReport { fetched, remaining })
}

async fn execute(command: &str, args: &[String], gateway: &DynamoGateway, table: &Table<Song>) -> Result<()> {
    match command {
        "run" => run_scenario(gateway, table).await,
        "scan" => {
            let songs: Vec<Song> = table.scan().try_collect().await?;
            print_json(&songs)
        }
        "get" => {
            let key = Song::key(arg(args, 0, "artist")?, arg(args, 1, "release-date")?)?;
            print_json(&table.get(&key).await?)
        }
        "query" => {
            let songs: Vec<Song> = table
                .query(arg(args, 0, "artist")?, arg(args, 1, "after-date")?)
                .try_collect()
                .await?;
            print_json(&songs)
        }
        "update" => {
            let key = Song::key(arg(args, 0, "artist")?, arg(args, 1, "release-date")?)?;
            let set = SetFields::new().set(arg(args, 2, "attribute")?, arg(args, 3, "value")?);
            let updated = table.update(&key, set).await?;
            let attributes: Vec<&String> = updated.keys().collect();
            print_json(&attributes)
        }
        "delete" => {
            let key = Song::key(arg(args, 0, "artist")?, arg(args, 1, "release-date")?)?;
            table.delete(&key).await?;
            print_json(&key)
        }
        "tables" => print_json(&admin::list_tables(gateway.client(), Some(5)).await?),
        other => Err(Error::Validation(format!("unknown command `{}`; {}", other, USAGE))),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("run");
    let rest = args.get(1..).unwrap_or_default();

    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let gateway = DynamoGateway::from_config(&config).await;
    let mut table: Table<Song> = Table::new(Arc::new(gateway.clone()), config.table_name.as_str());
    if let Some(timeout) = config.timeout {
        table = table.with_timeout(timeout);
    }

    info!(command, table = table.name(), "starting");
    match execute(command, rest, &gateway, &table).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
