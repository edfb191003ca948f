//! Integration tests for the LikedSongs access layer
//!
//! Run with: LIKEDSONGS_ENDPOINT=http://localhost:4566 LIKEDSONGS_STATIC_CREDENTIALS=test:test cargo test
//!
//! Each test creates its own table; dropping the fixture deletes it, even after a failed assertion.

use futures_util::TryStreamExt;
use likedsongs_core::admin;
use likedsongs_core::codec::encode;
use likedsongs_core::gateway::{GetRequest, Request};
use likedsongs_core::{
    Condition, Error, KeyCondition, PageOptions, SetFields, Song, SortCondition, StoreGateway,
    WriteTransaction,
};
use likedsongs_integration_tests::{
    fixtures::{songs, unique_artist, unique_table, TestTable},
    skip_if_no_endpoint,
};
use pretty_assertions::assert_eq;

async fn seeded() -> (TestTable, String) {
    let test = TestTable::create().await;
    let artist = unique_artist();
    for song in songs(&artist) {
        test.table.put(&song).await.expect("Failed to put song");
    }
    (test, artist)
}

// ============================================================================
// Single-item Tests
// ============================================================================

#[tokio::test]
async fn test_put_get_round_trip() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let key = Song::key(&artist, "2021-11-13").unwrap();
    let song = test.table.get(&key).await.expect("Failed to get song");

    assert_eq!(song, Some(Song::new(&artist, "2021-11-13", "Odyssey", "Indie")));
}

#[tokio::test]
async fn test_get_missing() {
    skip_if_no_endpoint!();
    let test = TestTable::create().await;

    let key = Song::key(&unique_artist(), "1999-01-01").unwrap();
    assert_eq!(test.table.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_put_overwrites_without_merge() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let key = Song::key(&artist, "2021-11-13").unwrap();
    test.table.update(&key, SetFields::new().set("Mood", "calm")).await.unwrap();

    let replacement = Song::new(&artist, "2021-11-13", "Odyssey II", "Rock");
    test.table.put(&replacement).await.unwrap();

    let raw = test
        .gateway
        .submit(Request::Get(GetRequest {
            table: test.table.name().to_string(),
            key: key.to_item::<Song>(),
        }))
        .await
        .unwrap()
        .into_item()
        .unwrap();
    assert_eq!(raw, Some(encode(&replacement).unwrap()));
    assert_eq!(test.table.get(&key).await.unwrap(), Some(replacement));
}

#[tokio::test]
async fn test_conditional_put() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let duplicate = Song::new(&artist, "2021-11-13", "Odyssey", "Indie");
    let err = test
        .table
        .put_if(&duplicate, Condition::not_exists(Song::ARTIST))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConditionFailure { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_update_and_delete() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;
    let key = Song::key(&artist, "2021-11-13").unwrap();

    let updated = test
        .table
        .update(&key, SetFields::new().set(Song::GENRE, "Rock").set("Year", 2021i64))
        .await
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert_eq!(test.table.get(&key).await.unwrap().unwrap().genre, "Rock");

    test.table.delete(&key).await.unwrap();
    test.table.delete(&key).await.unwrap();
    assert_eq!(test.table.get(&key).await.unwrap(), None);
}

// ============================================================================
// Query and Scan Tests
// ============================================================================

#[tokio::test]
async fn test_query_ordering() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let all: Vec<Song> = test.table.query(&artist, "2021-01-01").try_collect().await.unwrap();
    let dates: Vec<&str> = all.iter().map(|s| s.release_date.as_str()).collect();
    assert_eq!(dates, vec!["2021-10-30", "2021-11-13", "2022-04-28"]);

    let later: Vec<Song> = test.table.query(&artist, "2021-11-13").try_collect().await.unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].release_date, "2022-04-28");
}

#[tokio::test]
async fn test_query_range_and_pages() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let prefix = KeyCondition::partition(&artist).with_sort(SortCondition::BeginsWith("2021".into()));
    let songs: Vec<Song> = test.table.query_range(prefix).try_collect().await.unwrap();
    assert_eq!(songs.len(), 2);

    let first = test
        .table
        .query_page(
            KeyCondition::partition(&artist),
            PageOptions { limit: Some(2), cursor: None },
        )
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);

    let second = test
        .table
        .query_page(
            KeyCondition::partition(&artist),
            PageOptions { limit: Some(2), cursor: first.cursor },
        )
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].release_date, "2022-04-28");
}

#[tokio::test]
async fn test_scan() {
    skip_if_no_endpoint!();
    let (test, _) = seeded().await;

    let songs: Vec<Song> = test.table.scan().try_collect().await.unwrap();
    assert_eq!(songs.len(), 3);
}

// ============================================================================
// Transaction Tests
// ============================================================================

#[tokio::test]
async fn test_transact_get_index_correspondence() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let songs = test
        .table
        .transact_get(&[
            Song::key(&artist, "2022-04-28").unwrap(),
            Song::key(&artist, "1999-01-01").unwrap(),
            Song::key(&artist, "2021-11-13").unwrap(),
        ])
        .await
        .unwrap();

    assert_eq!(songs[0].as_ref().map(|s| s.title.as_str()), Some("Pure Shore"));
    assert_eq!(songs[1], None);
    assert_eq!(songs[2].as_ref().map(|s| s.title.as_str()), Some("Odyssey"));
}

#[tokio::test]
async fn test_transact_write_commits() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let transaction = WriteTransaction::new()
        .delete(Song::key(&artist, "2022-04-28").unwrap())
        .update(
            Song::key(&artist, "2021-11-13").unwrap(),
            SetFields::new().set(Song::GENRE, "Rock"),
        );
    test.table.transact_write(transaction).await.unwrap();

    let remaining: Vec<Song> = test.table.scan().try_collect().await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().any(|s| s.release_date == "2021-11-13" && s.genre == "Rock"));
}

#[tokio::test]
async fn test_transact_write_is_atomic() {
    skip_if_no_endpoint!();
    let (test, artist) = seeded().await;

    let transaction = WriteTransaction::new()
        .delete(Song::key(&artist, "2022-04-28").unwrap())
        .check(
            Song::key(&artist, "2021-10-30").unwrap(),
            Condition::equals(Song::GENRE, "Jazz"),
        );
    let err = test.table.transact_write(transaction).await.unwrap_err();

    match err {
        Error::ConditionFailure { reasons, .. } => {
            assert_eq!(reasons, vec![None, Some("ConditionalCheckFailed".to_string())])
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let kept = test.table.get(&Song::key(&artist, "2022-04-28").unwrap()).await.unwrap();
    assert!(kept.is_some());
}

#[tokio::test]
async fn test_admin_table_lifecycle() {
    skip_if_no_endpoint!();
    let test = TestTable::create().await;
    let client = test.gateway.client();

    assert!(admin::table_exists(client, test.table.name()).await.unwrap());
    assert!(admin::delete_table(client, test.table.name()).await.unwrap());
    assert!(!admin::delete_table(client, &unique_table()).await.unwrap());
    assert!(!admin::table_exists(client, &unique_table()).await.unwrap());
}
