//! Single-item operations, queries and scans against one table
//!
//! A [`Table`] is a cheap, cloneable handle: a shared gateway, the table name and
//! the record type. It holds no mutable state, so one handle can be used from
//! any number of tasks at once.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures_util::stream::{self, Stream, TryStreamExt};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::codec::{decode, decode_many, encode, Item, Record};
use crate::errors::{CancelCause, Error, Result, StoreError};
use crate::expression::{Condition, KeyCondition, SetFields, SortCondition};
use crate::gateway::{
    DeleteRequest, GetRequest, Page, PutRequest, QueryRequest, Request, Response, ScanRequest,
    StoreGateway, UpdateRequest,
};
use crate::key::PrimaryKey;

/// Paging controls for [`Table::query_page`] and [`Table::scan_page`]
#[derive(Debug, Clone, Default)]
pub struct PageOptions {
    /// Maximum items in the page
    pub limit: Option<u32>,
    /// Cursor returned with the previous page
    pub cursor: Option<String>,
}

/// One page of decoded records
#[derive(Debug, Clone)]
pub struct ResultPage<R> {
    pub items: Vec<R>,
    /// Opaque cursor for the next page; `None` on the last page
    pub cursor: Option<String>,
}

/// Typed access to one table
pub struct Table<R> {
    gateway: Arc<dyn StoreGateway>,
    name: Arc<str>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<CancelSignal>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            name: Arc::clone(&self.name),
            timeout: self.timeout,
            deadline: self.deadline,
            cancel: self.cancel.clone(),
            _record: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl<R: Record> Table<R> {
    pub fn new(gateway: Arc<dyn StoreGateway>, name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            gateway,
            name: name.into(),
            timeout: None,
            deadline: None,
            cancel: None,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle whose operations each give up after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut table = self.clone();
        table.timeout = Some(timeout);
        table
    }

    /// A handle whose operations give up at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut table = self.clone();
        table.deadline = Some(deadline);
        table
    }

    /// A handle whose operations stop when `signal` fires
    pub fn with_cancel(&self, signal: CancelSignal) -> Self {
        let mut table = self.clone();
        table.cancel = Some(signal);
        table
    }

    fn effective_deadline(&self) -> Option<Instant> {
        let from_timeout = self.timeout.map(|t| Instant::now() + t);
        match (self.deadline, from_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn guarded(
        &self,
        call: impl Future<Output = std::result::Result<Response, StoreError>>,
    ) -> Result<Response> {
        match &self.cancel {
            Some(signal) => tokio::select! {
                result = call => result.map_err(Error::from),
                _ = signal.cancelled() => Err(Error::Cancelled(CancelCause::Signal)),
            },
            None => call.await.map_err(Error::from),
        }
    }

    /// Send one request to the gateway, honouring deadline and cancellation
    pub(crate) async fn dispatch(&self, request: Request) -> Result<Response> {
        let operation = request.kind();
        if self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(Error::Cancelled(CancelCause::Signal));
        }

        debug!(table = %self.name, operation, "submitting request");
        let call = self.guarded(self.gateway.submit(request));
        let outcome = match self.effective_deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| Error::Cancelled(CancelCause::Deadline))?,
            None => call.await,
        };

        if let Err(e) = &outcome {
            debug!(table = %self.name, operation, error = %e, "request failed");
        }
        outcome
    }

    // =========================================================================
    // Point operations
    // =========================================================================

    /// Fetch one record; `Ok(None)` when no item has this key
    pub async fn get(&self, key: &PrimaryKey) -> Result<Option<R>> {
        let request = Request::Get(GetRequest {
            table: self.name.to_string(),
            key: key.to_item::<R>(),
        });

        let item = self.dispatch(request).await?.into_item()?;
        Ok(item.map(decode::<R>).transpose()?)
    }

    /// Unconditional upsert: replaces any item with the same key, attributes included
    pub async fn put(&self, record: &R) -> Result<()> {
        self.put_request(record, None).await
    }

    /// Put only if `condition` holds for the current item
    pub async fn put_if(&self, record: &R, condition: Condition) -> Result<()> {
        self.put_request(record, Some(condition)).await
    }

    async fn put_request(&self, record: &R, condition: Option<Condition>) -> Result<()> {
        record.primary_key()?;
        let request = Request::Put(PutRequest {
            table: self.name.to_string(),
            item: encode(record)?,
            condition,
        });

        self.dispatch(request).await?.into_written()?;
        Ok(())
    }

    /// Set the given attributes on one item; returns the attributes as written
    pub async fn update(&self, key: &PrimaryKey, set: SetFields) -> Result<Item> {
        set.validate(&R::key_schema(), R::FIELDS)?;
        let request = Request::Update(UpdateRequest {
            table: self.name.to_string(),
            key: key.to_item::<R>(),
            set,
            condition: None,
        });

        Ok(self.dispatch(request).await?.into_updated()?)
    }

    /// Remove one item; succeeds whether or not it existed
    pub async fn delete(&self, key: &PrimaryKey) -> Result<()> {
        let request = Request::Delete(DeleteRequest {
            table: self.name.to_string(),
            key: key.to_item::<R>(),
            condition: None,
        });

        self.dispatch(request).await?.into_written()?;
        Ok(())
    }

    // =========================================================================
    // Queries and scans
    // =========================================================================

    /// Records of `partition` whose sort key is strictly greater than `after`,
    /// in ascending sort key order. Pages are fetched as the stream is polled.
    pub fn query(
        &self,
        partition: impl Into<String>,
        after: impl Into<String>,
    ) -> impl Stream<Item = Result<R>> + Send + 'static {
        self.query_range(
            KeyCondition::partition(partition).with_sort(SortCondition::GreaterThan(after.into())),
        )
    }

    /// Records matching a key condition, ascending by sort key
    pub fn query_range(&self, condition: KeyCondition) -> impl Stream<Item = Result<R>> + Send + 'static {
        self.paginate(PageRequest::Query(self.query_request(condition, None)))
    }

    /// One page of a query, resumable through [`ResultPage::cursor`]
    pub async fn query_page(&self, condition: KeyCondition, options: PageOptions) -> Result<ResultPage<R>> {
        condition.validate()?;
        let start = options.cursor.as_deref().map(decode_cursor).transpose()?;
        if let Some(start) = &start {
            if start.partition() != condition.partition {
                return Err(Error::InvalidCursor(
                    "cursor belongs to a different partition".to_string(),
                ));
            }
        }

        let mut request = self.query_request(condition, options.limit);
        request.exclusive_start_key = start.map(|k| k.to_item::<R>());
        let page = self.fetch_page(PageRequest::Query(request)).await?;
        self.result_page(page)
    }

    /// Every record in the table, in store order
    pub fn scan(&self) -> impl Stream<Item = Result<R>> + Send + 'static {
        self.paginate(PageRequest::Scan(self.scan_request(None)))
    }

    /// One page of a scan, resumable through [`ResultPage::cursor`]
    pub async fn scan_page(&self, options: PageOptions) -> Result<ResultPage<R>> {
        let start = options.cursor.as_deref().map(decode_cursor).transpose()?;
        let mut request = self.scan_request(options.limit);
        request.exclusive_start_key = start.map(|k| k.to_item::<R>());
        let page = self.fetch_page(PageRequest::Scan(request)).await?;
        self.result_page(page)
    }

    fn query_request(&self, condition: KeyCondition, limit: Option<u32>) -> QueryRequest {
        QueryRequest {
            table: self.name.to_string(),
            schema: R::key_schema(),
            condition,
            limit,
            exclusive_start_key: None,
        }
    }

    fn scan_request(&self, limit: Option<u32>) -> ScanRequest {
        ScanRequest {
            table: self.name.to_string(),
            limit,
            exclusive_start_key: None,
        }
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page> {
        if let PageRequest::Query(query) = &request {
            query.condition.validate()?;
        }
        Ok(self.dispatch(request.into_request()).await?.into_page()?)
    }

    fn result_page(&self, page: Page) -> Result<ResultPage<R>> {
        let cursor = page
            .last_evaluated_key
            .as_ref()
            .map(|key| encode_cursor(&PrimaryKey::from_item::<R>(key)?))
            .transpose()?;
        Ok(ResultPage {
            items: decode_many(page.items)?,
            cursor,
        })
    }

    /// Fetch the page after `start` (`None` = first page). Yields the decoded
    /// records and the next state, which is `None` once the store reports no more.
    async fn next_page(
        &self,
        mut request: PageRequest,
        start: Option<Item>,
    ) -> Result<(Vec<R>, Option<Option<Item>>)> {
        request.set_start(start);
        let page = self.fetch_page(request).await?;
        let records = decode_many::<R>(page.items)?;
        Ok((records, page.last_evaluated_key.map(Some)))
    }

    fn paginate(&self, request: PageRequest) -> impl Stream<Item = Result<R>> + Send + 'static {
        let table = self.clone();
        stream::try_unfold(Some(None), move |state: Option<Option<Item>>| {
            let table = table.clone();
            let request = request.clone();
            async move {
                match state {
                    Some(start) => table.next_page(request, start).await.map(Some),
                    None => Ok(None),
                }
            }
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok)))
        .try_flatten()
    }
}

#[derive(Debug, Clone)]
enum PageRequest {
    Query(QueryRequest),
    Scan(ScanRequest),
}

impl PageRequest {
    fn set_start(&mut self, start: Option<Item>) {
        match self {
            PageRequest::Query(r) => r.exclusive_start_key = start,
            PageRequest::Scan(r) => r.exclusive_start_key = start,
        }
    }

    fn into_request(self) -> Request {
        match self {
            PageRequest::Query(r) => Request::Query(r),
            PageRequest::Scan(r) => Request::Scan(r),
        }
    }
}

fn encode_cursor(key: &PrimaryKey) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(key)?))
}

fn decode_cursor(cursor: &str) -> Result<PrimaryKey> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| Error::InvalidCursor(e.to_string()))?;
    let key: PrimaryKey =
        serde_json::from_slice(&bytes).map_err(|e| Error::InvalidCursor(e.to_string()))?;
    PrimaryKey::new(key.partition(), key.sort()).map_err(|e| Error::InvalidCursor(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::codec::AttributeValue;
    use crate::memory::MemoryGateway;
    use crate::models::Song;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    const TABLE: &str = "LikedSongs";

    async fn setup() -> (Arc<MemoryGateway>, Table<Song>) {
        let gateway = Arc::new(MemoryGateway::new().with_page_size(2));
        gateway.create_table(TABLE, Song::key_schema()).await;
        let table = Table::new(gateway.clone(), TABLE);
        (gateway, table)
    }

    fn key(artist: &str, date: &str) -> PrimaryKey {
        PrimaryKey::new(artist, date).unwrap()
    }

    async fn seed(table: &Table<Song>) {
        for song in [
            Song::new("RMHighlander", "2021-11-13", "Odyssey", "Indie"),
            Song::new("RMHighlander", "2022-04-28", "Pure Shore", "Travel"),
            Song::new("RMHighlander", "2021-10-30", "Steady Flight", "Electric Blues"),
        ] {
            table.put(&song).await.unwrap();
        }
    }

    async fn dates(stream: impl Stream<Item = Result<Song>>) -> Vec<String> {
        let songs: Vec<Song> = stream.try_collect().await.unwrap();
        songs.into_iter().map(|s| s.release_date).collect()
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_, table) = setup().await;
        assert_eq!(table.get(&key("Nobody", "2020-01-01")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites_without_merge() {
        let (gateway, table) = setup().await;
        let first = Song::new("RMHighlander", "2021-11-13", "Odyssey", "Indie");
        table.put(&first).await.unwrap();
        table
            .update(&key("RMHighlander", "2021-11-13"), SetFields::new().set("Mood", "calm"))
            .await
            .unwrap();

        let second = Song::new("RMHighlander", "2021-11-13", "Odyssey II", "Rock");
        table.put(&second).await.unwrap();

        let stored = gateway
            .submit(Request::Get(GetRequest {
                table: TABLE.into(),
                key: second.primary_key().unwrap().to_item::<Song>(),
            }))
            .await
            .unwrap()
            .into_item()
            .unwrap();
        assert_eq!(stored, Some(encode(&second).unwrap()));
        assert_eq!(gateway.item_count(TABLE).await, Some(1));
    }

    #[tokio::test]
    async fn test_put_rejects_empty_key_locally() {
        let (gateway, table) = setup().await;
        let err = table.put(&Song::new("", "2021-11-13", "Odyssey", "Indie")).await.unwrap_err();

        assert!(matches!(err, Error::InvalidKey(_)));
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let (_, table) = setup().await;
        let song = Song::new("RMHighlander", "2021-11-13", "Odyssey", "Indie");

        assert_ok!(table.put_if(&song, Condition::not_exists(Song::ARTIST)).await);
        let err = table.put_if(&song, Condition::not_exists(Song::ARTIST)).await.unwrap_err();
        assert!(matches!(err, Error::ConditionFailure { .. }));
    }

    #[tokio::test]
    async fn test_update_returns_updated_attributes() {
        let (_, table) = setup().await;
        seed(&table).await;

        let updated = table
            .update(&key("RMHighlander", "2021-11-13"), SetFields::new().set(Song::GENRE, "Soft Rock"))
            .await
            .unwrap();

        assert_eq!(updated.get("Genre"), Some(&AttributeValue::S("Soft Rock".into())));
        let song = table.get(&key("RMHighlander", "2021-11-13")).await.unwrap().unwrap();
        assert_eq!(song.genre, "Soft Rock");
        assert_eq!(song.title, "Odyssey");
    }

    #[tokio::test]
    async fn test_update_of_key_attribute_is_rejected_locally() {
        let (gateway, table) = setup().await;
        let err = table
            .update(&key("RMHighlander", "2021-11-13"), SetFields::new().set(Song::RELEASE_DATE, "2030-01-01"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn test_update_with_wrong_tag_is_rejected_locally() {
        let (gateway, table) = setup().await;
        seed(&table).await;
        let before = gateway.submissions();
        let target = key("RMHighlander", "2021-11-13");

        let err = table
            .update(&target, SetFields::new().set(Song::TITLE, AttributeValue::N("7".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(gateway.submissions(), before);
        assert_eq!(table.get(&target).await.unwrap().unwrap().title, "Odyssey");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_, table) = setup().await;
        seed(&table).await;
        let target = key("RMHighlander", "2021-10-30");

        assert_ok!(table.delete(&target).await);
        assert_ok!(table.delete(&target).await);
        assert_ok!(table.delete(&key("Nobody", "1999-01-01")).await);
        assert_eq!(table.get(&target).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_ordering() {
        let (_, table) = setup().await;
        seed(&table).await;
        table.put(&Song::new("Someone Else", "2021-12-01", "Other", "Pop")).await.unwrap();

        assert_eq!(
            dates(table.query("RMHighlander", "2021-01-01")).await,
            vec!["2021-10-30", "2021-11-13", "2022-04-28"]
        );
        assert_eq!(dates(table.query("RMHighlander", "2021-11-13")).await, vec!["2022-04-28"]);
        assert!(dates(table.query("RMHighlander", "2022-04-28")).await.is_empty());
    }

    #[tokio::test]
    async fn test_query_range_between() {
        let (_, table) = setup().await;
        seed(&table).await;

        let condition = KeyCondition::partition("RMHighlander")
            .with_sort(SortCondition::Between("2021-01-01".into(), "2021-12-31".into()));
        assert_eq!(dates(table.query_range(condition)).await, vec!["2021-10-30", "2021-11-13"]);
    }

    #[tokio::test]
    async fn test_query_with_empty_partition_fails_before_submission() {
        let (gateway, table) = setup().await;
        let result: Result<Vec<Song>> = table.query("", "2021-01-01").try_collect().await;

        assert!(matches!(result, Err(Error::InvalidKey(_))));
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn test_scan_walks_every_page() {
        let (gateway, table) = setup().await;
        seed(&table).await;
        table.put(&Song::new("Someone Else", "2021-12-01", "Other", "Pop")).await.unwrap();
        let before = gateway.submissions();

        let songs: Vec<Song> = table.scan().try_collect().await.unwrap();

        assert_eq!(songs.len(), 4);
        // page size is 2
        assert_eq!(gateway.submissions() - before, 2);
    }

    #[tokio::test]
    async fn test_scan_stops_on_undecodable_item() {
        let (gateway, table) = setup().await;
        seed(&table).await;
        gateway
            .submit(Request::Put(PutRequest {
                table: TABLE.into(),
                item: Item::from([
                    ("Artist".to_string(), AttributeValue::S("Broken".into())),
                    ("ReleaseDate".to_string(), AttributeValue::S("2000-01-01".into())),
                ]),
                condition: None,
            }))
            .await
            .unwrap();

        let result: Result<Vec<Song>> = table.scan().try_collect().await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_query_page_cursor() {
        let (_, table) = setup().await;
        seed(&table).await;
        let condition = KeyCondition::partition("RMHighlander");

        let first = table.query_page(condition.clone(), PageOptions::default()).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let cursor = first.cursor.expect("more pages");

        let second = table
            .query_page(condition, PageOptions { limit: None, cursor: Some(cursor) })
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].release_date, "2022-04-28");
        assert!(second.cursor.is_none());
    }

    #[tokio::test]
    async fn test_query_page_rejects_foreign_cursor() {
        let (_, table) = setup().await;
        let cursor = encode_cursor(&key("Other", "2021-01-01")).unwrap();

        let err = table
            .query_page(
                KeyCondition::partition("RMHighlander"),
                PageOptions { limit: None, cursor: Some(cursor) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCursor(_)));
        assert_err!(decode_cursor("not base64!"));
    }

    #[tokio::test]
    async fn test_scan_page_limit() {
        let (_, table) = setup().await;
        seed(&table).await;

        let page = table.scan_page(PageOptions { limit: Some(1), cursor: None }).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.cursor.is_some());
    }

    /// Never answers
    struct StuckGateway;

    #[async_trait]
    impl StoreGateway for StuckGateway {
        async fn submit(&self, _request: Request) -> std::result::Result<Response, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_deadline_reports_cancelled() {
        let table: Table<Song> = Table::new(Arc::new(StuckGateway), TABLE);
        let err = table
            .with_timeout(Duration::from_millis(10))
            .get(&key("RMHighlander", "2021-11-13"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(CancelCause::Deadline)));
    }

    #[tokio::test]
    async fn test_fixed_deadline_reports_cancelled() {
        let table: Table<Song> = Table::new(Arc::new(StuckGateway), TABLE);
        let err = table
            .with_deadline(Instant::now() + Duration::from_millis(10))
            .get(&key("RMHighlander", "2021-11-13"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(CancelCause::Deadline)));
    }

    #[tokio::test]
    async fn test_earlier_of_deadline_and_timeout_wins() {
        let table: Table<Song> = Table::new(Arc::new(StuckGateway), TABLE);
        let now = Instant::now();

        let deadline_first = table
            .with_deadline(now + Duration::from_millis(50))
            .with_timeout(Duration::from_secs(3600));
        let effective = deadline_first.effective_deadline().unwrap();
        assert!(effective <= now + Duration::from_millis(50));

        let timeout_first = table
            .with_deadline(now + Duration::from_secs(3600))
            .with_timeout(Duration::from_millis(50));
        let effective = timeout_first.effective_deadline().unwrap();
        assert!(effective < now + Duration::from_secs(60));

        let err = timeout_first.get(&key("RMHighlander", "2021-11-13")).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(CancelCause::Deadline)));
    }

    #[tokio::test]
    async fn test_cancel_signal_reports_cancelled() {
        let table: Table<Song> = Table::new(Arc::new(StuckGateway), TABLE);
        let (handle, signal) = cancel_pair();
        let table = table.with_cancel(signal);

        let pending = tokio::spawn(async move { table.delete(&key("RMHighlander", "2021-11-13")).await });
        handle.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled(CancelCause::Signal)));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_submits() {
        let (gateway, table) = setup().await;
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let err = table.with_cancel(signal).put(&Song::new("a", "b", "c", "d")).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(CancelCause::Signal)));
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_puts_on_shared_handle() {
        let (gateway, table) = setup().await;
        let tasks = (0..16)
            .map(|i| {
                let table = table.clone();
                tokio::spawn(async move {
                    table
                        .put(&Song::new("Load", format!("2021-01-{:02}", i + 1), "t", "g"))
                        .await
                })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(gateway.item_count(TABLE).await, Some(16));
    }
}
