//! REST side of the notification service: history pages and read-state
//! mirroring. The real-time feed never replays, so this is how the client
//! catches up after a gap.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

use crate::constants::HISTORY_TIMEOUT;
use crate::models::{InboundNotification, NotificationKind, NotificationRecord};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("History request timed out")]
    Timeout,
}

impl From<reqwest::Error> for HistoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HistoryError::Timeout
        } else if e.is_decode() {
            HistoryError::Decode(e.to_string())
        } else {
            HistoryError::Http(e.to_string())
        }
    }
}

/// One page of history, newest first as served.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub records: Vec<NotificationRecord>,
    /// Entries that failed normalization and were skipped.
    pub skipped: usize,
    pub has_more: bool,
}

/// Remote collaborator for history and read state.
pub trait HistoryClient: Send + Sync + 'static {
    fn fetch_page(&self, page: u32, per_page: u32) -> BoxFuture<'_, Result<HistoryPage, HistoryError>>;
    fn unread_count(&self) -> BoxFuture<'_, Result<u64, HistoryError>>;
    fn mark_read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), HistoryError>>;
    fn mark_kind_read<'a>(&'a self, kind: &'a NotificationKind) -> BoxFuture<'a, Result<(), HistoryError>>;
    fn mark_all_read(&self) -> BoxFuture<'_, Result<(), HistoryError>>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageBody {
    Wrapped {
        #[serde(alias = "data", alias = "items")]
        notifications: Vec<InboundNotification>,
        #[serde(default)]
        has_more: Option<bool>,
    },
    Bare(Vec<InboundNotification>),
}

#[derive(Debug, Deserialize)]
struct UnreadCountBody {
    #[serde(alias = "count")]
    unread_count: u64,
}

fn normalize_page(body: PageBody, per_page: u32) -> HistoryPage {
    let (items, has_more) = match body {
        PageBody::Wrapped {
            notifications,
            has_more,
        } => {
            let guess = notifications.len() as u32 >= per_page;
            (notifications, has_more.unwrap_or(guess))
        }
        PageBody::Bare(items) => {
            let has_more = items.len() as u32 >= per_page;
            (items, has_more)
        }
    };

    let mut page = HistoryPage {
        records: Vec::with_capacity(items.len()),
        skipped: 0,
        has_more,
    };
    for item in items {
        match item.into_record() {
            Ok(record) => page.records.push(record),
            Err(e) => {
                tracing::warn!("Skipping malformed history entry: {}", e);
                page.skipped += 1;
            }
        }
    }
    page
}

// Ids and kinds are opaque; they go into the path as single segments.
fn read_path(id: &str) -> String {
    format!("/notifications/{}/read", urlencoding::encode(id))
}

fn read_type_path(kind: &NotificationKind) -> String {
    format!("/notifications/read-type/{}", urlencoding::encode(kind.as_str()))
}

/// `reqwest` implementation against the notification REST endpoints.
pub struct RestHistoryClient {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl RestHistoryClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, HistoryError> {
        let client = reqwest::Client::builder()
            .timeout(HISTORY_TIMEOUT)
            .build()
            .map_err(|e| HistoryError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, HistoryError> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(HistoryError::Http(format!("{}: {}", status, error_text)));
        }
        Ok(response)
    }

    async fn patch(&self, path: &str) -> Result<(), HistoryError> {
        self.send(self.request(reqwest::Method::PATCH, path)).await?;
        Ok(())
    }
}

impl HistoryClient for RestHistoryClient {
    fn fetch_page(&self, page: u32, per_page: u32) -> BoxFuture<'_, Result<HistoryPage, HistoryError>> {
        Box::pin(async move {
            let builder = self
                .request(reqwest::Method::GET, "/notifications")
                .query(&[("page", page), ("per_page", per_page)]);
            let response = self.send(builder).await?;
            let text = response.text().await?;
            let body: PageBody =
                serde_json::from_str(&text).map_err(|e| HistoryError::Decode(e.to_string()))?;
            Ok(normalize_page(body, per_page))
        })
    }

    fn unread_count(&self) -> BoxFuture<'_, Result<u64, HistoryError>> {
        Box::pin(async move {
            let response = self
                .send(self.request(reqwest::Method::GET, "/notifications/unread-count"))
                .await?;
            let text = response.text().await?;
            let body: UnreadCountBody =
                serde_json::from_str(&text).map_err(|e| HistoryError::Decode(e.to_string()))?;
            Ok(body.unread_count)
        })
    }

    fn mark_read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), HistoryError>> {
        Box::pin(async move { self.patch(&read_path(id)).await })
    }

    fn mark_kind_read<'a>(&'a self, kind: &'a NotificationKind) -> BoxFuture<'a, Result<(), HistoryError>> {
        Box::pin(async move { self.patch(&read_type_path(kind)).await })
    }

    fn mark_all_read(&self) -> BoxFuture<'_, Result<(), HistoryError>> {
        Box::pin(async move { self.patch("/notifications/read-all").await })
    }
}

/// Server-side state kept in memory. Used by tests and offline demos; mirrors
/// the REST semantics closely enough to exercise resync.
#[derive(Clone, Default)]
pub struct InMemoryHistory {
    records: Arc<Mutex<Vec<NotificationRecord>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl InMemoryHistory {
    pub fn new(records: Vec<NotificationRecord>) -> Self {
        let history = Self::default();
        history.set_records(records);
        history
    }

    /// Replace server state. Served newest first.
    pub fn set_records(&self, mut records: Vec<NotificationRecord>) {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        *self.records.lock() = records;
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().clone()
    }

    /// Mutating calls received so far, e.g. `mark_read:42`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record_call(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl HistoryClient for InMemoryHistory {
    fn fetch_page(&self, page: u32, per_page: u32) -> BoxFuture<'_, Result<HistoryPage, HistoryError>> {
        let records = self.records.lock();
        let per_page = per_page.max(1) as usize;
        let start = (page.saturating_sub(1) as usize).saturating_mul(per_page);
        let slice: Vec<_> = records.iter().skip(start).take(per_page).cloned().collect();
        let page = HistoryPage {
            has_more: start + slice.len() < records.len(),
            records: slice,
            skipped: 0,
        };
        Box::pin(async move { Ok(page) })
    }

    fn unread_count(&self) -> BoxFuture<'_, Result<u64, HistoryError>> {
        let count = self.records.lock().iter().filter(|r| !r.is_read).count() as u64;
        Box::pin(async move { Ok(count) })
    }

    fn mark_read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), HistoryError>> {
        self.record_call(format!("mark_read:{}", id));
        for record in self.records.lock().iter_mut().filter(|r| r.id == id) {
            record.is_read = true;
        }
        Box::pin(async move { Ok(()) })
    }

    fn mark_kind_read<'a>(&'a self, kind: &'a NotificationKind) -> BoxFuture<'a, Result<(), HistoryError>> {
        self.record_call(format!("mark_kind_read:{}", kind));
        for record in self.records.lock().iter_mut().filter(|r| &r.kind == kind) {
            record.is_read = true;
        }
        Box::pin(async move { Ok(()) })
    }

    fn mark_all_read(&self) -> BoxFuture<'_, Result<(), HistoryError>> {
        self.record_call("mark_all_read".to_string());
        for record in self.records.lock().iter_mut() {
            record.is_read = true;
        }
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, secs: i64) -> NotificationRecord {
        NotificationRecord::new(id, NotificationKind::Like, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_wrapped_page_skips_malformed_entries() {
        let body: PageBody = serde_json::from_str(
            r#"{"notifications": [
                {"id": 1, "type": "like", "created_at": 1700000000},
                {"type": "like", "created_at": 1700000000},
                {"id": "x", "type": "follow", "created_at": "2024-01-01T00:00:00Z"}
            ], "has_more": true}"#,
        )
        .unwrap();
        let page = normalize_page(body, 50);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.skipped, 1);
        assert!(page.has_more);
        assert_eq!(page.records[0].id, "1");
    }

    #[test]
    fn test_bare_array_infers_has_more() {
        let body: PageBody = serde_json::from_str(
            r#"[{"id": 1, "type": "like", "created_at": 1700000000},
                {"id": 2, "type": "like", "created_at": 1700000001}]"#,
        )
        .unwrap();
        assert!(normalize_page(body, 2).has_more);

        let body: PageBody = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(!normalize_page(body, 2).has_more);
    }

    #[test]
    fn test_unread_count_body_aliases() {
        let a: UnreadCountBody = serde_json::from_str(r#"{"unread_count": 4}"#).unwrap();
        let b: UnreadCountBody = serde_json::from_str(r#"{"count": 7}"#).unwrap();
        assert_eq!(a.unread_count, 4);
        assert_eq!(b.unread_count, 7);
    }

    #[tokio::test]
    async fn test_in_memory_paging_and_marks() {
        let history = InMemoryHistory::new(vec![record("a", 1), record("b", 3), record("c", 2)]);

        let first = history.fetch_page(1, 2).await.unwrap();
        let ids: Vec<_> = first.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(first.has_more);

        let second = history.fetch_page(2, 2).await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(!second.has_more);

        history.mark_read("b").await.unwrap();
        assert_eq!(history.unread_count().await.unwrap(), 2);
        history.mark_all_read().await.unwrap();
        assert_eq!(history.unread_count().await.unwrap(), 0);
        assert_eq!(history.calls(), vec!["mark_read:b", "mark_all_read"]);
    }

    #[tokio::test]
    async fn test_rest_client_unreachable_is_http_error() {
        let client = RestHistoryClient::new("http://127.0.0.1:9/api/", None).unwrap();
        assert!(matches!(client.unread_count().await, Err(HistoryError::Http(_))));
    }

    #[test]
    fn test_opaque_ids_stay_one_path_segment() {
        assert_eq!(read_path("42"), "/notifications/42/read");
        assert_eq!(read_path("a/b?c#d"), "/notifications/a%2Fb%3Fc%23d/read");
        assert_eq!(
            read_type_path(&NotificationKind::from("team/invite")),
            "/notifications/read-type/team%2Finvite"
        );
        assert_eq!(
            read_type_path(&NotificationKind::LevelUp),
            "/notifications/read-type/level_up"
        );
    }
}
