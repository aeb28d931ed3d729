//! Shared harness for runtime-level tests: an in-memory transport, a
//! counting audio backend and helpers to wait on UI events.

#![allow(dead_code)]
use chime_core::audio::{AudioBackend, AudioError, Tone};
use chime_core::connection::memory::{MemoryAcceptor, MemoryPeer, MemoryTransport};
use chime_core::connection::ReconnectPolicy;
use chime_core::history::{HistoryClient, HistoryError, HistoryPage};
use chime_core::models::NotificationKind;
use futures::future::{BoxFuture, FutureExt};
use chime_core::models::PreferencesStorage;
use chime_core::{CoreEvent, CoreRuntime, RuntimeParts};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(3);

/// History deadline used by the harness; well under `WAIT`.
pub const HISTORY_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Clone, Default)]
pub struct CountingBackend {
    pub plays: Arc<AtomicU32>,
}

impl AudioBackend for CountingBackend {
    fn open(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn play(&mut self, _tone: &Tone) -> Result<(), AudioError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub runtime: CoreRuntime,
    pub transport: Arc<MemoryTransport>,
    pub acceptor: MemoryAcceptor,
    pub events: mpsc::UnboundedReceiver<CoreEvent>,
    pub audio: CountingBackend,
}

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: 5,
        max_delay_ms: 20,
        multiplier: 2.0,
        offline_after_attempts: 3,
    }
}

impl Harness {
    pub fn new(preferences: PreferencesStorage) -> Self {
        Self::with_history(preferences, None)
    }

    pub fn with_history(preferences: PreferencesStorage, history: Option<Arc<dyn HistoryClient>>) -> Self {
        let (transport, acceptor) = MemoryTransport::new();
        let audio = CountingBackend::default();
        let mut parts = RuntimeParts::new(transport.clone(), Box::new(audio.clone()), preferences);
        parts.history = history;
        parts.reconnect = fast_policy();
        parts.history_timeout = HISTORY_TIMEOUT;

        let mut runtime = CoreRuntime::from_parts(parts).expect("runtime");
        let events = runtime.take_events().expect("events");
        Self {
            runtime,
            transport,
            acceptor,
            events,
            audio,
        }
    }

    pub fn start(&mut self) {
        self.runtime.start().expect("start");
    }

    pub async fn accept(&mut self) -> MemoryPeer {
        timeout(WAIT, self.acceptor.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("transport dropped")
    }

    pub fn plays(&self) -> u32 {
        self.audio.plays.load(Ordering::SeqCst)
    }

    pub async fn next_event(&mut self) -> CoreEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a core event")
            .expect("event stream closed")
    }

    /// Skip ahead to the next event matching `pred`.
    pub async fn wait_for(&mut self, pred: impl Fn(&CoreEvent) -> bool) -> CoreEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Collect `count` new-notification ids, ignoring other events.
    pub async fn new_notifications(&mut self, count: usize) -> Vec<String> {
        let mut ids = Vec::with_capacity(count);
        while ids.len() < count {
            if let CoreEvent::NewNotification(record) = self.next_event().await {
                ids.push(record.id);
            }
        }
        ids
    }

    /// Every event already queued, without waiting.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn like_frame(id: u64, created_at: i64) -> String {
    serde_json::json!({
        "id": id,
        "type": "like",
        "title": "New like",
        "message": "Alice liked your post",
        "data": {"post_id": 7},
        "created_at": created_at,
    })
    .to_string()
}

/// History server that accepts requests and never answers.
pub struct SilentHistory;

impl HistoryClient for SilentHistory {
    fn fetch_page(&self, _page: u32, _per_page: u32) -> BoxFuture<'_, Result<HistoryPage, HistoryError>> {
        futures::future::pending().boxed()
    }

    fn unread_count(&self) -> BoxFuture<'_, Result<u64, HistoryError>> {
        futures::future::pending().boxed()
    }

    fn mark_read<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<(), HistoryError>> {
        futures::future::pending().boxed()
    }

    fn mark_kind_read<'a>(&'a self, _kind: &'a NotificationKind) -> BoxFuture<'a, Result<(), HistoryError>> {
        futures::future::pending().boxed()
    }

    fn mark_all_read(&self) -> BoxFuture<'_, Result<(), HistoryError>> {
        futures::future::pending().boxed()
    }
}
