use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{AudioError, AudioGate, PlayOutcome};
use crate::connection::ConnectionEvent;
use crate::constants::HISTORY_PAGE_SIZE;
use crate::events::CoreEvent;
use crate::history::{HistoryClient, HistoryError, HistoryPage};
use crate::models::{InboundNotification, NormalizeError, NotificationKind, NotificationRecord};
use crate::store::{InsertOutcome, SharedNotificationStore};

/// Event names on the feed that carry a notification in `data`.
const NOTIFICATION_EVENTS: &[&str] = &["notification", "new_notification"];

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

impl From<NormalizeError> for DispatchError {
    fn from(e: NormalizeError) -> Self {
        DispatchError::MalformedEvent(e.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::MalformedEvent(e.to_string())
    }
}

/// Turn one raw frame into an inbound notification.
///
/// Accepts either a bare notification object or an `{"event", "data"}`
/// envelope. Envelopes for other event names yield `Ok(None)`.
pub fn parse_frame(raw: &str) -> Result<Option<InboundNotification>, DispatchError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(mut object) = value else {
        return Err(DispatchError::MalformedEvent("frame is not a JSON object".to_string()));
    };

    let event = object.get("event").and_then(Value::as_str).map(str::to_owned);
    let body = match event.as_deref() {
        Some(event) if NOTIFICATION_EVENTS.contains(&event) => object
            .remove("data")
            .ok_or_else(|| DispatchError::MalformedEvent(format!("`{}` event without data", event)))?,
        Some(event) => {
            tracing::debug!("Ignoring feed event `{}`", event);
            return Ok(None);
        }
        None => Value::Object(object),
    };

    Ok(Some(serde_json::from_value(body)?))
}

/// Which load a fetched history page feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySync {
    /// Startup load. Local read state wins for ids already seen live.
    Bootstrap,
    /// Catch-up after a gap. The server's read state wins.
    Resync,
}

/// Fetch the newest history page, giving up after `limit`.
pub async fn fetch_history(
    history: Arc<dyn HistoryClient>,
    limit: Duration,
) -> Result<HistoryPage, HistoryError> {
    tokio::time::timeout(limit, history.fetch_page(1, HISTORY_PAGE_SIZE))
        .await
        .map_err(|_| HistoryError::Timeout)?
}

/// Integrates feed events into the store and decides what the UI hears
/// about them. Owned by the runtime's dispatch task; every mutation goes
/// through here so the store never sees interleaved writers.
pub struct DeliveryDispatcher {
    store: SharedNotificationStore,
    gate: AudioGate,
    history: Option<Arc<dyn HistoryClient>>,
    events: mpsc::UnboundedSender<CoreEvent>,
}

impl DeliveryDispatcher {
    pub fn new(
        store: SharedNotificationStore,
        gate: AudioGate,
        history: Option<Arc<dyn HistoryClient>>,
        events: mpsc::UnboundedSender<CoreEvent>,
    ) -> Self {
        Self {
            store,
            gate,
            history,
            events,
        }
    }

    pub fn store(&self) -> &SharedNotificationStore {
        &self.store
    }

    pub fn gate(&self) -> &AudioGate {
        &self.gate
    }

    /// Malformed frames are logged and dropped; the pipeline keeps going.
    pub fn handle_frame(&mut self, raw: &str) -> Option<InsertOutcome> {
        let inbound = match parse_frame(raw) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                return None;
            }
        };
        match inbound.into_record() {
            Ok(record) => Some(self.deliver(record)),
            Err(e) => {
                tracing::warn!("Dropping frame: {}", DispatchError::from(e));
                None
            }
        }
    }

    pub fn deliver(&mut self, record: NotificationRecord) -> InsertOutcome {
        let announced = record.clone();
        let outcome = self.store.insert(record);
        if outcome.is_announceable() {
            if matches!(outcome, InsertOutcome::Inserted { unread: false }) {
                tracing::warn!("New notification {} arrived already read", announced.id);
            }
            self.announce(announced);
        } else {
            tracing::debug!("Redelivery of {}: {:?}", announced.id, outcome);
        }
        outcome
    }

    fn announce(&mut self, record: NotificationRecord) {
        match self.gate.play() {
            Ok(PlayOutcome::Played) | Ok(PlayOutcome::Muted) => {}
            Err(AudioError::NotReady) => self.emit(CoreEvent::AudioBlocked),
            Err(e) => tracing::warn!("Notification sound failed: {}", e),
        }
        tracing::info!("New notification {} ({})", record.id, record.kind);
        self.emit(CoreEvent::NewNotification(record));
    }

    /// Applies one connection event. Returns the history load the caller
    /// should run off the dispatch task, if any.
    pub fn handle_connection_event(&mut self, event: ConnectionEvent) -> Option<HistorySync> {
        match event {
            ConnectionEvent::Frame(raw) => {
                self.handle_frame(&raw);
            }
            ConnectionEvent::StateChanged(state) => self.emit(CoreEvent::ConnectionChanged(state)),
            ConnectionEvent::Offline { attempts } => self.emit(CoreEvent::Offline { attempts }),
            ConnectionEvent::Resumed => {
                if self.history.is_some() {
                    return Some(HistorySync::Resync);
                }
                tracing::debug!("Reconnected without a history source; gap not recovered");
            }
        }
        None
    }

    pub fn history(&self) -> Option<Arc<dyn HistoryClient>> {
        self.history.clone()
    }

    /// Merge a fetched first page. Nothing is announced either way.
    pub fn apply_history(&mut self, sync: HistorySync, page: HistoryPage) -> usize {
        match sync {
            HistorySync::Bootstrap => {
                let added = self.store.hydrate(page.records);
                tracing::info!("Loaded {} notifications from history", added);
                self.emit(CoreEvent::HistoryLoaded { added });
                added
            }
            HistorySync::Resync => {
                let inserted = self.store.apply_server_state(page.records);
                tracing::info!("Resynced with server: {} missed notifications", inserted);
                self.emit(CoreEvent::Resynced { inserted });
                inserted
            }
        }
    }

    pub fn initialize_audio(&mut self) -> Result<(), AudioError> {
        self.gate.initialize()
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.gate.set_sound_enabled(enabled);
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        let changed = self.store.mark_read(id);
        if changed {
            let id = id.to_string();
            self.mirror("mark_read", move |history| {
                async move { history.mark_read(&id).await }.boxed()
            });
        }
        changed
    }

    pub fn mark_all_read(&mut self) -> usize {
        let changed = self.store.mark_all_read();
        // Mirrored even when nothing changed locally; the server may know more.
        self.mirror("mark_all_read", |history| {
            async move { history.mark_all_read().await }.boxed()
        });
        changed
    }

    pub fn mark_kind_read(&mut self, kind: &NotificationKind) -> usize {
        let changed = self.store.mark_kind_read(kind);
        let kind = kind.clone();
        self.mirror("mark_kind_read", move |history| {
            async move { history.mark_kind_read(&kind).await }.boxed()
        });
        changed
    }

    pub fn cleanup_duplicates(&mut self) -> usize {
        self.store.cleanup_duplicates()
    }

    /// Fire-and-forget REST call. Failures are logged; the local ledger
    /// stays as mutated and the next resync settles any disagreement.
    fn mirror<F>(&self, what: &'static str, call: F)
    where
        F: FnOnce(Arc<dyn HistoryClient>) -> BoxFuture<'static, Result<(), HistoryError>> + Send + 'static,
    {
        let Some(history) = self.history.clone() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!("No runtime; skipping {} mirror", what);
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = call(history).await {
                tracing::warn!("Failed to mirror {}: {}", what, e);
            }
        });
    }

    fn emit(&self, event: CoreEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::gate::tests::RecordingBackend;
    use crate::connection::ConnectionState;
    use crate::history::InMemoryHistory;
    use crate::models::{Preferences, PreferencesStorage};
    use chrono::{TimeZone, Utc};

    fn dispatcher(
        prefs: Preferences,
        history: Option<Arc<dyn HistoryClient>>,
    ) -> (DeliveryDispatcher, RecordingBackend, mpsc::UnboundedReceiver<CoreEvent>) {
        let backend = RecordingBackend::default();
        let gate = AudioGate::new(Box::new(backend.clone()), PreferencesStorage::in_memory(prefs));
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = DeliveryDispatcher::new(SharedNotificationStore::new(), gate, history, tx);
        (dispatcher, backend, rx)
    }

    fn unlocked() -> Preferences {
        Preferences {
            sound_enabled: true,
            has_interacted: true,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn like_frame(id: u64, created_at: i64) -> String {
        format!(
            r#"{{"id": {id}, "type": "like", "title": "New like", "message": "Alice liked your post", "created_at": {created_at}}}"#
        )
    }

    #[test]
    fn test_parse_bare_and_envelope() {
        let bare = parse_frame(&like_frame(1, 1_700_000_000)).unwrap().unwrap();
        assert_eq!(bare.kind.as_deref(), Some("like"));

        let wrapped = parse_frame(&format!(
            r#"{{"event": "notification", "data": {}}}"#,
            like_frame(2, 1_700_000_000)
        ))
        .unwrap()
        .unwrap();
        assert_eq!(wrapped.id, Some(serde_json::json!(2)));

        assert!(parse_frame(r#"{"event": "typing", "data": {}}"#).unwrap().is_none());
        assert!(parse_frame("[1, 2]").is_err());
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"event": "notification"}"#).is_err());
    }

    #[test]
    fn test_first_delivery_announces_once() {
        let (mut dispatcher, backend, mut rx) = dispatcher(unlocked(), None);

        let outcome = dispatcher.handle_frame(&like_frame(1, 1_700_000_000));
        assert_eq!(outcome, Some(InsertOutcome::Inserted { unread: true }));
        assert_eq!(dispatcher.store().unread_count(), 1);
        assert_eq!(*backend.plays.lock(), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            CoreEvent::NewNotification(record) => {
                assert_eq!(record.id, "1");
                assert_eq!(record.kind, NotificationKind::Like);
                assert!(!record.is_read);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let outcome = dispatcher.handle_frame(&like_frame(1, 1_700_000_000));
        assert_eq!(outcome, Some(InsertOutcome::Merged { changed: false }));
        assert_eq!(dispatcher.store().unread_count(), 1);
        assert_eq!(*backend.plays.lock(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let (mut dispatcher, backend, mut rx) = dispatcher(unlocked(), None);

        assert_eq!(dispatcher.handle_frame("{"), None);
        assert_eq!(dispatcher.handle_frame(r#"{"type": "like", "created_at": 1}"#), None);
        assert_eq!(dispatcher.handle_frame(r#"{"id": 5, "created_at": 1}"#), None);
        assert_eq!(dispatcher.handle_frame(r#"{"id": 5, "type": "like"}"#), None);
        assert_eq!(
            dispatcher.handle_frame(r#"{"id": 5, "type": "like", "created_at": "yesterday"}"#),
            None
        );
        assert_eq!(
            dispatcher.handle_frame(r#"{"id": 5, "type": "like", "created_at": -9223372036854775808}"#),
            None
        );
        assert_eq!(
            dispatcher.handle_frame(r#"{"event": "new_notification", "id": 5}"#),
            None
        );

        assert!(dispatcher.store().read().is_empty());
        assert_eq!(*backend.plays.lock(), 0);
        assert!(drain(&mut rx).is_empty());

        assert!(dispatcher.handle_frame(&like_frame(6, 1_700_000_000)).is_some());
        assert_eq!(dispatcher.store().read().len(), 1);
    }

    #[test]
    fn test_audio_blocked_before_interaction() {
        let (mut dispatcher, backend, mut rx) = dispatcher(Preferences::default(), None);

        dispatcher.handle_frame(&like_frame(1, 1_700_000_000));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], CoreEvent::AudioBlocked);
        assert!(matches!(events[1], CoreEvent::NewNotification(_)));
        assert_eq!(*backend.plays.lock(), 0);

        dispatcher.initialize_audio().unwrap();
        dispatcher.handle_frame(&like_frame(2, 1_700_000_001));
        assert_eq!(*backend.plays.lock(), 1);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_muted_still_signals() {
        let prefs = Preferences {
            sound_enabled: false,
            has_interacted: false,
        };
        let (mut dispatcher, backend, mut rx) = dispatcher(prefs, None);
        dispatcher.handle_frame(&like_frame(1, 1_700_000_000));
        assert_eq!(*backend.plays.lock(), 0);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CoreEvent::NewNotification(_)));
    }

    #[test]
    fn test_read_on_arrival_is_still_announced() {
        let (mut dispatcher, _, mut rx) = dispatcher(unlocked(), None);
        dispatcher.handle_frame(
            r#"{"id": 9, "type": "system", "is_read": true, "created_at": 1700000000}"#,
        );
        assert_eq!(dispatcher.store().unread_count(), 0);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_newer_event_under_same_id_is_announced() {
        let (mut dispatcher, backend, mut rx) = dispatcher(unlocked(), None);
        dispatcher.handle_frame(&like_frame(1, 1_700_000_000));
        dispatcher.mark_read("1");
        drain(&mut rx);

        let outcome = dispatcher.handle_frame(&like_frame(1, 1_700_000_500));
        assert_eq!(outcome, Some(InsertOutcome::Superseded { unread: true }));
        assert_eq!(dispatcher.store().unread_count(), 1);
        assert_eq!(*backend.plays.lock(), 2);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_state_changes_are_forwarded() {
        let (mut dispatcher, _, mut rx) = dispatcher(unlocked(), None);
        dispatcher.handle_connection_event(ConnectionEvent::StateChanged(ConnectionState::Connected));
        dispatcher.handle_connection_event(ConnectionEvent::Offline { attempts: 5 });
        assert_eq!(dispatcher.handle_connection_event(ConnectionEvent::Resumed), None);
        assert_eq!(
            drain(&mut rx),
            vec![
                CoreEvent::ConnectionChanged(ConnectionState::Connected),
                CoreEvent::Offline { attempts: 5 },
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_resyncs_missed_records_silently() {
        let t = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        let history = InMemoryHistory::new(vec![
            NotificationRecord::new("1", NotificationKind::Like, t(0)).read(true),
            NotificationRecord::new("2", NotificationKind::Comment, t(10)),
        ]);
        let (mut dispatcher, backend, mut rx) =
            dispatcher(unlocked(), Some(Arc::new(history.clone())));

        dispatcher.handle_frame(&like_frame(1, 1_700_000_000));
        drain(&mut rx);

        let sync = dispatcher.handle_connection_event(ConnectionEvent::Resumed);
        assert_eq!(sync, Some(HistorySync::Resync));
        let source = dispatcher.history().unwrap();
        let page = fetch_history(source, Duration::from_secs(1)).await.unwrap();
        assert_eq!(dispatcher.apply_history(HistorySync::Resync, page), 1);

        let store = dispatcher.store().read();
        assert_eq!(store.len(), 2);
        assert!(store.get("1").unwrap().is_read);
        assert_eq!(store.unread_count(), 1);
        drop(store);

        assert_eq!(*backend.plays.lock(), 1);
        assert_eq!(drain(&mut rx), vec![CoreEvent::Resynced { inserted: 1 }]);
    }

    #[test]
    fn test_bootstrap_keeps_live_read_state() {
        let t = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        let (mut dispatcher, backend, mut rx) = dispatcher(unlocked(), None);

        // Seen and read live before the startup page landed.
        dispatcher.handle_frame(&like_frame(1, 1_700_000_000));
        dispatcher.mark_read("1");
        drain(&mut rx);

        let page = HistoryPage {
            records: vec![
                NotificationRecord::new("1", NotificationKind::Like, t(0)),
                NotificationRecord::new("2", NotificationKind::Follow, t(5)),
            ],
            ..Default::default()
        };
        assert_eq!(dispatcher.apply_history(HistorySync::Bootstrap, page), 1);

        let store = dispatcher.store().read();
        assert_eq!(store.len(), 2);
        assert!(store.get("1").unwrap().is_read);
        assert_eq!(store.unread_count(), 1);
        drop(store);

        assert_eq!(*backend.plays.lock(), 1);
        assert_eq!(drain(&mut rx), vec![CoreEvent::HistoryLoaded { added: 1 }]);
    }

    #[tokio::test]
    async fn test_fetch_history_gives_up_on_a_silent_server() {
        struct Silent;
        impl HistoryClient for Silent {
            fn fetch_page(&self, _: u32, _: u32) -> BoxFuture<'_, Result<HistoryPage, HistoryError>> {
                futures::future::pending().boxed()
            }
            fn unread_count(&self) -> BoxFuture<'_, Result<u64, HistoryError>> {
                futures::future::pending().boxed()
            }
            fn mark_read<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<(), HistoryError>> {
                futures::future::pending().boxed()
            }
            fn mark_kind_read<'a>(&'a self, _: &'a NotificationKind) -> BoxFuture<'a, Result<(), HistoryError>> {
                futures::future::pending().boxed()
            }
            fn mark_all_read(&self) -> BoxFuture<'_, Result<(), HistoryError>> {
                futures::future::pending().boxed()
            }
        }

        let result = fetch_history(Arc::new(Silent), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(HistoryError::Timeout)));
    }

    #[tokio::test]
    async fn test_marks_are_mirrored() {
        let history = InMemoryHistory::default();
        let (mut dispatcher, _, _rx) = dispatcher(unlocked(), Some(Arc::new(history.clone())));
        dispatcher.handle_frame(&like_frame(1, 1_700_000_000));

        assert!(dispatcher.mark_read("1"));
        assert!(!dispatcher.mark_read("1"));
        dispatcher.mark_all_read();

        // Let the spawned mirror tasks run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(history.calls(), vec!["mark_read:1", "mark_all_read"]);
    }
}
