use crate::connection::ConnectionState;
use crate::models::NotificationRecord;

/// Signals for the UI layer, emitted by the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A record seen for the first time (or revived by a newer event).
    /// Raised exactly once per logical event.
    NewNotification(NotificationRecord),
    /// The tone was due but no user interaction has unlocked audio yet.
    /// UI should prompt for a click/keypress and then call `initialize_audio`.
    AudioBlocked,
    ConnectionChanged(ConnectionState),
    /// Reconnect attempts hit the offline ceiling; retries continue.
    Offline { attempts: u32 },
    /// Startup history page merged into the store.
    HistoryLoaded { added: usize },
    /// Server state re-applied after a reconnect or an explicit resync.
    Resynced { inserted: usize },
}
