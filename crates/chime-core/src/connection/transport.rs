use futures::future::BoxFuture;
use tokio::sync::mpsc;

use super::types::ConnectionError;

/// One live connection as seen by the manager: a stream of inbound text
/// frames (ending in `Err` or channel close on loss) and a sender for
/// outbound frames. Dropping the session closes the connection.
pub struct Session {
    pub inbound: mpsc::UnboundedReceiver<Result<String, ConnectionError>>,
    pub outbound: mpsc::UnboundedSender<String>,
}

/// Source of sessions. The WebSocket client and the in-memory test transport
/// both implement it, so the manager never knows which one it drives.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Session, ConnectionError>>;
}
