mod backoff;
mod manager;
pub mod memory;
mod transport;
mod types;
mod websocket;

pub use backoff::ReconnectPolicy;
pub use manager::{ConnectionManager, Listener};
pub use transport::{Session, Transport};
pub use types::{ConnectionError, ConnectionEvent, ConnectionState, OutboundFrame};
pub use websocket::WebSocketTransport;
