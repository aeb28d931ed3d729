//! In-process transport. Each accepted connect hands a [`MemoryPeer`] to the
//! [`MemoryAcceptor`], which plays the server side: push frames, read what
//! the client sent, or drop the connection to simulate a network loss.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::transport::{Session, Transport};
use super::types::ConnectionError;

pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Mutex<u32>,
    attempts: AtomicU32,
}

/// Server end of one accepted connection.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Result<String, ConnectionError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peers: tx,
            refusals: Mutex::new(0),
            attempts: AtomicU32::new(0),
        });
        (transport, MemoryAcceptor { peers: rx })
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse_next(&self, count: u32) {
        *self.refusals.lock() = count;
    }

    /// Total connection attempts so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn accept(&self) -> Result<Session, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut refusals = self.refusals.lock();
            if *refusals > 0 {
                *refusals -= 1;
                return Err(ConnectionError::Transport("connection refused".to_string()));
            }
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.peers
            .send(MemoryPeer {
                to_client,
                from_client,
            })
            .map_err(|_| ConnectionError::Transport("no acceptor".to_string()))?;

        Ok(Session { inbound, outbound })
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> BoxFuture<'_, Result<Session, ConnectionError>> {
        let result = self.accept();
        Box::pin(async move { result })
    }
}

impl MemoryAcceptor {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

impl MemoryPeer {
    /// Send one text frame to the client. False once the client is gone.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(Ok(frame.into())).is_ok()
    }

    /// Terminate the connection with a transport error.
    pub fn fail(self, reason: &str) {
        let _ = self
            .to_client
            .send(Err(ConnectionError::Transport(reason.to_string())));
    }

    /// Next frame the client sent, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}
