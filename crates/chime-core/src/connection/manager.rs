use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::backoff::ReconnectPolicy;
use super::transport::Transport;
use super::types::{ConnectionError, ConnectionEvent, ConnectionState, OutboundFrame};
use crate::constants::TEST_EVENT_NAME;

/// Receiving end of a listener registration.
///
/// Events already queued here stay readable after the listener is
/// unsubscribed; only future events stop arriving.
pub struct Listener {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Listener {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

struct ListenerRegistry {
    max: usize,
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<ConnectionEvent>)>,
}

impl ListenerRegistry {
    fn subscribe(&mut self) -> Result<Listener, ConnectionError> {
        self.senders.retain(|(_, tx)| !tx.is_closed());
        if self.senders.len() >= self.max {
            return Err(ConnectionError::TooManyListeners { max: self.max });
        }
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push((id, tx));
        Ok(Listener { id, rx })
    }

    fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sid, _)| *sid != id);
        self.senders.len() != before
    }

    fn broadcast(&mut self, event: &ConnectionEvent) {
        // Dropped receivers are pruned on the way.
        self.senders.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    listeners: Mutex<ListenerRegistry>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shut_down: AtomicBool,
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let current = *self.state.borrow();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::error!("Illegal connection transition {} -> {}", current, next);
            debug_assert!(false, "illegal connection transition {current} -> {next}");
        }
        tracing::debug!("Connection state {} -> {}", current, next);
        self.state.send_replace(next);
        self.broadcast(ConnectionEvent::StateChanged(next));
    }

    fn broadcast(&self, event: ConnectionEvent) {
        self.listeners.lock().broadcast(&event);
    }
}

/// Owns the one logical real-time connection of a session.
///
/// `start` spawns the connect/reconnect loop on the current tokio runtime;
/// `shutdown` cancels it, pending backoff timer included.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy, max_listeners: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                state,
                listeners: Mutex::new(ListenerRegistry {
                    max: max_listeners,
                    next_id: 0,
                    senders: Vec::new(),
                }),
                outbound: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> Result<Listener, ConnectionError> {
        self.inner.listeners.lock().subscribe()
    }

    pub fn unsubscribe(&self, listener_id: u64) -> bool {
        self.inner.listeners.lock().unsubscribe(listener_id)
    }

    /// Begin connecting. No-op while a loop is already running; refused
    /// once the manager has been shut down.
    pub fn start(&self) -> Result<(), ConnectionError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::ShutDown);
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run(inner)));
        Ok(())
    }

    /// Explicit teardown: cancels the live session and any pending retry,
    /// then settles in `Disconnected`.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.inner.outbound.lock().take();
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("Connection shut down");
    }

    pub fn send(&self, frame: &OutboundFrame) -> Result<(), ConnectionError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::ShutDown);
        }
        if !self.state().is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let text = serde_json::to_string(frame)
            .map_err(|e| ConnectionError::Transport(format!("Failed to encode frame: {}", e)))?;
        let outbound = self.inner.outbound.lock();
        let tx = outbound.as_ref().ok_or(ConnectionError::NotConnected)?;
        tx.send(text).map_err(|_| ConnectionError::NotConnected)
    }

    /// Ask the server to push a test notification back to us.
    pub fn send_test_event(&self, payload: Value) -> Result<(), ConnectionError> {
        self.send(&OutboundFrame {
            event: TEST_EVENT_NAME.to_string(),
            data: payload,
        })
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Connect, deliver frames until the session is lost, back off, repeat.
async fn run(inner: Arc<Inner>) {
    let mut failures: u32 = 0;
    let mut had_session = false;
    let mut offline_reported = false;

    loop {
        inner.set_state(ConnectionState::Connecting);

        match inner.transport.connect().await {
            Ok(session) => {
                failures = 0;
                offline_reported = false;
                *inner.outbound.lock() = Some(session.outbound);
                inner.set_state(ConnectionState::Connected);
                if had_session {
                    inner.broadcast(ConnectionEvent::Resumed);
                }
                had_session = true;

                let mut inbound = session.inbound;
                let reason = loop {
                    match inbound.recv().await {
                        Some(Ok(frame)) => inner.broadcast(ConnectionEvent::Frame(frame)),
                        Some(Err(e)) => break e,
                        None => break ConnectionError::Closed,
                    }
                };

                inner.outbound.lock().take();
                tracing::warn!("Connection lost: {}", reason);
                inner.set_state(ConnectionState::Reconnecting);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                tracing::warn!("Connect attempt {} failed: {}", failures, e);
                inner.set_state(ConnectionState::Reconnecting);
                if !offline_reported && inner.policy.is_offline(failures) {
                    offline_reported = true;
                    tracing::error!("Offline after {} consecutive failures", failures);
                    inner.broadcast(ConnectionEvent::Offline { attempts: failures });
                }
            }
        }

        let delay = inner.policy.delay_for(failures.saturating_sub(1));
        tracing::debug!("Reconnecting in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}
