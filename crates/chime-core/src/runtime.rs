use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::audio::{AudioBackend, AudioError, AudioGate, RodioBackend};
use crate::config::CoreConfig;
use crate::connection::{
    ConnectionError, ConnectionManager, ConnectionState, Listener, ReconnectPolicy, Transport,
    WebSocketTransport,
};
use crate::constants::{DEFAULT_MAX_LISTENERS, HISTORY_TIMEOUT};
use crate::dispatch::{fetch_history, DeliveryDispatcher, HistorySync};
use crate::events::CoreEvent;
use crate::history::{HistoryClient, HistoryError, HistoryPage, RestHistoryClient};
use crate::models::{NotificationKind, PreferencesStorage};
use crate::store::SharedNotificationStore;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Core runtime is not running")]
    Stopped,

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// User actions, applied in order by the dispatch task.
#[derive(Debug)]
pub enum CoreCommand {
    MarkRead {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    MarkAllRead {
        reply: oneshot::Sender<usize>,
    },
    MarkKindRead {
        kind: NotificationKind,
        reply: oneshot::Sender<usize>,
    },
    CleanupDuplicates {
        reply: oneshot::Sender<usize>,
    },
    InitializeAudio {
        reply: oneshot::Sender<Result<(), AudioError>>,
    },
    SetSoundEnabled(bool),
    SendTestEvent {
        payload: Value,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Resync {
        reply: oneshot::Sender<Result<usize, HistoryError>>,
    },
    Shutdown,
}

/// Cloneable front door for user actions.
#[derive(Clone)]
pub struct CoreHandle {
    command_tx: mpsc::UnboundedSender<CoreCommand>,
}

impl CoreHandle {
    pub(crate) fn new(command_tx: mpsc::UnboundedSender<CoreCommand>) -> Self {
        Self { command_tx }
    }

    pub fn send(&self, command: CoreCommand) -> Result<(), CoreError> {
        self.command_tx.send(command).map_err(|_| CoreError::Stopped)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CoreCommand) -> Result<T, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| CoreError::Stopped)
    }

    pub async fn mark_read(&self, id: impl Into<String>) -> Result<bool, CoreError> {
        let id = id.into();
        self.request(|reply| CoreCommand::MarkRead { id, reply }).await
    }

    pub async fn mark_all_read(&self) -> Result<usize, CoreError> {
        self.request(|reply| CoreCommand::MarkAllRead { reply }).await
    }

    pub async fn mark_kind_read(&self, kind: NotificationKind) -> Result<usize, CoreError> {
        self.request(|reply| CoreCommand::MarkKindRead { kind, reply }).await
    }

    pub async fn cleanup_duplicates(&self) -> Result<usize, CoreError> {
        self.request(|reply| CoreCommand::CleanupDuplicates { reply }).await
    }

    /// Call from a user-interaction handler (click, keypress).
    pub async fn initialize_audio(&self) -> Result<(), CoreError> {
        Ok(self
            .request(|reply| CoreCommand::InitializeAudio { reply })
            .await??)
    }

    pub fn set_sound_enabled(&self, enabled: bool) -> Result<(), CoreError> {
        self.send(CoreCommand::SetSoundEnabled(enabled))
    }

    pub async fn send_test_event(&self, payload: Value) -> Result<(), CoreError> {
        Ok(self
            .request(|reply| CoreCommand::SendTestEvent { payload, reply })
            .await??)
    }

    pub async fn resync(&self) -> Result<usize, CoreError> {
        Ok(self.request(|reply| CoreCommand::Resync { reply }).await??)
    }
}

/// Everything the runtime is assembled from. `CoreRuntime::new` builds the
/// network/audio versions from a config; tests plug in in-memory ones.
pub struct RuntimeParts {
    pub transport: Arc<dyn Transport>,
    pub audio: Box<dyn AudioBackend>,
    pub preferences: PreferencesStorage,
    pub history: Option<Arc<dyn HistoryClient>>,
    pub reconnect: ReconnectPolicy,
    pub max_listeners: usize,
    /// Deadline for each history page fetch.
    pub history_timeout: Duration,
}

impl RuntimeParts {
    pub fn new(transport: Arc<dyn Transport>, audio: Box<dyn AudioBackend>, preferences: PreferencesStorage) -> Self {
        Self {
            transport,
            audio,
            preferences,
            history: None,
            reconnect: ReconnectPolicy::default(),
            max_listeners: DEFAULT_MAX_LISTENERS,
            history_timeout: HISTORY_TIMEOUT,
        }
    }
}

/// One notification session: connection, ledger and dispatcher.
pub struct CoreRuntime {
    store: SharedNotificationStore,
    connection: Arc<ConnectionManager>,
    handle: CoreHandle,
    events_rx: Option<mpsc::UnboundedReceiver<CoreEvent>>,
    pending: Option<(DeliveryDispatcher, Listener, mpsc::UnboundedReceiver<CoreCommand>)>,
    history_timeout: Duration,
    task: Option<JoinHandle<()>>,
}

impl CoreRuntime {
    pub fn new(config: CoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", config.data_dir.display())
        })?;

        let transport = Arc::new(WebSocketTransport::new(
            config.server_url.clone(),
            config.auth_token.clone(),
        ));
        let history = match &config.history_url {
            Some(url) => {
                let client = RestHistoryClient::new(url.clone(), config.auth_token.clone())
                    .context("Failed to set up the history client")?;
                Some(Arc::new(client) as Arc<dyn HistoryClient>)
            }
            None => None,
        };

        let mut parts = RuntimeParts::new(
            transport,
            Box::new(RodioBackend::new()),
            PreferencesStorage::new(&config.data_dir),
        );
        parts.history = history;
        parts.reconnect = config.reconnect.clone();
        parts.max_listeners = config.max_listeners;
        Self::from_parts(parts)
    }

    pub fn from_parts(parts: RuntimeParts) -> Result<Self> {
        let store = SharedNotificationStore::new();
        let connection = Arc::new(ConnectionManager::new(
            parts.transport,
            parts.reconnect,
            parts.max_listeners,
        ));
        let listener = connection
            .subscribe()
            .context("Failed to register the dispatcher as connection listener")?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let gate = AudioGate::new(parts.audio, parts.preferences);
        let dispatcher = DeliveryDispatcher::new(store.clone(), gate, parts.history, events_tx);

        Ok(Self {
            store,
            connection,
            handle: CoreHandle::new(command_tx),
            events_rx: Some(events_rx),
            pending: Some((dispatcher, listener, command_rx)),
            history_timeout: parts.history_timeout,
            task: None,
        })
    }

    /// Spawn the dispatch task, kick off the history load if configured,
    /// and connect. Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let Some((dispatcher, listener, commands)) = self.pending.take() else {
            anyhow::bail!("Core runtime already started");
        };
        let connection = self.connection.clone();
        let fetches = HistoryFetches::new(self.history_timeout);
        self.task = Some(tokio::spawn(dispatch_loop(
            dispatcher,
            listener,
            commands,
            connection,
            fetches,
        )));
        self.connection.start()?;
        Ok(())
    }

    pub fn handle(&self) -> CoreHandle {
        self.handle.clone()
    }

    pub fn store(&self) -> SharedNotificationStore {
        self.store.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// UI event stream. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<CoreEvent>> {
        self.events_rx.take()
    }

    /// Tear down the connection (pending retries included), let the
    /// dispatcher drain what was already queued, then join it.
    pub async fn shutdown(&mut self) {
        self.connection.shutdown().await;
        let _ = self.handle.send(CoreCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Dispatch task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        // Releases the task's handle on the connection so its retry loop
        // is aborted with the manager.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A history page on its way back to the dispatch task.
struct FetchedPage {
    sync: HistorySync,
    result: Result<HistoryPage, HistoryError>,
    reply: Option<oneshot::Sender<Result<usize, HistoryError>>>,
}

/// History requests in flight. They run as separate tasks so a slow server
/// never holds up frames or commands; dropping the set aborts them.
struct HistoryFetches {
    tasks: JoinSet<FetchedPage>,
    timeout: Duration,
}

impl HistoryFetches {
    fn new(timeout: Duration) -> Self {
        Self {
            tasks: JoinSet::new(),
            timeout,
        }
    }

    fn spawn(
        &mut self,
        history: Option<Arc<dyn HistoryClient>>,
        sync: HistorySync,
        reply: Option<oneshot::Sender<Result<usize, HistoryError>>>,
    ) {
        let Some(history) = history else {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(0));
            }
            return;
        };
        let timeout = self.timeout;
        self.tasks.spawn(async move {
            let result = fetch_history(history, timeout).await;
            FetchedPage { sync, result, reply }
        });
    }

    /// Next finished fetch. Pending forever while nothing is in flight.
    async fn next(&mut self) -> FetchedPage {
        loop {
            match self.tasks.join_next().await {
                Some(Ok(page)) => return page,
                Some(Err(e)) => tracing::error!("History fetch task failed: {}", e),
                None => std::future::pending::<()>().await,
            }
        }
    }
}

async fn dispatch_loop(
    mut dispatcher: DeliveryDispatcher,
    mut listener: Listener,
    mut commands: mpsc::UnboundedReceiver<CoreCommand>,
    connection: Arc<ConnectionManager>,
    mut fetches: HistoryFetches,
) {
    fetches.spawn(dispatcher.history(), HistorySync::Bootstrap, None);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(CoreCommand::Shutdown) | None => break,
                Some(CoreCommand::Resync { reply }) => {
                    fetches.spawn(dispatcher.history(), HistorySync::Resync, Some(reply));
                }
                Some(command) => handle_command(&mut dispatcher, &connection, command),
            },
            event = listener.recv() => match event {
                Some(event) => {
                    if let Some(sync) = dispatcher.handle_connection_event(event) {
                        fetches.spawn(dispatcher.history(), sync, None);
                    }
                }
                None => break,
            },
            page = fetches.next() => apply_page(&mut dispatcher, page),
        }
    }

    // Shutting down: no new history loads, in-flight ones are dropped.
    while let Some(event) = listener.try_recv() {
        dispatcher.handle_connection_event(event);
    }
    tracing::debug!("Dispatch loop finished");
}

fn apply_page(dispatcher: &mut DeliveryDispatcher, page: FetchedPage) {
    let FetchedPage { sync, result, reply } = page;
    let result = result.map(|page| dispatcher.apply_history(sync, page));
    if let Err(e) = &result {
        tracing::warn!("History {:?} failed: {}", sync, e);
    }
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

fn handle_command(
    dispatcher: &mut DeliveryDispatcher,
    connection: &ConnectionManager,
    command: CoreCommand,
) {
    // A dropped reply receiver just means the caller stopped waiting.
    match command {
        CoreCommand::MarkRead { id, reply } => {
            let _ = reply.send(dispatcher.mark_read(&id));
        }
        CoreCommand::MarkAllRead { reply } => {
            let _ = reply.send(dispatcher.mark_all_read());
        }
        CoreCommand::MarkKindRead { kind, reply } => {
            let _ = reply.send(dispatcher.mark_kind_read(&kind));
        }
        CoreCommand::CleanupDuplicates { reply } => {
            let _ = reply.send(dispatcher.cleanup_duplicates());
        }
        CoreCommand::InitializeAudio { reply } => {
            let _ = reply.send(dispatcher.initialize_audio());
        }
        CoreCommand::SetSoundEnabled(enabled) => dispatcher.set_sound_enabled(enabled),
        CoreCommand::SendTestEvent { payload, reply } => {
            let _ = reply.send(connection.send_test_event(payload));
        }
        // Routed to the history fetches by the loop.
        CoreCommand::Resync { .. } | CoreCommand::Shutdown => {}
    }
}
