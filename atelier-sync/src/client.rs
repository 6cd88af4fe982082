//! Sync client: the context object tying the core together.
//!
//! Provides:
//! - Connection lifecycle (`start`, `shutdown`) on a background task
//! - Sequential dispatch of inbound frames (heartbeat, session, channel
//!   diffs, update batches, sign-out)
//! - Channel subscription through the channel collaborator
//! - Read surface over the cache, presence overlay and pending changes
//! - Fetch-on-miss and local edit submission
//!
//! All mutation of the store happens under one write lock per batch, so two
//! update batches never interleave. Channel commands go through one queue
//! drained by a single worker, so the collaborator sees them in issue order.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::api::{ApiError, ChannelApi, Collaborators};
use crate::channels::{ChannelCommand, ChannelOccupancy, ChannelRegistry, Retention, SubscribeOutcome};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionStatus, FrameHandler};
use crate::entity::{Entity, EntityId, EntityKind, HttpSession, IndexName, UpdateBatch, UserPresence};
use crate::pending::{ChangeTarget, PendingChange, Revision};
use crate::protocol::{Channel, InboundFrame, SessionId, WsMessage};
use crate::reconcile::{reconcile, ReconcileError, ReconcileReport, Store};

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Transport opened
    Connected,
    /// Transport closed
    Disconnected,
    /// The server identified this connection
    SessionIssued(SessionId),
    /// The previous session is gone; transient channels must be re-requested
    SessionReset,
    /// Cached entities of these kinds changed
    EntitiesChanged { kinds: Vec<EntityKind> },
    /// Presence lists of these projects changed
    PresenceChanged { projects: Vec<EntityId> },
    /// Pending-change queues of these targets changed
    ChangesUpdated { targets: Vec<ChangeTarget> },
    /// An update batch was rejected and not applied
    ReconcileFault { message: String },
    /// The signed-in HTTP session was signed out by the server
    SignedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("connection task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Authentication {
    user_id: EntityId,
    http_session_id: EntityId,
}

/// State shared between the client handle and the connection task.
struct Shared {
    config: SyncConfig,
    collaborators: Collaborators,
    store: RwLock<Store>,
    channels: Arc<Mutex<ChannelRegistry>>,
    occupancy: RwLock<ChannelOccupancy>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: broadcast::Sender<SyncEvent>,
    auth: Mutex<Option<Authentication>>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    /// Taken by the first dispatch, which starts the worker.
    command_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ChannelCommand>>>,
}

impl Shared {
    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Queue a channel command without waiting for it. Call with the
    /// registry lock held so queue order matches issue order.
    fn dispatch(&self, command: ChannelCommand) {
        let receiver = match self.command_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(receiver) = receiver {
            tokio::spawn(run_channel_commands(
                Arc::clone(&self.collaborators.channels),
                Arc::clone(&self.channels),
                receiver,
            ));
        }
        if self.commands.send(command).is_err() {
            warn!("Channel command worker is gone, dropping command");
        }
    }

    async fn process_frame(&self, text: &str) -> Vec<WsMessage> {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Dropping undecodable frame: {e}");
                return Vec::new();
            }
        };
        let demuxed = frame.demux();

        let replies = vec![WsMessage::Pong; demuxed.pings];
        if demuxed.pongs > 0 {
            trace!("Heartbeat pong x{}", demuxed.pongs);
        }

        if let Some(session) = demuxed.session_ids.into_iter().last() {
            self.session_issued(session).await;
        }

        if !demuxed.channel_updates.is_empty() {
            let mut occupancy = self.occupancy.write().await;
            for (channel, diff) in demuxed.channel_updates {
                occupancy.apply(&channel, diff);
            }
        }

        for batch in demuxed.updates {
            if let Err(e) = self.apply_batch(batch).await {
                error!("{e}");
            }
        }

        for session in demuxed.sign_outs {
            self.sign_out(session).await;
        }

        replies
    }

    async fn session_issued(&self, session: SessionId) {
        let replaced = {
            let mut channels = self.channels.lock().await;
            let previous = channels.session().cloned();
            if previous.as_ref() == Some(&session) {
                return;
            }
            let commands = channels.session_issued(session.clone());
            info!("Session {session} issued, {} channel(s) to subscribe", commands.len());
            for command in commands {
                self.dispatch(command);
            }
            previous
        };

        self.status.send_modify(|s| s.session_id = Some(session.clone()));
        if let Some(previous) = replaced {
            info!("Session {previous} replaced by {session}");
            self.emit(SyncEvent::SessionReset);
        }
        self.emit(SyncEvent::SessionIssued(session));
    }

    async fn apply_batch(&self, batch: UpdateBatch) -> Result<ReconcileReport, ReconcileError> {
        let result = {
            let mut store = self.store.write().await;
            reconcile(&mut store, batch)
        };
        match &result {
            Ok(report) => self.announce(report),
            Err(e) => self.emit(SyncEvent::ReconcileFault { message: e.to_string() }),
        }
        result
    }

    fn announce(&self, report: &ReconcileReport) {
        if !report.kinds.is_empty() {
            self.emit(SyncEvent::EntitiesChanged {
                kinds: report.kinds.iter().copied().collect(),
            });
        }
        if !report.presence_projects.is_empty() {
            self.emit(SyncEvent::PresenceChanged {
                projects: report.presence_projects.iter().copied().collect(),
            });
        }
        if !report.change_targets.is_empty() {
            self.emit(SyncEvent::ChangesUpdated {
                targets: report.change_targets.iter().copied().collect(),
            });
        }
    }

    async fn sign_out(&self, session: HttpSession) {
        let mut auth = self.auth.lock().await;
        if auth.map(|a| a.http_session_id) != Some(session.id) {
            return;
        }
        *auth = None;
        self.channels.lock().await.sign_out();
        info!("HTTP session {} signed out", session.id);
        self.emit(SyncEvent::SignedOut);
    }
}

#[async_trait]
impl FrameHandler for Shared {
    async fn on_open(&self) {
        self.emit(SyncEvent::Connected);
    }

    async fn on_frame(&self, text: &str) -> Vec<WsMessage> {
        self.process_frame(text).await
    }

    async fn on_closed(&self) {
        let lost = self.channels.lock().await.session_lost();
        self.status.send_modify(|s| s.session_id = None);
        self.emit(SyncEvent::Disconnected);
        if let Some(session) = lost {
            info!("Session {session} reset");
            self.emit(SyncEvent::SessionReset);
        }
    }
}

/// Handle to the synchronization core of one client process.
pub struct SyncClient {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (shutdown_tx, _) = watch::channel(false);
        let (commands, command_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                config,
                collaborators,
                store: RwLock::new(Store::new()),
                channels: Arc::new(Mutex::new(ChannelRegistry::new())),
                occupancy: RwLock::new(ChannelOccupancy::new()),
                status: Arc::new(status),
                events,
                auth: Mutex::new(None),
                commands,
                command_rx: std::sync::Mutex::new(Some(command_rx)),
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Spawn the connection task. Calling it while the task runs is a no-op.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.shutdown_tx.send_replace(false);
        let handler: Arc<dyn FrameHandler> = self.shared.clone();
        let manager = ConnectionManager::new(
            self.shared.config.clone(),
            handler,
            Arc::clone(&self.shared.status),
            self.shutdown_tx.subscribe(),
        );
        *task = Some(tokio::spawn(manager.run()));
    }

    /// Close the transport and wait for the connection task to finish.
    /// The cache is kept.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.shutdown_tx.send_replace(true);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| SyncError::Task(e.to_string()))?;
        }
        Ok(())
    }

    /// Record the signed-in user and keep Broadcast and `User(user_id)`
    /// subscribed across reconnects.
    pub async fn authenticate(&self, user_id: EntityId, http_session_id: EntityId) {
        *self.shared.auth.lock().await = Some(Authentication {
            user_id,
            http_session_id,
        });
        self.subscribe(Channel::Broadcast, Retention::Sticky).await;
        self.subscribe(Channel::User(user_id), Retention::Sticky).await;
    }

    pub async fn subscribe(&self, channel: Channel, retention: Retention) -> SubscribeOutcome {
        let mut channels = self.shared.channels.lock().await;
        let outcome = channels.subscribe(channel, retention);
        if let SubscribeOutcome::Issued(command) = &outcome {
            self.shared.dispatch(command.clone());
        }
        outcome
    }

    /// Returns `true` if an unsubscribe request was sent.
    pub async fn unsubscribe(&self, channel: Channel) -> bool {
        let mut channels = self.shared.channels.lock().await;
        match channels.unsubscribe(channel) {
            Some(command) => {
                self.shared.dispatch(command);
                true
            }
            None => false,
        }
    }

    pub async fn is_subscribed(&self, channel: Channel) -> bool {
        self.shared.channels.lock().await.is_subscribed(channel)
    }

    pub async fn get_entity(&self, kind: EntityKind, id: EntityId) -> Option<Arc<Entity>> {
        self.shared.store.read().await.cache.get(kind, id)
    }

    pub async fn get_children(&self, index: IndexName, parent: EntityId) -> Vec<Arc<Entity>> {
        self.shared.store.read().await.cache.children_entities(index, parent)
    }

    /// Cached entity, fetched through the fetch collaborator on a miss.
    /// Returns `Ok(None)` while another fetch of the same key is in flight.
    pub async fn get_or_fetch(&self, kind: EntityKind, id: EntityId) -> Result<Option<Arc<Entity>>, SyncError> {
        {
            let mut store = self.shared.store.write().await;
            if let Some(entity) = store.cache.get(kind, id) {
                return Ok(Some(entity));
            }
            if !store.cache.begin_entity_load(kind, id) {
                return Ok(None);
            }
        }

        let fetched = match self.shared.collaborators.fetch.fetch_entity(kind, id).await {
            Ok(value) => self.shared.apply_batch(UpdateBatch::upserts(vec![value])).await.map_err(SyncError::from),
            Err(e) => Err(SyncError::from(e)),
        };

        let mut store = self.shared.store.write().await;
        store.cache.finish_entity_load(kind, id, fetched.is_ok());
        fetched?;
        Ok(store.cache.get(kind, id))
    }

    /// Children of a parent, fetching the collection once if it was never loaded.
    pub async fn fetch_children(&self, index: IndexName, parent: EntityId) -> Result<Vec<Arc<Entity>>, SyncError> {
        if !self.shared.store.write().await.cache.begin_collection_load(index, parent) {
            return Ok(self.get_children(index, parent).await);
        }

        let fetched = match self.shared.collaborators.fetch.fetch_collection(index, parent).await {
            Ok(values) => self.shared.apply_batch(UpdateBatch::upserts(values)).await.map_err(SyncError::from),
            Err(e) => Err(SyncError::from(e)),
        };

        let mut store = self.shared.store.write().await;
        store.cache.finish_collection_load(index, parent, fetched.is_ok());
        fetched?;
        Ok(store.cache.children_entities(index, parent))
    }

    /// Presence of a project, without this connection's own entry.
    pub async fn get_presence(&self, project_id: EntityId) -> Vec<UserPresence> {
        let own = self.session_id().await;
        let store = self.shared.store.read().await;
        store.presence.list(project_id, own.as_ref().map(SessionId::as_str))
    }

    pub async fn get_pending_changes(&self, kind: EntityKind, id: EntityId) -> Vec<PendingChange> {
        let store = self.shared.store.read().await;
        store
            .changes
            .changes(ChangeTarget::new(kind, id))
            .into_iter()
            .cloned()
            .collect()
    }

    /// Submit a local edit and queue it under the revision the server assigned.
    pub async fn submit_change(&self, kind: EntityKind, id: EntityId, payload: Value) -> Result<Revision, SyncError> {
        let target = ChangeTarget::new(kind, id);
        let revision = self.shared.collaborators.changes.submit_change(target, &payload).await?;
        self.shared
            .store
            .write()
            .await
            .changes
            .apply(PendingChange::local(target, revision.clone(), payload));
        self.shared.emit(SyncEvent::ChangesUpdated { targets: vec![target] });
        Ok(revision)
    }

    pub async fn acknowledge_change(&self, kind: EntityKind, id: EntityId, revision: &Revision) -> bool {
        let target = ChangeTarget::new(kind, id);
        let removed = self.shared.store.write().await.changes.remove(target, revision).is_some();
        if removed {
            self.shared.emit(SyncEvent::ChangesUpdated { targets: vec![target] });
        }
        removed
    }

    pub async fn flush_changes(&self, kind: EntityKind, id: EntityId) -> usize {
        let target = ChangeTarget::new(kind, id);
        let flushed = self.shared.store.write().await.changes.flush_all(target);
        if flushed > 0 {
            self.shared.emit(SyncEvent::ChangesUpdated { targets: vec![target] });
        }
        flushed
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub async fn channel_occupancy(&self) -> BTreeMap<String, i64> {
        self.shared.occupancy.read().await.snapshot()
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.shared.channels.lock().await.session().cloned()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Feed one inbound text frame through the dispatcher. Returns the
    /// replies the transport should send back.
    pub async fn process_frame(&self, text: &str) -> Vec<WsMessage> {
        self.shared.process_frame(text).await
    }
}

/// Send channel commands one at a time and settle each outcome in the
/// registry. Ends once the client is gone.
async fn run_channel_commands(
    api: Arc<dyn ChannelApi>,
    registry: Arc<Mutex<ChannelRegistry>>,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
) {
    while let Some(command) = commands.recv().await {
        let result = match &command {
            ChannelCommand::Subscribe { channel, session } => api.subscribe(channel, session).await,
            ChannelCommand::Unsubscribe { channel, session } => api.unsubscribe(channel, session).await,
        };
        if let Err(e) = &result {
            warn!("{command:?} failed: {e}");
        }
        if registry.lock().await.settle(&command, result.is_ok()) {
            debug!("Rolled back subscribe to {}", command.channel());
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
