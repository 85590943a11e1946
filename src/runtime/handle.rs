use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    change::{AnyEntity, LocalChange},
    config::SyncConfig,
    core::document::{Document, StoreError, apply_change},
    entity::EntityRef,
    history::engine::HistoryEngine,
    op::{CountDelta, Operation, OperationBody, Session, operations_for},
    persist::QueueStore,
    sync::{
        dispatcher::{Reconciliation, SyncDispatcher},
        notify::{Notifier, TracingNotifier},
        queue::{EnqueueOutcome, OperationQueue},
        transport::{BatchResponse, Transport, TransportError},
    },
    types::{Clock, EntityId, EntityKey, SystemClock},
};

use super::events::SyncEvent;

/// Failure of a runtime call.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A local write was rejected by the store.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The actor has stopped.
    #[error("runtime channel closed")]
    ChannelClosed,
}

/// Collaborators injected into the actor.
pub struct SyncDeps {
    /// Durable backing of the operation queue.
    pub queue_store: Box<dyn QueueStore>,
    /// Remote batch endpoint.
    pub transport: Arc<dyn Transport>,
    /// Banner sink.
    pub notifier: Arc<dyn Notifier>,
    /// Time source for operation timestamps.
    pub clock: Arc<dyn Clock>,
}

impl SyncDeps {
    /// Dependencies with a logging notifier and the system clock.
    pub fn new(queue_store: Box<dyn QueueStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            queue_store,
            transport,
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Result of [`SpaceSyncHandle::flush`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing to send, or the session cannot send.
    Idle,
    /// A batch was already in flight.
    AlreadySending,
    /// A batch was sent and reconciled.
    Completed(Reconciliation),
}

/// Point-in-time view of the actor's queue and history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Operations waiting in the queue.
    pub pending: usize,
    /// Operations in flight.
    pub sending: usize,
    /// Operations parked after a critical failure.
    pub rejected: usize,
    /// Whether the could-not-save indicator is raised.
    pub could_not_save: bool,
    /// History pointer.
    pub history_pointer: usize,
    /// Patch sets held.
    pub history_len: usize,
    /// Whether history is paused.
    pub history_paused: bool,
}

/// Cloneable handle to a running space actor.
#[derive(Clone)]
pub struct SpaceSyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SyncEvent>,
}

enum Command {
    Apply {
        changes: Vec<LocalChange>,
        resp: oneshot::Sender<Result<Vec<LocalChange>, RuntimeError>>,
    },
    ApplyRemote {
        changes: Vec<LocalChange>,
        resp: oneshot::Sender<usize>,
    },
    LoadSpace {
        document: Document,
        keep_history: bool,
        resp: oneshot::Sender<()>,
    },
    Undo {
        resp: oneshot::Sender<Vec<LocalChange>>,
    },
    Redo {
        resp: oneshot::Sender<Vec<LocalChange>>,
    },
    PauseHistory {
        resp: oneshot::Sender<()>,
    },
    ResumeHistory {
        resp: oneshot::Sender<bool>,
    },
    Get {
        key: EntityKey,
        resp: oneshot::Sender<Option<AnyEntity>>,
    },
    Snapshot {
        resp: oneshot::Sender<Document>,
    },
    PendingOperations {
        resp: oneshot::Sender<Vec<Operation>>,
    },
    Status {
        resp: oneshot::Sender<SyncStatus>,
    },
    SetOnline {
        online: bool,
        resp: oneshot::Sender<()>,
    },
    UpdateSession {
        session: Session,
        resp: oneshot::Sender<()>,
    },
    AdjustCardsCreated {
        delta: i64,
        raw: bool,
        resp: oneshot::Sender<()>,
    },
    Enqueue {
        body: OperationBody,
        resp: oneshot::Sender<()>,
    },
    Flush {
        resp: oneshot::Sender<FlushOutcome>,
    },
    RetryRejected {
        resp: oneshot::Sender<usize>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

type SendResult = Result<BatchResponse, TransportError>;

struct Actor {
    document: Document,
    session: Session,
    queue: OperationQueue,
    dispatcher: SyncDispatcher,
    history: HistoryEngine,
    touched: Vec<EntityKey>,
    debounce_deadline: Option<Instant>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    events_tx: broadcast::Sender<SyncEvent>,
    done_tx: mpsc::UnboundedSender<SendResult>,
}

/// Spawns the actor that owns `document` and its pending operations.
///
/// Local writes are recorded in history and queued. The queue is sent
/// `debounce_ms` after the last write, and again on every retry tick.
/// Operations restored from the queue store are sent after the first
/// debounce period.
pub fn spawn_space_sync(
    document: Document,
    session: Session,
    deps: SyncDeps,
    config: SyncConfig,
) -> SpaceSyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_channel_bound.max(1));
    let (events_tx, _) = broadcast::channel::<SyncEvent>(config.event_channel_bound.max(1));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SendResult>();

    let SyncDeps {
        queue_store,
        transport,
        notifier,
        clock,
    } = deps;

    let mut actor = Actor {
        document,
        session,
        queue: OperationQueue::open(queue_store),
        dispatcher: SyncDispatcher::new(&config),
        history: HistoryEngine::new(config.max_patch_sets),
        touched: Vec::new(),
        debounce_deadline: None,
        transport,
        notifier,
        clock,
        config,
        events_tx: events_tx.clone(),
        done_tx,
    };
    if !actor.queue.is_empty() {
        actor.arm_debounce();
    }

    tokio::spawn(async move {
        let period = actor.config.retry_interval().max(Duration::from_secs(1));
        let mut retry = tokio::time::interval_at(Instant::now() + period, period);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = actor.debounce_deadline;
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if actor.handle_command(cmd, &mut done_rx).await {
                        break;
                    }
                }
                Some(result) = done_rx.recv() => {
                    actor.finish_send(result);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    actor.debounce_deadline = None;
                    actor.start_send();
                }
                _ = retry.tick() => {
                    actor.start_send();
                }
            }
        }
        debug!("space sync actor stopped");
    });

    SpaceSyncHandle { cmd_tx, events_tx }
}

impl Actor {
    async fn handle_command(
        &mut self,
        cmd: Command,
        done_rx: &mut mpsc::UnboundedReceiver<SendResult>,
    ) -> bool {
        match cmd {
            Command::Apply { changes, resp } => {
                let applied = self.history.apply_and_record(&mut self.document, &changes);
                if self.history.is_paused() {
                    for key in &applied.touched {
                        if !self.touched.contains(key) {
                            self.touched.push(key.clone());
                        }
                    }
                }
                self.publish_local(&applied.written);
                let _ = resp.send(applied.into_result().map_err(RuntimeError::from));
            }
            Command::ApplyRemote { changes, resp } => {
                let mut applied = 0;
                for change in &changes {
                    match apply_change(&mut self.document, change) {
                        Ok(written) => {
                            applied += 1;
                            for w in &written {
                                self.emit(SyncEvent::Changed { key: w.key() });
                            }
                        }
                        Err(err) => debug!(error = %err, "skipping remote change"),
                    }
                }
                let _ = resp.send(applied);
            }
            Command::LoadSpace {
                document,
                keep_history,
                resp,
            } => {
                self.document = document;
                if keep_history {
                    let written = self.history.reapply_local(&mut self.document);
                    for w in &written {
                        self.emit(SyncEvent::Changed { key: w.key() });
                    }
                } else {
                    self.history.clear();
                    self.touched.clear();
                }
                info!(entities = self.document.len(), keep_history, "space loaded");
                self.emit(SyncEvent::SpaceLoaded);
                let _ = resp.send(());
            }
            Command::Undo { resp } => {
                let written = self.history.undo(&mut self.document);
                if !written.is_empty() {
                    self.publish_local(&written);
                    self.emit(SyncEvent::UndoApplied);
                }
                let _ = resp.send(written);
            }
            Command::Redo { resp } => {
                let written = self.history.redo(&mut self.document);
                if !written.is_empty() {
                    self.publish_local(&written);
                    self.emit(SyncEvent::RedoApplied);
                }
                let _ = resp.send(written);
            }
            Command::PauseHistory { resp } => {
                if !self.history.is_paused() {
                    self.touched.clear();
                }
                self.history.pause(&self.document);
                let _ = resp.send(());
            }
            Command::ResumeHistory { resp } => {
                let touched = std::mem::take(&mut self.touched);
                let recorded = self.history.resume(&self.document, &touched);
                let _ = resp.send(recorded);
            }
            Command::Get { key, resp } => {
                let _ = resp.send(self.document.get_any(&key));
            }
            Command::Snapshot { resp } => {
                let _ = resp.send(self.document.clone());
            }
            Command::PendingOperations { resp } => {
                let _ = resp.send(self.queue.operations().to_vec());
            }
            Command::Status { resp } => {
                let _ = resp.send(SyncStatus {
                    pending: self.queue.len(),
                    sending: self.dispatcher.sending().len(),
                    rejected: self.dispatcher.rejected().count(),
                    could_not_save: self.dispatcher.could_not_save(),
                    history_pointer: self.history.pointer(),
                    history_len: self.history.len(),
                    history_paused: self.history.is_paused(),
                });
            }
            Command::SetOnline { online, resp } => {
                let was_online = std::mem::replace(&mut self.session.is_online, online);
                if online && !was_online {
                    info!(pending = self.queue.len(), "back online");
                    if !self.queue.is_empty() {
                        self.arm_debounce();
                    }
                }
                let _ = resp.send(());
            }
            Command::UpdateSession { session, resp } => {
                self.session = session;
                if self.session.can_send() && !self.queue.is_empty() {
                    self.arm_debounce();
                }
                let _ = resp.send(());
            }
            Command::AdjustCardsCreated { delta, raw, resp } => {
                if self.session.is_signed_in() {
                    let delta = CountDelta { delta };
                    self.enqueue(if raw {
                        OperationBody::UpdateUserCardsCreatedCountRaw(delta)
                    } else {
                        OperationBody::UpdateUserCardsCreatedCount(delta)
                    });
                }
                let _ = resp.send(());
            }
            Command::Enqueue { body, resp } => {
                if self.session.is_signed_in() {
                    self.enqueue(body);
                } else {
                    debug!(name = %body.kind(), "signed out; not queueing operation");
                }
                let _ = resp.send(());
            }
            Command::Flush { resp } => {
                let outcome = if self.dispatcher.is_sending() {
                    FlushOutcome::AlreadySending
                } else {
                    match self.dispatcher.begin_send(&mut self.queue, &self.session) {
                        None => FlushOutcome::Idle,
                        Some(batch) => {
                            self.debounce_deadline = None;
                            self.emit(SyncEvent::SendStarted {
                                count: batch.operations.len(),
                            });
                            let result = self.transport.send(&batch, &self.session).await;
                            FlushOutcome::Completed(self.finish_send(result))
                        }
                    }
                };
                let _ = resp.send(outcome);
            }
            Command::RetryRejected { resp } => {
                let count = self.dispatcher.retry_rejected(&mut self.queue);
                if count > 0 {
                    self.arm_debounce();
                }
                let _ = resp.send(count);
            }
            Command::Shutdown { resp } => {
                if self.dispatcher.is_sending() {
                    if let Some(result) = done_rx.recv().await {
                        self.finish_send(result);
                    }
                }
                let _ = resp.send(());
                return true;
            }
        }

        false
    }

    fn publish_local(&mut self, written: &[LocalChange]) {
        for change in written {
            self.emit(SyncEvent::Changed { key: change.key() });
        }
        if !self.session.is_signed_in() {
            debug!(writes = written.len(), "signed out; not queueing operations");
            return;
        }
        for change in written {
            for body in operations_for(change) {
                self.enqueue(body);
            }
        }
    }

    fn enqueue(&mut self, body: OperationBody) {
        let op = Operation::new(body, &self.session, self.clock.as_ref());
        self.emit(SyncEvent::LocalOperation(op.clone()));
        if self.queue.enqueue(op) != EnqueueOutcome::Rejected {
            self.arm_debounce();
        }
    }

    fn arm_debounce(&mut self) {
        self.debounce_deadline = Some(Instant::now() + self.config.debounce());
    }

    fn start_send(&mut self) {
        let Some(batch) = self.dispatcher.begin_send(&mut self.queue, &self.session) else {
            return;
        };
        self.emit(SyncEvent::SendStarted {
            count: batch.operations.len(),
        });

        let transport = Arc::clone(&self.transport);
        let session = self.session.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = transport.send(&batch, &session).await;
            let _ = done_tx.send(result);
        });
    }

    fn finish_send(&mut self, result: SendResult) -> Reconciliation {
        let rec = self.dispatcher.complete(&mut self.queue, result);
        self.emit(SyncEvent::SendCompleted {
            delivered: rec.delivered,
            requeued: rec.requeued,
            rejected: rec.rejected.len(),
        });
        for notification in &rec.notifications {
            self.notifier.notify(notification);
            self.emit(SyncEvent::Notified(notification.clone()));
        }
        // Writes that arrived while the batch was in flight.
        if rec.succeeded && !self.queue.is_empty() {
            self.arm_debounce();
        }
        if !rec.succeeded {
            warn!(
                requeued = rec.requeued,
                rejected = rec.rejected.len(),
                "batch not fully applied; waiting for retry tick"
            );
        }
        rec
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl SpaceSyncHandle {
    /// Subscribes to the actor's events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Applies a local user action: writes it, records it for undo, and
    /// queues its operations. Returns every write made, derived ones
    /// included.
    pub async fn apply(&self, changes: Vec<LocalChange>) -> Result<Vec<LocalChange>, RuntimeError> {
        self.request(|resp| Command::Apply { changes, resp }).await?
    }

    /// Applies writes received from collaborators. They are neither recorded
    /// nor queued. Returns how many were applied; the rest are skipped.
    pub async fn apply_remote(&self, changes: Vec<LocalChange>) -> Result<usize, RuntimeError> {
        self.request(|resp| Command::ApplyRemote { changes, resp }).await
    }

    /// Replaces the contents with a different space and resets history.
    pub async fn load_space(&self, document: Document) -> Result<(), RuntimeError> {
        self.request(|resp| Command::LoadSpace {
            document,
            keep_history: false,
            resp,
        })
        .await
    }

    /// Replaces the contents with a fresh copy of the same space and layers
    /// the applied history back on top.
    pub async fn refresh_space(&self, document: Document) -> Result<(), RuntimeError> {
        self.request(|resp| Command::LoadSpace {
            document,
            keep_history: true,
            resp,
        })
        .await
    }

    /// Undoes one patch set and returns the writes made.
    pub async fn undo(&self) -> Result<Vec<LocalChange>, RuntimeError> {
        self.request(|resp| Command::Undo { resp }).await
    }

    /// Redoes one patch set and returns the writes made.
    pub async fn redo(&self) -> Result<Vec<LocalChange>, RuntimeError> {
        self.request(|resp| Command::Redo { resp }).await
    }

    /// Pauses history before a multi-step gesture.
    pub async fn pause_history(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::PauseHistory { resp }).await
    }

    /// Resumes history after a gesture, recording it as one patch set.
    /// Returns whether a patch set was recorded.
    pub async fn resume_history(&self) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::ResumeHistory { resp }).await
    }

    /// Current value of one entity.
    pub async fn get(&self, key: EntityKey) -> Result<Option<AnyEntity>, RuntimeError> {
        self.request(|resp| Command::Get { key, resp }).await
    }

    /// Clone of the whole document.
    pub async fn snapshot(&self) -> Result<Document, RuntimeError> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    /// Operations waiting in the queue.
    pub async fn pending_operations(&self) -> Result<Vec<Operation>, RuntimeError> {
        self.request(|resp| Command::PendingOperations { resp }).await
    }

    /// Queue, dispatcher, and history counters.
    pub async fn status(&self) -> Result<SyncStatus, RuntimeError> {
        self.request(|resp| Command::Status { resp }).await
    }

    /// Records connectivity; coming back online schedules a send.
    pub async fn set_online(&self, online: bool) -> Result<(), RuntimeError> {
        self.request(|resp| Command::SetOnline { online, resp }).await
    }

    /// Replaces the session used for new operations and sends.
    pub async fn update_session(&self, session: Session) -> Result<(), RuntimeError> {
        self.request(|resp| Command::UpdateSession { session, resp }).await
    }

    /// Queues an adjustment of the user's cards-created counter.
    pub async fn adjust_cards_created(&self, delta: i64) -> Result<(), RuntimeError> {
        self.request(|resp| Command::AdjustCardsCreated {
            delta,
            raw: false,
            resp,
        })
        .await
    }

    /// Queues an adjustment of the user's raw cards-created counter.
    pub async fn adjust_cards_created_raw(&self, delta: i64) -> Result<(), RuntimeError> {
        self.request(|resp| Command::AdjustCardsCreated {
            delta,
            raw: true,
            resp,
        })
        .await
    }

    /// Queues permanent deletion of a card that is already removed locally.
    pub async fn delete_removed_card(&self, id: impl Into<EntityId>) -> Result<(), RuntimeError> {
        let body = OperationBody::DeleteCard(EntityRef { id: id.into() });
        self.request(|resp| Command::Enqueue { body, resp }).await
    }

    /// Queues permanent deletion of every removed card in the space.
    pub async fn delete_all_removed_cards(&self) -> Result<(), RuntimeError> {
        let body = OperationBody::DeleteAllRemovedCards;
        self.request(|resp| Command::Enqueue { body, resp }).await
    }

    /// Sends the queue now, waiting for the result.
    pub async fn flush(&self) -> Result<FlushOutcome, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await
    }

    /// Moves operations rejected by the server back into the queue.
    pub async fn retry_rejected(&self) -> Result<usize, RuntimeError> {
        self.request(|resp| Command::RetryRejected { resp }).await
    }

    /// Waits for an in-flight send, then stops the actor.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }
}
