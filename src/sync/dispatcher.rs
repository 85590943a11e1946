use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::{debug, error, info, warn};

use crate::{
    config::SyncConfig,
    op::{Operation, OperationIdentity, Session},
};

use super::{
    notify::Notification,
    queue::{OperationQueue, RequeuePosition},
    squash::squash,
    transport::{BatchResponse, OperationBatch, OperationError, Transport, TransportError},
};

/// Whether a batch is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A batch was handed out by [`SyncDispatcher::begin_send`] and has not
    /// been completed yet.
    Sending,
}

/// What [`SyncDispatcher::complete`] did with the in-flight batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Operations the server applied.
    pub delivered: usize,
    /// Operations put back at the front of the queue.
    pub requeued: usize,
    /// Operations parked as rejected by this completion.
    pub rejected: Vec<Operation>,
    /// True when every operation of the batch was applied.
    pub succeeded: bool,
    /// Banners to show, in order.
    pub notifications: Vec<Notification>,
}

/// Drains the queue into one batch at a time and reconciles the result.
///
/// The dispatcher never performs I/O itself except through [`Self::flush`];
/// callers that run the request elsewhere pair [`Self::begin_send`] with
/// [`Self::complete`].
#[derive(Debug)]
pub struct SyncDispatcher {
    state: DispatchState,
    sending: Vec<Operation>,
    could_not_save: bool,
    rejected: VecDeque<Operation>,
    failures: HashMap<OperationIdentity, u32>,
    config: SyncConfig,
}

impl Default for SyncDispatcher {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

impl SyncDispatcher {
    /// Idle dispatcher using the statuses and bounds from `config`.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: DispatchState::Idle,
            sending: Vec::new(),
            could_not_save: false,
            rejected: VecDeque::new(),
            failures: HashMap::new(),
            config: config.clone(),
        }
    }

    /// Current state.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// True while a batch is in flight.
    pub fn is_sending(&self) -> bool {
        self.state == DispatchState::Sending
    }

    /// The in-flight batch; empty when idle.
    pub fn sending(&self) -> &[Operation] {
        &self.sending
    }

    /// True while the could-not-save indicator is raised.
    ///
    /// Stays raised while any operation sits in the rejected list.
    pub fn could_not_save(&self) -> bool {
        self.could_not_save
    }

    /// Operations dropped after a critical failure, oldest first.
    pub fn rejected(&self) -> impl Iterator<Item = &Operation> {
        self.rejected.iter()
    }

    /// Removes and returns every rejected operation.
    pub fn take_rejected(&mut self) -> Vec<Operation> {
        self.rejected.drain(..).collect()
    }

    /// Moves every rejected operation back to the end of `queue` and returns
    /// how many were moved.
    pub fn retry_rejected(&mut self, queue: &mut OperationQueue) -> usize {
        let ops = self.take_rejected();
        let count = ops.len();
        if count > 0 {
            info!(count, "retrying rejected operations");
            queue.requeue(ops, RequeuePosition::Back);
        }
        count
    }

    /// Squashes the whole queue into a batch and enters [`DispatchState::Sending`].
    ///
    /// Returns `None`, leaving everything untouched, when a batch is already
    /// in flight, the session cannot send, or the queue is empty.
    pub fn begin_send(
        &mut self,
        queue: &mut OperationQueue,
        session: &Session,
    ) -> Option<OperationBatch> {
        if self.is_sending() {
            debug!("send already in flight");
            return None;
        }
        if !session.can_send() || queue.is_empty() {
            return None;
        }

        let operations = squash(queue.dequeue_all());
        debug!(count = operations.len(), "sending operations");
        self.sending = operations.clone();
        self.state = DispatchState::Sending;
        Some(OperationBatch { operations })
    }

    /// Reconciles the in-flight batch with `result` and returns to
    /// [`DispatchState::Idle`].
    pub fn complete(
        &mut self,
        queue: &mut OperationQueue,
        result: Result<BatchResponse, TransportError>,
    ) -> Reconciliation {
        let mut out = Reconciliation::default();
        if !self.is_sending() {
            warn!("batch completion without a send in flight");
            return out;
        }
        self.state = DispatchState::Idle;
        let sent = std::mem::take(&mut self.sending);

        match result {
            Ok(BatchResponse::Accepted) => {
                for op in &sent {
                    self.failures.remove(&op.identity());
                }
                out.delivered = sent.len();
            }
            Ok(BatchResponse::Partial(results)) => {
                let errors: HashMap<String, OperationError> = results
                    .into_iter()
                    .filter_map(|r| r.error.map(|e| (r.operation.operation_id, e)))
                    .collect();

                let mut retry = Vec::new();
                for op in sent {
                    let Some(err) = errors.get(&op.operation_id) else {
                        self.failures.remove(&op.identity());
                        out.delivered += 1;
                        continue;
                    };
                    if self.config.is_non_critical(err.status) {
                        warn!(
                            name = %op.kind(),
                            status = err.status,
                            message = %err.message,
                            "non-critical operation failure"
                        );
                        let count = self.failures.entry(op.identity()).or_insert(0);
                        *count += 1;
                        if *count >= self.config.repeated_failure_threshold.max(1) {
                            self.raise_could_not_save(&mut out);
                        }
                        retry.push(op);
                    } else {
                        error!(
                            name = %op.kind(),
                            status = err.status,
                            message = %err.message,
                            "critical operation failure"
                        );
                        self.failures.remove(&op.identity());
                        self.raise_could_not_save(&mut out);
                        out.rejected.push(op);
                    }
                }
                out.requeued = retry.len();
                queue.requeue(retry, RequeuePosition::Front);
                for op in &out.rejected {
                    self.park_rejected(op.clone());
                }
            }
            Err(err) => {
                warn!(error = %err, count = sent.len(), "send failed; requeueing batch");
                out.requeued = sent.len();
                queue.requeue(sent, RequeuePosition::Front);
                self.raise_could_not_save(&mut out);
            }
        }

        out.succeeded = out.requeued == 0 && out.rejected.is_empty();
        if out.succeeded && self.could_not_save && self.rejected.is_empty() {
            self.could_not_save = false;
            info!("reconnected to server");
            out.notifications.push(Notification::reconnected());
        }
        out
    }

    /// Sends the queue through `transport` and reconciles in one step.
    ///
    /// Returns `None` when [`Self::begin_send`] declined to start a batch.
    pub async fn flush(
        &mut self,
        queue: &mut OperationQueue,
        transport: &dyn Transport,
        session: &Session,
    ) -> Option<Reconciliation> {
        let batch = self.begin_send(queue, session)?;
        let result = transport.send(&batch, session).await;
        Some(self.complete(queue, result))
    }

    fn raise_could_not_save(&mut self, out: &mut Reconciliation) {
        if !self.could_not_save {
            self.could_not_save = true;
            out.notifications.push(Notification::could_not_save());
        }
    }

    fn park_rejected(&mut self, op: Operation) {
        self.rejected.push_back(op);
        while self.rejected.len() > self.config.max_rejected {
            if let Some(dropped) = self.rejected.pop_front() {
                warn!(
                    name = %dropped.kind(),
                    operation_id = %dropped.operation_id,
                    "rejected list full; discarding oldest"
                );
            }
        }
    }
}
