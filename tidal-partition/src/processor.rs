//! The partition processor actor.
//!
//! One tokio task owns all state of one partition: the consumer registry,
//! the transaction queue, and the write batcher. Requests arrive on a
//! command channel; events leave on an event channel. The only async
//! boundary is the storage write, which runs as a detached task and reports
//! back through an internal completion channel, so at most one physical
//! write is outstanding at any time.
//!
//! # Message flow
//!
//! 1. Proxy requests (`CreateSession`, `SetOffset`, `GetOffset`) mutate the
//!    in-memory registry, stage their mutations and responses into the open
//!    batch, and release in request order when the batch is durable.
//! 2. `CalcPredicate` votes eagerly against provisional state and reports
//!    without waiting for storage.
//! 3. `Commit` applies at the queue head (buffered until then); `Rollback`
//!    removes from any position. Both persist the resolution mark.
//!
//! Storage failures and coordinator protocol violations are fatal: the run
//! loop exits, the event channel closes, and the supervisor restarts the
//! partition through recovery.

use std::sync::Arc;

use tidal_core::{Cookie, Limits, Offset, PartitionId, PlanStep, TxId, TxKey};
use tidal_storage::{checkpoint_key, tx_meta_key, LogStore, StorageResult, TxMetaRecord};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{AdvanceStatus, ErrorCode, PartitionEvent, PartitionRequest};
use crate::batcher::{FlushAction, WriteBatcher};
use crate::checkpoint::ConsumerRegistry;
use crate::error::{PartitionError, PartitionResult};
use crate::recovery::RecoveryLoader;
use crate::txqueue::{CommitDisposition, RollbackDisposition, TransactionQueue, TxOperation};

/// Configuration for a partition processor.
#[derive(Debug, Clone, Copy)]
pub struct PartitionProcessorConfig {
    /// Command and event channel capacity.
    pub channel_capacity: usize,
    /// Resource limits.
    pub limits: Limits,
}

impl PartitionProcessorConfig {
    /// Small channels for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            channel_capacity: 64,
            limits: Limits::new(),
        }
    }
}

impl Default for PartitionProcessorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            limits: Limits::new(),
        }
    }
}

/// A transaction that was unresolved when the previous epoch ended.
///
/// The owning tablet persists transaction bodies in its own key space and
/// supplies them back at spawn time, in coordinator order. A transaction
/// whose vote was reported before the crash carries `predicate =
/// Some(..)`; one whose vote was lost carries `None` and is re-validated.
#[derive(Debug, Clone)]
pub struct RecoveredTransaction {
    /// Coordinator ordering key.
    pub key: TxKey,
    /// Offset ranges to advance on commit.
    pub operations: Vec<TxOperation>,
    /// The vote reported before the crash, if it survived.
    pub predicate: Option<bool>,
}

/// Handle for sending requests to a partition processor.
#[derive(Clone)]
pub struct PartitionHandle {
    tx: mpsc::Sender<PartitionRequest>,
    partition: PartitionId,
}

impl PartitionHandle {
    /// The partition this handle addresses.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }

    async fn send(&self, request: PartitionRequest) -> PartitionResult<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| PartitionError::ProcessorShutdown)
    }

    /// Registers (or replaces) a consumer's reader session.
    ///
    /// # Errors
    /// Returns an error if the processor has shut down.
    pub async fn create_session(
        &self,
        cookie: Cookie,
        consumer: impl Into<String>,
        session: impl Into<String>,
        generation: u64,
        step: u64,
    ) -> PartitionResult<()> {
        self.send(PartitionRequest::CreateSession {
            cookie,
            consumer: consumer.into(),
            session: session.into(),
            generation,
            step,
        })
        .await
    }

    /// Advances a consumer's committed offset.
    ///
    /// # Errors
    /// Returns an error if the processor has shut down.
    pub async fn set_offset(
        &self,
        cookie: Cookie,
        consumer: impl Into<String>,
        offset: Offset,
        session: impl Into<String>,
    ) -> PartitionResult<()> {
        self.send(PartitionRequest::SetOffset {
            cookie,
            consumer: consumer.into(),
            offset,
            session: session.into(),
        })
        .await
    }

    /// Reads a consumer's committed offset.
    ///
    /// # Errors
    /// Returns an error if the processor has shut down.
    pub async fn get_offset(
        &self,
        cookie: Cookie,
        consumer: impl Into<String>,
    ) -> PartitionResult<()> {
        self.send(PartitionRequest::GetOffset {
            cookie,
            consumer: consumer.into(),
        })
        .await
    }

    /// Requests a commit/abort vote for a distributed transaction.
    ///
    /// # Errors
    /// Returns an error if the processor has shut down.
    pub async fn calc_predicate(
        &self,
        step: PlanStep,
        tx_id: TxId,
        operations: Vec<TxOperation>,
    ) -> PartitionResult<()> {
        self.send(PartitionRequest::CalcPredicate {
            step,
            tx_id,
            operations,
        })
        .await
    }

    /// Delivers the coordinator's commit decision.
    ///
    /// # Errors
    /// Returns an error if the processor has shut down.
    pub async fn commit(&self, step: PlanStep, tx_id: TxId) -> PartitionResult<()> {
        self.send(PartitionRequest::Commit { step, tx_id }).await
    }

    /// Delivers the coordinator's abort decision.
    ///
    /// # Errors
    /// Returns an error if the processor has shut down.
    pub async fn rollback(&self, step: PlanStep, tx_id: TxId) -> PartitionResult<()> {
        self.send(PartitionRequest::Rollback { step, tx_id }).await
    }

    /// Proposes a single-partition immediate offset advance.
    ///
    /// # Errors
    /// Returns an error if the processor has shut down.
    pub async fn propose_advance(
        &self,
        tx_id: TxId,
        consumer: impl Into<String>,
        begin: Offset,
        end: Offset,
    ) -> PartitionResult<()> {
        self.send(PartitionRequest::ProposeAdvance {
            tx_id,
            consumer: consumer.into(),
            begin,
            end,
        })
        .await
    }

    /// Shuts the processor down after draining queued requests.
    ///
    /// # Errors
    /// Returns an error if the processor has already shut down.
    pub async fn shutdown(&self) -> PartitionResult<()> {
        self.send(PartitionRequest::Shutdown).await
    }
}

impl std::fmt::Debug for PartitionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionHandle")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// Spawns a partition processor and returns its handle and event stream.
///
/// The processor recovers persisted state, re-enqueues `pending`
/// transactions (re-validating and reporting any whose vote was lost), and
/// then serves requests until `Shutdown`, a storage failure, or a protocol
/// violation. On a fatal error the event channel closes; the owner restarts
/// the partition by spawning a fresh processor.
#[must_use]
pub fn spawn_partition_processor(
    partition: PartitionId,
    store: Arc<dyn LogStore>,
    pending: Vec<RecoveredTransaction>,
    config: PartitionProcessorConfig,
) -> (PartitionHandle, mpsc::Receiver<PartitionEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
    let (write_done_tx, write_done_rx) = mpsc::channel(config.channel_capacity);

    let processor = PartitionProcessor {
        partition,
        limits: config.limits,
        store,
        cmd_rx,
        event_tx,
        write_done_tx,
        write_done_rx,
        registry: ConsumerRegistry::new(config.limits),
        queue: TransactionQueue::new(config.limits, TxKey::default()),
        batcher: WriteBatcher::new(config.limits),
        log_begin: Offset::new(0),
        log_end: Offset::new(0),
    };

    tokio::spawn(async move {
        if let Err(err) = processor.run(pending).await {
            error!(partition = %partition, error = %err, "partition processor failed");
        }
    });

    let handle = PartitionHandle {
        tx: cmd_tx,
        partition,
    };
    (handle, event_rx)
}

/// The partition processor state.
struct PartitionProcessor {
    partition: PartitionId,
    limits: Limits,
    store: Arc<dyn LogStore>,
    cmd_rx: mpsc::Receiver<PartitionRequest>,
    event_tx: mpsc::Sender<PartitionEvent>,
    /// Completion side of the single outstanding write.
    write_done_tx: mpsc::Sender<(u64, StorageResult<()>)>,
    write_done_rx: mpsc::Receiver<(u64, StorageResult<()>)>,
    registry: ConsumerRegistry,
    queue: TransactionQueue,
    batcher: WriteBatcher,
    log_begin: Offset,
    log_end: Offset,
}

impl PartitionProcessor {
    async fn run(mut self, pending: Vec<RecoveredTransaction>) -> PartitionResult<()> {
        self.recover(pending).await?;
        info!(partition = %self.partition, "partition processor started");

        loop {
            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(PartitionRequest::Shutdown) | None => break,
                        Some(request) => self.handle_request(request).await?,
                    }
                }
                maybe_done = self.write_done_rx.recv() => {
                    // The sender half lives in `self`; the channel never closes.
                    if let Some((cookie, result)) = maybe_done {
                        self.handle_write_done(cookie, result).await?;
                    }
                }
            }
            self.maybe_flush().await;
        }

        info!(partition = %self.partition, "partition processor stopped");
        Ok(())
    }

    async fn recover(&mut self, pending: Vec<RecoveredTransaction>) -> PartitionResult<()> {
        let loader = RecoveryLoader::new(self.partition, self.limits);
        let state = loader.load(self.store.as_ref()).await?;
        self.registry = state.registry;
        self.queue = TransactionQueue::new(self.limits, state.last_resolved);
        self.log_begin = state.log_begin;
        self.log_end = state.log_end;

        for tx in pending {
            if self.queue.is_stale(tx.key) {
                debug!(partition = %self.partition, key = %tx.key, "skipping resolved transaction");
                continue;
            }
            match tx.predicate {
                // The vote survived the crash; the coordinator already has
                // it. Re-enqueue silently.
                Some(predicate) => {
                    self.queue.enqueue(tx.key, tx.operations, predicate)?;
                }
                // The vote was lost; validate against recovered state and
                // report as if the request had just arrived.
                None => {
                    let predicate = self.vote(&tx.operations);
                    self.queue.enqueue(tx.key, tx.operations, predicate)?;
                    self.emit(PartitionEvent::CalcPredicateResult {
                        step: tx.key.plan_step,
                        tx_id: tx.key.tx_id,
                        partition: self.partition,
                        predicate,
                    })
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn handle_request(&mut self, request: PartitionRequest) -> PartitionResult<()> {
        match request {
            PartitionRequest::CreateSession {
                cookie,
                consumer,
                session,
                generation,
                step,
            } => {
                self.handle_create_session(cookie, &consumer, &session, generation, step)
            }
            PartitionRequest::SetOffset {
                cookie,
                consumer,
                offset,
                session,
            } => self.handle_set_offset(cookie, &consumer, offset, &session),
            PartitionRequest::GetOffset { cookie, consumer } => {
                self.handle_get_offset(cookie, &consumer)
            }
            PartitionRequest::CalcPredicate {
                step,
                tx_id,
                operations,
            } => {
                self.handle_calc_predicate(TxKey::new(step, tx_id), operations)
                    .await
            }
            PartitionRequest::Commit { step, tx_id } => {
                self.handle_commit(TxKey::new(step, tx_id))
            }
            PartitionRequest::Rollback { step, tx_id } => {
                self.handle_rollback(TxKey::new(step, tx_id))
            }
            PartitionRequest::ProposeAdvance {
                tx_id,
                consumer,
                begin,
                end,
            } => self.handle_propose_advance(tx_id, &consumer, begin, end),
            PartitionRequest::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_create_session(
        &mut self,
        cookie: Cookie,
        consumer: &str,
        session: &str,
        generation: u64,
        step: u64,
    ) -> PartitionResult<()> {
        match self
            .registry
            .apply_create_session(consumer, session, generation, step)
        {
            Ok(offset) => {
                debug!(
                    partition = %self.partition,
                    consumer,
                    session,
                    offset = offset.get(),
                    "session created"
                );
                self.stage_checkpoint(consumer)?;
                self.batcher
                    .stage_event(PartitionEvent::ProxyResponse { cookie, offset: None })
            }
            Err(err) => self.stage_request_error(cookie, &err),
        }
    }

    fn handle_set_offset(
        &mut self,
        cookie: Cookie,
        consumer: &str,
        offset: Offset,
        session: &str,
    ) -> PartitionResult<()> {
        match self
            .registry
            .apply_set_offset(consumer, offset, session, self.log_end)
        {
            Ok(outcome) => {
                debug!(
                    partition = %self.partition,
                    consumer,
                    requested = offset.get(),
                    stored = outcome.offset.get(),
                    dirty = outcome.dirty,
                    "offset committed"
                );
                if outcome.dirty {
                    self.stage_checkpoint(consumer)?;
                }
                // The response joins the batch FIFO either way, so
                // responses release in request order.
                self.batcher
                    .stage_event(PartitionEvent::ProxyResponse { cookie, offset: None })
            }
            Err(err) => self.stage_request_error(cookie, &err),
        }
    }

    fn handle_get_offset(&mut self, cookie: Cookie, consumer: &str) -> PartitionResult<()> {
        let offset = self.registry.checkpoint(consumer).offset;
        self.batcher.stage_event(PartitionEvent::ProxyResponse {
            cookie,
            offset: Some(offset),
        })
    }

    /// Computes the commit vote for a set of operations against current
    /// provisional state.
    fn vote(&self, operations: &[TxOperation]) -> bool {
        for op in operations {
            if op.consumer.is_empty()
                || op.consumer.len() > self.limits.max_consumer_name_bytes as usize
            {
                return false;
            }
        }
        self.queue
            .compute_predicate(&self.registry, operations, self.log_end)
    }

    async fn handle_calc_predicate(
        &mut self,
        key: TxKey,
        operations: Vec<TxOperation>,
    ) -> PartitionResult<()> {
        // Replayed request for a transaction still in the queue: repeat the
        // recorded vote.
        let predicate = if let Some(recorded) = self.queue.recorded_predicate(key) {
            recorded
        } else if self.queue.is_stale(key) {
            // Resolved before: the safe repeat answer is a refusal.
            false
        } else {
            let predicate = self.vote(&operations);
            match self.queue.enqueue(key, operations, predicate) {
                Ok(()) => predicate,
                Err(err) => {
                    warn!(
                        partition = %self.partition,
                        key = %key,
                        error = %err,
                        "refusing transaction"
                    );
                    false
                }
            }
        };

        debug!(partition = %self.partition, key = %key, predicate, "predicate computed");
        // Votes do not wait for storage; only the commit does.
        self.emit(PartitionEvent::CalcPredicateResult {
            step: key.plan_step,
            tx_id: key.tx_id,
            partition: self.partition,
            predicate,
        })
        .await;
        Ok(())
    }

    fn handle_commit(&mut self, key: TxKey) -> PartitionResult<()> {
        match self.queue.request_commit(key) {
            CommitDisposition::Stale => {
                debug!(partition = %self.partition, key = %key, "replayed commit acknowledged");
                self.batcher.stage_event(PartitionEvent::CommitDone {
                    step: key.plan_step,
                    tx_id: key.tx_id,
                    partition: self.partition,
                })
            }
            CommitDisposition::Unknown => Err(PartitionError::ProtocolViolation {
                key,
                message: "commit for unknown transaction",
            }),
            CommitDisposition::PredicateFalse => Err(PartitionError::ProtocolViolation {
                key,
                message: "commit against a false vote",
            }),
            CommitDisposition::Buffered => self.drain_committable(),
        }
    }

    fn handle_rollback(&mut self, key: TxKey) -> PartitionResult<()> {
        match self.queue.rollback(key) {
            RollbackDisposition::Stale => {
                debug!(partition = %self.partition, key = %key, "replayed rollback ignored");
                Ok(())
            }
            RollbackDisposition::Unknown => Err(PartitionError::ProtocolViolation {
                key,
                message: "rollback for unknown transaction",
            }),
            RollbackDisposition::Removed => {
                info!(partition = %self.partition, key = %key, "transaction rolled back");
                self.stage_tx_meta()?;
                // Removing the head may unblock buffered commits behind it.
                self.drain_committable()
            }
        }
    }

    /// Applies every head transaction whose commit decision has arrived.
    fn drain_committable(&mut self) -> PartitionResult<()> {
        while let Some(tx) = self.queue.take_committable() {
            for op in &tx.operations {
                self.registry.apply_range_advance(&op.consumer, op.end)?;
                self.stage_checkpoint(&op.consumer)?;
            }
            self.stage_tx_meta()?;
            self.batcher.stage_event(PartitionEvent::CommitDone {
                step: tx.key.plan_step,
                tx_id: tx.key.tx_id,
                partition: self.partition,
            })?;
            info!(
                partition = %self.partition,
                key = %tx.key,
                operations = tx.operations.len(),
                "transaction committed"
            );
        }
        Ok(())
    }

    fn handle_propose_advance(
        &mut self,
        tx_id: TxId,
        consumer: &str,
        begin: Offset,
        end: Offset,
    ) -> PartitionResult<()> {
        let status = if begin > end
            || end > self.log_end
            || begin < self.log_begin
            || consumer.is_empty()
        {
            AdvanceStatus::Invalid
        } else if begin != self.queue.provisional_offset(&self.registry, consumer) {
            // The range must start exactly at the (provisional) head: behind
            // it the records were already committed, ahead of it the advance
            // would skip unread records.
            AdvanceStatus::Aborted
        } else {
            self.registry.apply_range_advance(consumer, end)?;
            self.stage_checkpoint(consumer)?;
            AdvanceStatus::Complete
        };
        debug!(
            partition = %self.partition,
            tx_id = %tx_id,
            consumer,
            begin = begin.get(),
            end = end.get(),
            ?status,
            "immediate advance"
        );
        self.batcher
            .stage_event(PartitionEvent::ProposeAdvanceResult { tx_id, status })
    }

    /// Converts a validation failure into an error event for the proxy.
    /// Fatal errors propagate instead.
    fn stage_request_error(
        &mut self,
        cookie: Cookie,
        err: &PartitionError,
    ) -> PartitionResult<()> {
        if err.is_fatal() {
            return Err(err.clone());
        }
        let code = match err {
            PartitionError::SessionMismatch { .. } => ErrorCode::WrongCookie,
            _ => ErrorCode::BadRequest,
        };
        self.batcher.stage_event(PartitionEvent::Error {
            cookie,
            code,
            message: err.to_string(),
        })
    }

    fn stage_checkpoint(&mut self, consumer: &str) -> PartitionResult<()> {
        let record = self.registry.record(consumer);
        self.batcher
            .stage_mutation(checkpoint_key(self.partition, consumer), record.encode()?);
        Ok(())
    }

    fn stage_tx_meta(&mut self) -> PartitionResult<()> {
        let record = TxMetaRecord {
            last_resolved: self.queue.last_resolved(),
        };
        self.batcher
            .stage_mutation(tx_meta_key(self.partition), record.encode()?);
        Ok(())
    }

    /// Flushes the open batch: issues the next physical write, or releases
    /// event-only batches immediately.
    async fn maybe_flush(&mut self) {
        while let Some(action) = self.batcher.take_flush() {
            match action {
                FlushAction::Write(batch) => {
                    debug!(
                        partition = %self.partition,
                        cookie = batch.cookie,
                        mutations = batch.len(),
                        "issuing write"
                    );
                    let store = Arc::clone(&self.store);
                    let done = self.write_done_tx.clone();
                    let cookie = batch.cookie;
                    tokio::spawn(async move {
                        let result = store.write(batch).await;
                        let _ = done.send((cookie, result)).await;
                    });
                }
                FlushAction::Release(events) => {
                    for event in events {
                        self.emit(event).await;
                    }
                }
            }
        }
    }

    async fn handle_write_done(
        &mut self,
        cookie: u64,
        result: StorageResult<()>,
    ) -> PartitionResult<()> {
        result?;
        let events = self.batcher.complete(cookie);
        debug!(
            partition = %self.partition,
            cookie,
            events = events.len(),
            "write durable"
        );
        for event in events {
            self.emit(event).await;
        }
        Ok(())
    }

    async fn emit(&self, event: PartitionEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!(partition = %self.partition, "event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_storage::SimulatedLogStore;

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let store = Arc::new(SimulatedLogStore::new(42));
        let (handle, mut events) = spawn_partition_processor(
            PartitionId::new(1),
            store,
            Vec::new(),
            PartitionProcessorConfig::for_testing(),
        );

        handle.shutdown().await.unwrap();
        // The event channel closes once the run loop exits.
        assert!(events.recv().await.is_none());
        assert!(matches!(
            handle.get_offset(Cookie::new(1), "client").await,
            Err(PartitionError::ProcessorShutdown)
        ));
    }

    #[tokio::test]
    async fn test_get_offset_for_unknown_consumer_is_zero() {
        let store = Arc::new(SimulatedLogStore::new(42));
        let (handle, mut events) = spawn_partition_processor(
            PartitionId::new(1),
            store,
            Vec::new(),
            PartitionProcessorConfig::for_testing(),
        );

        handle.get_offset(Cookie::new(7), "client").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            PartitionEvent::ProxyResponse {
                cookie: Cookie::new(7),
                offset: Some(Offset::new(0)),
            }
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_failure_closes_event_channel() {
        let store = Arc::new(SimulatedLogStore::new(42));
        store.fault_config().status_fail = true;
        let (_handle, mut events) = spawn_partition_processor(
            PartitionId::new(1),
            store,
            Vec::new(),
            PartitionProcessorConfig::for_testing(),
        );
        assert!(events.recv().await.is_none());
    }
}
