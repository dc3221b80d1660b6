//! Ordered queue of in-flight distributed transactions.
//!
//! Transactions enter at `CalcPredicate` time and leave when the
//! coordinator's `Commit` or `Rollback` decision is applied. Within one
//! partition, decisions apply strictly in `(plan_step, tx_id)` order even
//! though many transactions may have voted concurrently: a commit for a
//! transaction behind the head is buffered until it becomes head.
//!
//! Predicates are computed eagerly at arrival against *provisional* offsets:
//! the committed offset advanced through every queued predicate-`true`
//! transaction ahead of the new one. Provisional offsets are always derived
//! from scratch, never cached, so removing a transaction (rollback) reverts
//! its provisional effect automatically.

use std::collections::{BTreeMap, VecDeque};

use tidal_core::{Limits, Offset, TxKey};

use crate::checkpoint::ConsumerRegistry;
use crate::error::{PartitionError, PartitionResult};

/// One offset range a transaction wants to advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOperation {
    /// Consumer whose offset is advanced.
    pub consumer: String,
    /// Expected committed offset at apply time.
    pub begin: Offset,
    /// New committed offset.
    pub end: Offset,
}

/// Lifecycle of a queued transaction.
///
/// Every transaction is validated before it enters the queue, so queued
/// transactions always carry a known vote. The terminal states are
/// represented by removal from the queue plus the resolution mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Predicate computed and reported to the coordinator.
    PredicateSent,
    /// Commit decision received, waiting to reach the queue head.
    Committing,
}

/// A transaction awaiting its coordinator decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    /// Coordinator ordering key.
    pub key: TxKey,
    /// Offset ranges to advance on commit.
    pub operations: Vec<TxOperation>,
    /// Computed commit vote.
    pub predicate: bool,
    /// Lifecycle state.
    pub state: TxState,
}

/// Outcome of registering a coordinator `Commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDisposition {
    /// Already resolved; acknowledge again without re-applying.
    Stale,
    /// Not queued and not resolved: the state machines have diverged.
    Unknown,
    /// Commit of a transaction that voted `false`: the coordinator must
    /// never commit against a `false` vote.
    PredicateFalse,
    /// Decision recorded; apply when the transaction reaches the head.
    Buffered,
}

/// Outcome of a coordinator `Rollback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackDisposition {
    /// Already resolved; nothing to do.
    Stale,
    /// Not queued and not resolved: the state machines have diverged.
    Unknown,
    /// Removed from the queue; the resolution must be persisted.
    Removed,
}

/// FIFO of unresolved transactions plus the resolution high-water mark.
#[derive(Debug)]
pub struct TransactionQueue {
    queue: VecDeque<PendingTransaction>,
    /// Key of the most recently resolved (committed or rolled back)
    /// transaction. Decisions at or below this key are replays.
    last_resolved: TxKey,
    limits: Limits,
}

impl TransactionQueue {
    /// Creates a queue resuming from a persisted resolution mark.
    ///
    /// # Panics
    /// Panics if the limits are internally inconsistent.
    #[must_use]
    pub fn new(limits: Limits, last_resolved: TxKey) -> Self {
        assert!(limits.is_valid(), "invalid limits");
        Self {
            queue: VecDeque::new(),
            last_resolved,
            limits,
        }
    }

    /// Key of the most recently resolved transaction.
    #[must_use]
    pub const fn last_resolved(&self) -> TxKey {
        self.last_resolved
    }

    /// Number of unresolved transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if no transaction is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns true if the key is at or below the resolution mark.
    ///
    /// Only meaningful for keys not currently queued: queued transactions
    /// are unresolved by definition, regardless of the mark.
    #[must_use]
    pub fn is_stale(&self, key: TxKey) -> bool {
        key <= self.last_resolved
    }

    fn position(&self, key: TxKey) -> Option<usize> {
        self.queue.iter().position(|tx| tx.key == key)
    }

    /// Returns the recorded vote of a queued transaction, if it is queued.
    #[must_use]
    pub fn recorded_predicate(&self, key: TxKey) -> Option<bool> {
        self.position(key).map(|index| self.queue[index].predicate)
    }

    /// A consumer's offset with every queued predicate-`true` advance ahead
    /// applied, derived from scratch off the committed registry state.
    #[must_use]
    pub fn provisional_offset(&self, registry: &ConsumerRegistry, consumer: &str) -> Offset {
        let mut offset = registry.checkpoint(consumer).offset;
        for tx in &self.queue {
            if !tx.predicate {
                continue;
            }
            for op in &tx.operations {
                if op.consumer == consumer {
                    offset = op.end;
                }
            }
        }
        offset
    }

    /// Validates a transaction's operations against provisional state.
    ///
    /// Every operation must satisfy `begin <= end`, `end <= partition_end`,
    /// and `begin >=` the consumer's provisional offset (including earlier
    /// operations of the same transaction). Any violation makes the whole
    /// vote `false`.
    #[must_use]
    pub fn compute_predicate(
        &self,
        registry: &ConsumerRegistry,
        operations: &[TxOperation],
        partition_end: Offset,
    ) -> bool {
        let mut seen: BTreeMap<&str, Offset> = BTreeMap::new();
        for op in operations {
            if op.begin > op.end || op.end > partition_end {
                return false;
            }
            let current = seen.get(op.consumer.as_str()).copied().unwrap_or_else(|| {
                self.provisional_offset(registry, &op.consumer)
            });
            if op.begin < current {
                return false;
            }
            seen.insert(op.consumer.as_str(), op.end);
        }
        true
    }

    /// Enqueues a transaction at the tail with its computed vote.
    ///
    /// The caller must have checked staleness first and computed the
    /// predicate via `compute_predicate`.
    ///
    /// # Errors
    /// `LimitExceeded` if the queue or the operation list is over budget.
    ///
    /// # Panics
    /// Panics if the key is at or below the resolution mark or already
    /// queued.
    pub fn enqueue(
        &mut self,
        key: TxKey,
        operations: Vec<TxOperation>,
        predicate: bool,
    ) -> PartitionResult<()> {
        assert!(!self.is_stale(key), "enqueue of resolved transaction");
        assert!(self.position(key).is_none(), "duplicate transaction key");

        if self.queue.len() >= self.limits.max_queued_transactions as usize {
            return Err(PartitionError::LimitExceeded {
                what: "queued transactions",
                limit: self.limits.max_queued_transactions,
            });
        }
        if operations.len() > self.limits.max_operations_per_transaction as usize {
            return Err(PartitionError::LimitExceeded {
                what: "operations per transaction",
                limit: self.limits.max_operations_per_transaction,
            });
        }

        self.queue.push_back(PendingTransaction {
            key,
            operations,
            predicate,
            state: TxState::PredicateSent,
        });
        Ok(())
    }

    /// Registers a coordinator commit decision.
    ///
    /// Queue membership is checked before staleness: a queued transaction
    /// is unresolved even when later transactions have already resolved
    /// past its key.
    pub fn request_commit(&mut self, key: TxKey) -> CommitDisposition {
        let Some(index) = self.position(key) else {
            if self.is_stale(key) {
                return CommitDisposition::Stale;
            }
            return CommitDisposition::Unknown;
        };

        let tx = &mut self.queue[index];
        if !tx.predicate {
            return CommitDisposition::PredicateFalse;
        }
        tx.state = TxState::Committing;
        CommitDisposition::Buffered
    }

    /// Pops the head transaction if its commit decision has arrived,
    /// advancing the resolution mark.
    pub fn take_committable(&mut self) -> Option<PendingTransaction> {
        let head = self.queue.front()?;
        if head.state != TxState::Committing || !head.predicate {
            return None;
        }
        let tx = self.queue.pop_front()?;
        self.last_resolved = self.last_resolved.max(tx.key);
        Some(tx)
    }

    /// Applies a coordinator rollback decision, removing the transaction
    /// from any queue position and advancing the resolution mark.
    pub fn rollback(&mut self, key: TxKey) -> RollbackDisposition {
        let Some(index) = self.position(key) else {
            if self.is_stale(key) {
                return RollbackDisposition::Stale;
            }
            return RollbackDisposition::Unknown;
        };

        self.queue.remove(index);
        self.last_resolved = self.last_resolved.max(key);
        RollbackDisposition::Removed
    }
}
