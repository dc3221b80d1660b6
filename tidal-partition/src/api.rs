//! Request and event types of the partition processor.
//!
//! Requests arrive on the processor's command channel; events leave on its
//! event channel. Proxy-originated requests carry a `Cookie` the proxy uses
//! to correlate the eventual `ProxyResponse` or `Error` event. Coordinator
//! messages (`CalcPredicate`, `Commit`, `Rollback`) are correlated by their
//! `(plan_step, tx_id)` key instead.

use tidal_core::{Cookie, Offset, PartitionId, PlanStep, TxId};

use crate::txqueue::TxOperation;

/// Inbound requests handled by the partition processor.
#[derive(Debug, Clone)]
pub enum PartitionRequest {
    /// Registers (or replaces) a consumer's exclusive reader session.
    CreateSession {
        /// Proxy correlation cookie.
        cookie: Cookie,
        /// Consumer name.
        consumer: String,
        /// New session identifier.
        session: String,
        /// Session fencing generation.
        generation: u64,
        /// Session fencing step within the generation.
        step: u64,
    },

    /// Advances a consumer's committed offset on behalf of its session.
    SetOffset {
        /// Proxy correlation cookie.
        cookie: Cookie,
        /// Consumer name.
        consumer: String,
        /// Requested new offset; clamped to `[current, partition_end]`.
        offset: Offset,
        /// Caller's session, checked against the consumer's current session.
        session: String,
    },

    /// Reads a consumer's committed offset.
    GetOffset {
        /// Proxy correlation cookie.
        cookie: Cookie,
        /// Consumer name.
        consumer: String,
    },

    /// Phase one of a distributed transaction: validate the offset ranges
    /// and report a commit/abort vote to the coordinator.
    CalcPredicate {
        /// Coordinator plan step.
        step: PlanStep,
        /// Transaction identifier.
        tx_id: TxId,
        /// Offset ranges the transaction wants to advance.
        operations: Vec<TxOperation>,
    },

    /// Phase two, commit: apply the transaction's offset advances durably.
    Commit {
        /// Coordinator plan step.
        step: PlanStep,
        /// Transaction identifier.
        tx_id: TxId,
    },

    /// Phase two, abort: discard the transaction.
    Rollback {
        /// Coordinator plan step.
        step: PlanStep,
        /// Transaction identifier.
        tx_id: TxId,
    },

    /// Single-partition immediate transaction: advance one consumer's offset
    /// over `[begin, end)` without the two-phase protocol.
    ProposeAdvance {
        /// Client-assigned transaction identifier, echoed in the result.
        tx_id: TxId,
        /// Consumer name.
        consumer: String,
        /// Expected current offset.
        begin: Offset,
        /// New offset.
        end: Offset,
    },

    /// Graceful shutdown.
    Shutdown,
}

/// Error codes reported to the proxy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Session fencing failed: the request's session or fencing tokens are
    /// stale relative to the consumer's current session.
    WrongCookie,
    /// The request was malformed or exceeded a resource limit.
    BadRequest,
}

/// Outcome of a `ProposeAdvance` immediate transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceStatus {
    /// The advance was applied and is durable.
    Complete,
    /// The expected offset no longer matches; the advance was discarded.
    Aborted,
    /// The requested range is malformed or beyond the log end.
    Invalid,
}

/// Outbound events emitted by the partition processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionEvent {
    /// Successful completion of a proxy request. `offset` carries the
    /// consumer's committed offset for `GetOffset` and is `None` otherwise.
    ProxyResponse {
        /// Cookie of the originating request.
        cookie: Cookie,
        /// Committed offset, for offset reads.
        offset: Option<Offset>,
    },

    /// Failed completion of a proxy request.
    Error {
        /// Cookie of the originating request.
        cookie: Cookie,
        /// Error classification.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Commit/abort vote for a distributed transaction.
    CalcPredicateResult {
        /// Coordinator plan step.
        step: PlanStep,
        /// Transaction identifier.
        tx_id: TxId,
        /// Partition reporting the vote.
        partition: PartitionId,
        /// `true` if every operation's range is valid against this
        /// partition's (provisional) state.
        predicate: bool,
    },

    /// A commit has been applied and is durable.
    CommitDone {
        /// Coordinator plan step.
        step: PlanStep,
        /// Transaction identifier.
        tx_id: TxId,
        /// Partition reporting completion.
        partition: PartitionId,
    },

    /// Outcome of a `ProposeAdvance` immediate transaction. `Complete` is
    /// reported only once the advance is durable.
    ProposeAdvanceResult {
        /// Transaction identifier from the request.
        tx_id: TxId,
        /// Outcome.
        status: AdvanceStatus,
    },
}
