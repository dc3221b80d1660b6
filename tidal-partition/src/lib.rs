//! Tidal Partition - consumer offsets and transactions for one partition.
//!
//! Each partition runs a single-threaded processor actor owning all of its
//! state: the consumer checkpoint registry, the queue of in-flight
//! distributed transactions, and the write batcher that persists mutations
//! to the ordered key-value log with at most one outstanding write.
//!
//! # Architecture
//!
//! ```text
//! Proxy / Coordinator
//!       │ PartitionRequest
//!       ▼
//! ┌──────────────────────┐
//! │ PartitionProcessor   │
//! │  - ConsumerRegistry  │────► LogStore (one write in flight)
//! │  - TransactionQueue  │◄──── write completions
//! │  - WriteBatcher      │
//! └──────────────────────┘
//!       │ PartitionEvent
//!       ▼
//! Proxy / Coordinator
//! ```
//!
//! # Guarantees
//!
//! - Committed offsets never move backward and never pass the log end
//! - Transactions resolve strictly in `(plan_step, tx_id)` order
//! - Votes are computed against provisional state, so non-conflicting
//!   transactions pipeline without waiting for each other's commits
//! - Replayed coordinator decisions are idempotent
//! - Responses release in request order once their batch is durable
//!
//! # `TigerStyle` Principles
//!
//! - Explicit limits on queues, batches, and identifiers
//! - Precondition asserts on internal invariants
//! - No unsafe code

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod api;
mod batcher;
mod checkpoint;
mod error;
mod processor;
mod recovery;
mod txqueue;

pub use api::{AdvanceStatus, ErrorCode, PartitionEvent, PartitionRequest};
pub use batcher::{FlushAction, WriteBatcher};
pub use checkpoint::{ConsumerCheckpoint, ConsumerRegistry, SetOffsetOutcome};
pub use error::{PartitionError, PartitionResult};
pub use processor::{
    spawn_partition_processor, PartitionHandle, PartitionProcessorConfig, RecoveredTransaction,
};
pub use recovery::{RecoveredState, RecoveryLoader};
pub use txqueue::{
    CommitDisposition, PendingTransaction, RollbackDisposition, TransactionQueue, TxOperation,
    TxState,
};
