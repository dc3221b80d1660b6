//! Tidal Core - Strongly-typed identifiers and limits for Tidal.
//!
//! This crate provides the shared vocabulary of the partition processor:
//! typed identifiers for offsets, transactions and requests, and explicit
//! bounds on every resource the processor manages.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `TxId` with a `Cookie`
//! - **Explicit limits**: Every queue and buffer has a bounded maximum
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod limits;
mod types;

pub use limits::Limits;
pub use types::{Cookie, Offset, PartitionId, PlanStep, TxId, TxKey};
