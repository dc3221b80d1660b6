//! Tidal Storage - ordered key-value log boundary and record codecs.
//!
//! The partition processor persists its state through an ordered key-value
//! log owned by an external collaborator. This crate specifies that boundary
//! (`LogStore`), the binary framing of the persisted records, and the
//! per-partition key space.
//!
//! # Design
//!
//! - One atomic multi-key write batch at a time per partition
//! - CRC32-protected little-endian record framing
//! - `SimulatedLogStore` for deterministic testing with fault injection
//!
//! # `TigerStyle` Principles
//!
//! - Explicit limits on record sizes
//! - CRC checksums on all persisted data
//! - No unsafe code

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod error;
mod keys;
mod store;

pub use codec::{BoundsRecord, CheckpointRecord, RecordKind, TxMetaRecord};
pub use error::{StorageError, StorageResult};
pub use keys::{
    bounds_key, checkpoint_key, checkpoint_prefix, consumer_from_checkpoint_key,
    partition_meta_key, tx_meta_key,
};
pub use store::{LogStore, SimulatedLogStore, StoreFaultConfig, WriteBatch};
