//! Per-consumer committed state and the registry that owns it.
//!
//! The registry is the in-memory source of truth: every mutation applies
//! here first and is then staged for persistence. Reads observe staged but
//! not-yet-durable state.

use std::collections::BTreeMap;

use tidal_core::{Limits, Offset};
use tidal_storage::CheckpointRecord;

use crate::error::{PartitionError, PartitionResult};

/// Committed state of one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerCheckpoint {
    /// First unread log position.
    pub offset: Offset,
    /// Current exclusive reader session; empty if none.
    pub session: String,
    /// Session fencing generation.
    pub generation: u64,
    /// Session fencing step within the generation.
    pub step: u64,
    /// Total backward offset movement, carried through unchanged.
    pub offset_rewind_sum: u64,
    /// Read-rule generation, carried through unchanged.
    pub read_rule_generation: u64,
    /// Transient: true once the current session has committed at least once.
    /// The first commit of a session persists even when the offset is
    /// unchanged, so the session identity itself becomes durable.
    pub session_committed: bool,
}

impl ConsumerCheckpoint {
    fn from_record(record: CheckpointRecord) -> Self {
        Self {
            offset: record.offset,
            session: record.session,
            generation: record.generation,
            step: record.step,
            offset_rewind_sum: record.offset_rewind_sum,
            read_rule_generation: record.read_rule_generation,
            // A recovered session is durable by definition.
            session_committed: true,
        }
    }

    fn to_record(&self) -> CheckpointRecord {
        CheckpointRecord {
            offset: self.offset,
            generation: self.generation,
            step: self.step,
            session: self.session.clone(),
            offset_rewind_sum: self.offset_rewind_sum,
            read_rule_generation: self.read_rule_generation,
        }
    }
}

/// Outcome of a `SetOffset` application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOffsetOutcome {
    /// The offset after clamping.
    pub offset: Offset,
    /// True if the checkpoint must be persisted (offset moved, or this is
    /// the session's first commit).
    pub dirty: bool,
}

/// In-memory registry of all consumer checkpoints of one partition.
///
/// Ordered map for deterministic iteration. Consumers are created on first
/// touch and never deleted.
#[derive(Debug)]
pub struct ConsumerRegistry {
    consumers: BTreeMap<String, ConsumerCheckpoint>,
    limits: Limits,
}

impl ConsumerRegistry {
    /// Creates an empty registry.
    ///
    /// # Panics
    /// Panics if the limits are internally inconsistent.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        assert!(limits.is_valid(), "invalid limits");
        Self {
            consumers: BTreeMap::new(),
            limits,
        }
    }

    /// Returns the consumer's checkpoint, or the default (offset 0, no
    /// session) if the consumer has never been seen.
    #[must_use]
    pub fn checkpoint(&self, consumer: &str) -> ConsumerCheckpoint {
        self.consumers.get(consumer).cloned().unwrap_or_default()
    }

    /// Number of tracked consumers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    /// Returns true if no consumer has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Builds the persisted record of a consumer's current state.
    #[must_use]
    pub fn record(&self, consumer: &str) -> CheckpointRecord {
        self.checkpoint(consumer).to_record()
    }

    /// Restores a consumer from its persisted record during recovery.
    pub fn restore(&mut self, consumer: String, record: CheckpointRecord) {
        self.consumers
            .insert(consumer, ConsumerCheckpoint::from_record(record));
    }

    fn validate_consumer_name(&self, consumer: &str) -> PartitionResult<()> {
        if consumer.is_empty() {
            return Err(PartitionError::BadRequest {
                message: "consumer name is empty".to_string(),
            });
        }
        if consumer.len() > self.limits.max_consumer_name_bytes as usize {
            return Err(PartitionError::LimitExceeded {
                what: "consumer name bytes",
                limit: self.limits.max_consumer_name_bytes,
            });
        }
        Ok(())
    }

    fn entry(&mut self, consumer: &str) -> PartitionResult<&mut ConsumerCheckpoint> {
        self.validate_consumer_name(consumer)?;
        if !self.consumers.contains_key(consumer)
            && self.consumers.len() >= self.limits.max_consumers_per_partition as usize
        {
            return Err(PartitionError::LimitExceeded {
                what: "consumers per partition",
                limit: self.limits.max_consumers_per_partition,
            });
        }
        Ok(self.consumers.entry(consumer.to_string()).or_default())
    }

    /// Registers (or replaces) a consumer's session.
    ///
    /// Fencing: a request whose `(generation, step)` is lexicographically
    /// older than the stored pair is from a superseded reader and is
    /// rejected. An equal or newer pair takes over; the offset is kept.
    ///
    /// Returns the consumer's committed offset.
    ///
    /// # Errors
    /// `SessionMismatch` on fencing failure, `BadRequest`/`LimitExceeded`
    /// on malformed input.
    pub fn apply_create_session(
        &mut self,
        consumer: &str,
        session: &str,
        generation: u64,
        step: u64,
    ) -> PartitionResult<Offset> {
        if session.is_empty() {
            return Err(PartitionError::BadRequest {
                message: "session is empty".to_string(),
            });
        }
        if session.len() > self.limits.max_session_bytes as usize {
            return Err(PartitionError::LimitExceeded {
                what: "session bytes",
                limit: self.limits.max_session_bytes,
            });
        }

        let checkpoint = self.entry(consumer)?;
        if (generation, step) < (checkpoint.generation, checkpoint.step) {
            return Err(PartitionError::SessionMismatch {
                consumer: consumer.to_string(),
                reason: "stale session generation",
            });
        }

        checkpoint.session = session.to_string();
        checkpoint.generation = generation;
        checkpoint.step = step;
        checkpoint.session_committed = false;
        Ok(checkpoint.offset)
    }

    /// Advances a consumer's committed offset on behalf of a session.
    ///
    /// The new offset is `max(current, min(requested, partition_end))`:
    /// never backward, never past the log end.
    ///
    /// # Errors
    /// `SessionMismatch` if the consumer has a session and the caller's
    /// does not match.
    pub fn apply_set_offset(
        &mut self,
        consumer: &str,
        requested: Offset,
        session: &str,
        partition_end: Offset,
    ) -> PartitionResult<SetOffsetOutcome> {
        self.validate_consumer_name(consumer)?;
        let current = self.checkpoint(consumer);
        if !current.session.is_empty() && current.session != session {
            return Err(PartitionError::SessionMismatch {
                consumer: consumer.to_string(),
                reason: "session does not match",
            });
        }

        let clamped = current.offset.max(requested.min(partition_end));
        let dirty = clamped != current.offset || !current.session_committed;

        let checkpoint = self.entry(consumer)?;
        checkpoint.offset = clamped;
        checkpoint.session_committed = true;
        Ok(SetOffsetOutcome {
            offset: clamped,
            dirty,
        })
    }

    /// Applies a transactional range advance: `offset = end`, session
    /// cleared. Transactions fence out interactive readers; the displaced
    /// session must re-register.
    ///
    /// # Errors
    /// `BadRequest`/`LimitExceeded` on malformed input.
    pub fn apply_range_advance(&mut self, consumer: &str, end: Offset) -> PartitionResult<()> {
        let checkpoint = self.entry(consumer)?;
        checkpoint.offset = end;
        checkpoint.session.clear();
        checkpoint.session_committed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConsumerRegistry {
        ConsumerRegistry::new(Limits::new())
    }

    #[test]
    fn test_unknown_consumer_defaults() {
        let registry = registry();
        let checkpoint = registry.checkpoint("client");
        assert_eq!(checkpoint.offset, Offset::new(0));
        assert!(checkpoint.session.is_empty());
    }

    #[test]
    fn test_create_session_keeps_offset() {
        let mut registry = registry();
        registry
            .apply_set_offset("client", Offset::new(3), "", Offset::new(10))
            .unwrap();
        let offset = registry
            .apply_create_session("client", "session-1", 1, 0)
            .unwrap();
        assert_eq!(offset, Offset::new(3));
        assert_eq!(registry.checkpoint("client").session, "session-1");
    }

    #[test]
    fn test_create_session_fencing() {
        let mut registry = registry();
        registry
            .apply_create_session("client", "session-2", 2, 1)
            .unwrap();

        // Older (generation, step) is fenced out.
        let err = registry
            .apply_create_session("client", "session-1", 2, 0)
            .unwrap_err();
        assert!(matches!(err, PartitionError::SessionMismatch { .. }));
        assert_eq!(registry.checkpoint("client").session, "session-2");

        // Equal pair may retake the session.
        registry
            .apply_create_session("client", "session-3", 2, 1)
            .unwrap();
        assert_eq!(registry.checkpoint("client").session, "session-3");
    }

    #[test]
    fn test_set_offset_clamps_and_never_rewinds() {
        let mut registry = registry();
        registry
            .apply_create_session("client", "session-1", 1, 0)
            .unwrap();

        // Past the log end: clamped to end.
        let outcome = registry
            .apply_set_offset("client", Offset::new(13), "session-1", Offset::new(10))
            .unwrap();
        assert_eq!(outcome.offset, Offset::new(10));
        assert!(outcome.dirty);

        // Backward: kept at the current value.
        let outcome = registry
            .apply_set_offset("client", Offset::new(1), "session-1", Offset::new(10))
            .unwrap();
        assert_eq!(outcome.offset, Offset::new(10));
        assert!(!outcome.dirty);
    }

    #[test]
    fn test_first_commit_of_session_is_dirty() {
        let mut registry = registry();
        registry
            .apply_set_offset("client", Offset::new(5), "", Offset::new(10))
            .unwrap();
        registry
            .apply_create_session("client", "session-1", 1, 0)
            .unwrap();

        // Offset unchanged, but the session identity is not yet durable.
        let outcome = registry
            .apply_set_offset("client", Offset::new(5), "session-1", Offset::new(10))
            .unwrap();
        assert!(outcome.dirty);

        // Second identical commit has nothing to persist.
        let outcome = registry
            .apply_set_offset("client", Offset::new(5), "session-1", Offset::new(10))
            .unwrap();
        assert!(!outcome.dirty);
    }

    #[test]
    fn test_set_offset_session_fencing() {
        let mut registry = registry();
        registry
            .apply_create_session("client", "session-1", 1, 0)
            .unwrap();
        let err = registry
            .apply_set_offset("client", Offset::new(1), "session-2", Offset::new(10))
            .unwrap_err();
        assert!(matches!(err, PartitionError::SessionMismatch { .. }));
    }

    #[test]
    fn test_range_advance_clears_session() {
        let mut registry = registry();
        registry
            .apply_create_session("client", "session-1", 1, 0)
            .unwrap();
        registry
            .apply_range_advance("client", Offset::new(7))
            .unwrap();

        let checkpoint = registry.checkpoint("client");
        assert_eq!(checkpoint.offset, Offset::new(7));
        assert!(checkpoint.session.is_empty());
        // Fencing tokens survive; the displaced reader must re-register
        // with at least its old generation.
        assert_eq!(checkpoint.generation, 1);
    }

    #[test]
    fn test_restore_roundtrip() {
        let mut registry = registry();
        registry
            .apply_create_session("client", "session-1", 4, 2)
            .unwrap();
        registry
            .apply_set_offset("client", Offset::new(6), "session-1", Offset::new(10))
            .unwrap();

        let record = registry.record("client");
        let mut recovered = ConsumerRegistry::new(Limits::new());
        recovered.restore("client".to_string(), record);

        let checkpoint = recovered.checkpoint("client");
        assert_eq!(checkpoint.offset, Offset::new(6));
        assert_eq!(checkpoint.session, "session-1");
        assert_eq!(checkpoint.generation, 4);
        assert!(checkpoint.session_committed);
    }

    #[test]
    fn test_consumer_limit() {
        let mut limits = Limits::new();
        limits.max_consumers_per_partition = 2;
        limits.max_mutations_per_batch = 3;
        let mut registry = ConsumerRegistry::new(limits);

        registry.apply_create_session("a", "s", 1, 0).unwrap();
        registry.apply_create_session("b", "s", 1, 0).unwrap();
        let err = registry.apply_create_session("c", "s", 1, 0).unwrap_err();
        assert!(matches!(err, PartitionError::LimitExceeded { .. }));
    }
}
