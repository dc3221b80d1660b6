//! State reconstruction at processor startup.
//!
//! Recovery reads in a fixed order: store status, partition meta, tx meta,
//! consumer checkpoints, data-log bounds. Absent records fall back to
//! defaults; a failed status check or a corrupt record aborts startup.

use tidal_core::{Limits, Offset, PartitionId, TxKey};
use tidal_storage::{
    bounds_key, checkpoint_prefix, consumer_from_checkpoint_key, partition_meta_key, tx_meta_key,
    BoundsRecord, CheckpointRecord, LogStore, StorageError, TxMetaRecord,
};
use tracing::{debug, info};

use crate::checkpoint::ConsumerRegistry;
use crate::error::PartitionResult;

/// State reconstructed from the log store at startup.
#[derive(Debug)]
pub struct RecoveredState {
    /// Consumer checkpoints as of the last durable write.
    pub registry: ConsumerRegistry,
    /// Resolution mark of the transaction queue.
    pub last_resolved: TxKey,
    /// First valid log position.
    pub log_begin: Offset,
    /// Position one past the last appended record.
    pub log_end: Offset,
}

/// Reads and validates a partition's persisted state.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryLoader {
    partition: PartitionId,
    limits: Limits,
}

impl RecoveryLoader {
    /// Creates a loader for one partition.
    #[must_use]
    pub const fn new(partition: PartitionId, limits: Limits) -> Self {
        Self { partition, limits }
    }

    /// Loads the partition's persisted state.
    ///
    /// # Errors
    /// Any storage failure or corrupt record aborts startup; the supervisor
    /// retries recovery from scratch.
    pub async fn load(&self, store: &dyn LogStore) -> PartitionResult<RecoveredState> {
        store.get_status().await?;

        // Partition meta is owned by the tablet layer; only its presence
        // matters here.
        let has_partition_meta = store
            .get(&partition_meta_key(self.partition))
            .await?
            .is_some();

        let tx_key = tx_meta_key(self.partition);
        let last_resolved = match store.get(&tx_key).await? {
            Some(raw) => TxMetaRecord::decode(&tx_key, raw)?.last_resolved,
            None => TxKey::default(),
        };

        let mut registry = ConsumerRegistry::new(self.limits);
        for (key, raw) in store.read_range(&checkpoint_prefix(self.partition)).await? {
            let Some(consumer) = consumer_from_checkpoint_key(self.partition, &key) else {
                return Err(StorageError::Corruption {
                    key,
                    reason: "checkpoint key outside partition prefix",
                }
                .into());
            };
            let record = CheckpointRecord::decode(&key, raw)?;
            debug!(
                partition = %self.partition,
                consumer,
                offset = record.offset.get(),
                "recovered consumer checkpoint"
            );
            registry.restore(consumer.to_string(), record);
        }

        let bounds_key = bounds_key(self.partition);
        let (log_begin, log_end) = match store.get(&bounds_key).await? {
            Some(raw) => {
                let bounds = BoundsRecord::decode(&bounds_key, raw)?;
                (bounds.begin, bounds.end)
            }
            None => (Offset::new(0), Offset::new(0)),
        };

        info!(
            partition = %self.partition,
            consumers = registry.len(),
            last_resolved = %last_resolved,
            log_end = log_end.get(),
            has_partition_meta,
            "partition state recovered"
        );

        Ok(RecoveredState {
            registry,
            last_resolved,
            log_begin,
            log_end,
        })
    }
}
