//! Per-partition key space.
//!
//! Each partition owns a disjoint slice of the ordered key space:
//!
//! ```text
//! info/<partition>/<consumer>   checkpoint record, one per consumer
//! meta/<partition>/tx           tx-meta record (last resolved transaction)
//! meta/<partition>/partition    partition meta, owned elsewhere
//! data/<partition>/bounds       log-bounds record, owned by the data plane
//! ```
//!
//! Keys sort so that a prefix range read over `info/<partition>/` yields all
//! consumer checkpoints of one partition and nothing else.

use tidal_core::PartitionId;

/// Key of one consumer's checkpoint record.
#[must_use]
pub fn checkpoint_key(partition: PartitionId, consumer: &str) -> String {
    format!("info/{}/{consumer}", partition.get())
}

/// Range prefix covering all checkpoint records of a partition.
#[must_use]
pub fn checkpoint_prefix(partition: PartitionId) -> String {
    format!("info/{}/", partition.get())
}

/// Extracts the consumer name from a checkpoint key, if it belongs to
/// the given partition.
#[must_use]
pub fn consumer_from_checkpoint_key(partition: PartitionId, key: &str) -> Option<&str> {
    key.strip_prefix("info/")?
        .strip_prefix(&format!("{}/", partition.get()))
}

/// Key of the partition's tx-meta record.
#[must_use]
pub fn tx_meta_key(partition: PartitionId) -> String {
    format!("meta/{}/tx", partition.get())
}

/// Key of the partition meta record (owned by the tablet, read-only here).
#[must_use]
pub fn partition_meta_key(partition: PartitionId) -> String {
    format!("meta/{}/partition", partition.get())
}

/// Key of the data-log bounds record (owned by the data plane).
#[must_use]
pub fn bounds_key(partition: PartitionId) -> String {
    format!("data/{}/bounds", partition.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_key_roundtrip() {
        let partition = PartitionId::new(3);
        let key = checkpoint_key(partition, "client-1");
        assert_eq!(key, "info/3/client-1");
        assert_eq!(
            consumer_from_checkpoint_key(partition, &key),
            Some("client-1")
        );
    }

    #[test]
    fn test_consumer_from_wrong_partition() {
        let key = checkpoint_key(PartitionId::new(3), "client");
        assert_eq!(consumer_from_checkpoint_key(PartitionId::new(4), &key), None);
    }

    #[test]
    fn test_prefix_covers_keys() {
        let partition = PartitionId::new(7);
        let prefix = checkpoint_prefix(partition);
        assert!(checkpoint_key(partition, "a").starts_with(&prefix));
        assert!(!tx_meta_key(partition).starts_with(&prefix));
        assert!(!bounds_key(partition).starts_with(&prefix));
    }
}
