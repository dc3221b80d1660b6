//! System limits and configuration bounds.
//!
//! Following `TigerStyle`: put limits on everything.
//! Every queue, buffer, and resource has an explicit maximum size.

/// System-wide limits for the partition processor.
///
/// All limits are explicit and configurable. Default values are chosen
/// to be safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Consumer limits.
    /// Maximum number of consumers tracked per partition.
    pub max_consumers_per_partition: u32,
    /// Maximum length of a consumer name in bytes.
    pub max_consumer_name_bytes: u32,
    /// Maximum length of a session identifier in bytes.
    pub max_session_bytes: u32,

    // Transaction limits.
    /// Maximum number of in-flight transactions in the queue.
    pub max_queued_transactions: u32,
    /// Maximum number of operations in a single transaction.
    pub max_operations_per_transaction: u32,

    // Write batching limits.
    /// Maximum number of mutations coalesced into one physical write.
    pub max_mutations_per_batch: u32,
    /// Maximum number of response events waiting on one batch.
    pub max_events_per_batch: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Consumers: 1000 per partition, short identifiers.
            max_consumers_per_partition: 1000,
            max_consumer_name_bytes: 256,
            max_session_bytes: 256,

            // Transactions: 1000 queued, 100 operations each.
            max_queued_transactions: 1000,
            max_operations_per_transaction: 100,

            // Batching: one write may carry every consumer plus the meta.
            max_mutations_per_batch: 1001,
            max_events_per_batch: 10_000,
        }
    }

    /// Returns true if all limits are internally consistent.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.max_consumers_per_partition > 0
            && self.max_consumer_name_bytes > 0
            && self.max_session_bytes > 0
            && self.max_queued_transactions > 0
            && self.max_operations_per_transaction > 0
            // A batch must be able to hold every consumer plus the tx meta.
            && self.max_mutations_per_batch > self.max_consumers_per_partition
            && self.max_events_per_batch > 0
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        assert!(Limits::new().is_valid());
    }

    #[test]
    fn test_batch_must_fit_all_consumers() {
        let mut limits = Limits::new();
        limits.max_mutations_per_batch = limits.max_consumers_per_partition;
        assert!(!limits.is_valid());
    }

    #[test]
    fn test_zero_queue_is_invalid() {
        let mut limits = Limits::new();
        limits.max_queued_transactions = 0;
        assert!(!limits.is_valid());
    }
}
