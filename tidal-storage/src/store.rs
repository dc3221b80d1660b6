//! Ordered key-value log abstraction.
//!
//! Provides the `LogStore` trait the partition processor persists through,
//! and `SimulatedLogStore` for deterministic simulation testing.

#![allow(clippy::significant_drop_tightening)]

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StorageError, StorageResult};

// -----------------------------------------------------------------------------
// Write batch
// -----------------------------------------------------------------------------

/// One atomic multi-key write.
///
/// The `cookie` is the processor-assigned identifier of this physical write;
/// completions are matched against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    /// Processor-assigned write identifier.
    pub cookie: u64,
    /// Key/value pairs written atomically, in staging order.
    pub writes: Vec<(String, Bytes)>,
}

impl WriteBatch {
    /// Creates a batch.
    #[must_use]
    pub const fn new(cookie: u64, writes: Vec<(String, Bytes)>) -> Self {
        Self { cookie, writes }
    }

    /// Number of key/value pairs in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if the batch carries no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Log store trait
// -----------------------------------------------------------------------------

/// Ordered key-value log owned by an external collaborator.
///
/// The processor is the exclusive writer of its partition's slice of the key
/// space; reads happen only during recovery.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Checks that the store is healthy. A failure aborts startup.
    async fn get_status(&self) -> StorageResult<()>;

    /// Reads one key. Returns `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Reads all keys starting with `prefix`, in key order.
    async fn read_range(&self, prefix: &str) -> StorageResult<Vec<(String, Bytes)>>;

    /// Applies a batch of writes atomically.
    async fn write(&self, batch: WriteBatch) -> StorageResult<()>;
}

// -----------------------------------------------------------------------------
// Fault configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated log store.
#[derive(Debug, Clone, Default)]
pub struct StoreFaultConfig {
    /// Fail the status check (aborts recovery).
    pub status_fail: bool,
    /// Probability of read operations failing (0.0 - 1.0).
    pub get_fail_rate: f64,
    /// Probability of write operations failing (0.0 - 1.0).
    pub write_fail_rate: f64,
    /// Force the next write to fail (one-shot).
    pub force_write_fail: bool,
    /// Delay applied to every write, simulating a slow device.
    pub write_delay_ms: u64,
}

impl StoreFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            status_fail: false,
            get_fail_rate: 0.0,
            write_fail_rate: 0.0,
            force_write_fail: false,
            write_delay_ms: 0,
        }
    }
}

// -----------------------------------------------------------------------------
// Simulated log store
// -----------------------------------------------------------------------------

/// In-memory simulated log store for deterministic tests.
///
/// Clones share state via `Arc` for multi-handle testing. Every committed
/// write batch is retained in a write log so tests can assert on the exact
/// physical writes the processor issued.
#[derive(Debug, Clone)]
pub struct SimulatedLogStore {
    /// Key space, ordered for range reads.
    data: Arc<Mutex<BTreeMap<String, Bytes>>>,
    /// Committed write batches, in commit order.
    batches: Arc<Mutex<Vec<WriteBatch>>>,
    /// Fault configuration.
    fault_config: Arc<Mutex<StoreFaultConfig>>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedLogStore {
    /// Creates a new simulated store with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            data: Arc::new(Mutex::new(BTreeMap::new())),
            batches: Arc::new(Mutex::new(Vec::new())),
            fault_config: Arc::new(Mutex::new(StoreFaultConfig::none())),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a simulated store with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: StoreFaultConfig) -> Self {
        let store = Self::new(seed);
        *store.fault_config.lock().expect("fault config lock poisoned") = config;
        store
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, StoreFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Seeds a record directly, bypassing the write log (test setup).
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn seed_record(&self, key: &str, value: Bytes) {
        let mut data = self.data.lock().expect("data lock poisoned");
        data.insert(key.to_string(), value);
    }

    /// Returns all committed write batches (bypasses faults, for assertions).
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn written_batches(&self) -> Vec<WriteBatch> {
        self.batches.lock().expect("batches lock poisoned").clone()
    }

    /// Returns the number of committed write batches.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.batches.lock().expect("batches lock poisoned").len()
    }

    /// Reads a record directly (bypasses faults, for assertions).
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<Bytes> {
        self.data.lock().expect("data lock poisoned").get(key).cloned()
    }

    /// Deterministic fault RNG: `(seed + counter) * M`, so a given seed
    /// reproduces the same fault schedule.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }
}

#[async_trait]
impl LogStore for SimulatedLogStore {
    async fn get_status(&self) -> StorageResult<()> {
        if self.fault_config().status_fail {
            return Err(StorageError::Unavailable {
                message: "simulated status failure".to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let get_fail_rate = self.fault_config().get_fail_rate;
        if self.should_inject_fault(get_fail_rate) {
            return Err(StorageError::Io {
                operation: "get",
                message: "simulated failure (random)".to_string(),
            });
        }

        let data = self.data.lock().expect("data lock poisoned");
        Ok(data.get(key).cloned())
    }

    async fn read_range(&self, prefix: &str) -> StorageResult<Vec<(String, Bytes)>> {
        let get_fail_rate = self.fault_config().get_fail_rate;
        if self.should_inject_fault(get_fail_rate) {
            return Err(StorageError::Io {
                operation: "read_range",
                message: "simulated failure (random)".to_string(),
            });
        }

        let data = self.data.lock().expect("data lock poisoned");
        let range = data.range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded));
        Ok(range
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        // TigerStyle: the processor never issues an empty physical write.
        assert!(!batch.is_empty(), "empty write batch");

        let delay_ms = self.fault_config().write_delay_ms;
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        {
            let mut config = self.fault_config();
            if config.force_write_fail {
                config.force_write_fail = false;
                return Err(StorageError::Io {
                    operation: "write",
                    message: "simulated failure (forced)".to_string(),
                });
            }
        }

        let write_fail_rate = self.fault_config().write_fail_rate;
        if self.should_inject_fault(write_fail_rate) {
            return Err(StorageError::Io {
                operation: "write",
                message: "simulated failure (random)".to_string(),
            });
        }

        let mut data = self.data.lock().expect("data lock poisoned");
        for (key, value) in &batch.writes {
            data.insert(key.clone(), value.clone());
        }
        drop(data);

        let mut batches = self.batches.lock().expect("batches lock poisoned");
        batches.push(batch);
        Ok(())
    }
}
