//! Strongly-typed identifiers for Tidal entities.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up IDs.
//! All IDs are 64-bit to handle large-scale deployments.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `TxId` with `Cookie`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next ID in sequence.
            ///
            /// # Panics
            /// Panics if the ID would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Partition identification.
define_id!(PartitionId, "partition", "Unique identifier for a partition within a topic.");

// Request correlation.
define_id!(Cookie, "cookie", "Request correlation cookie assigned by the proxy layer.");

// Coordinator-assigned transaction ordering.
define_id!(PlanStep, "step", "Coordinator plan step; the major transaction ordering key.");
define_id!(TxId, "tx", "Transaction identifier; the minor transaction ordering key.");

// Log positions.
define_id!(Offset, "offset", "Position in the partition log (first unread record).");

/// Coordinator-assigned ordering key for a distributed transaction.
///
/// The global resolution order within a partition is lexicographic
/// `(plan_step, tx_id)`, which the derived `Ord` provides.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxKey {
    /// Coordinator plan step.
    pub plan_step: PlanStep,
    /// Transaction identifier within the step.
    pub tx_id: TxId,
}

impl TxKey {
    /// Creates a transaction key.
    #[inline]
    #[must_use]
    pub const fn new(plan_step: PlanStep, tx_id: TxId) -> Self {
        Self { plan_step, tx_id }
    }
}

impl fmt::Debug for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx({}, {})", self.plan_step.get(), self.tx_id.get())
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plan_step.get(), self.tx_id.get())
    }
}
