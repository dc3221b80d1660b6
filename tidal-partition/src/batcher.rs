//! Write batching with at most one outstanding physical write.
//!
//! Mutations and completion events stage into an open batch while a write is
//! in flight. Staging a mutation for a key already in the open batch
//! replaces the earlier record, so a batch carries at most one record per
//! key. When the outstanding write completes, its events release in staging
//! order and the open batch flushes as the next write.
//!
//! A batch that accumulated only events (every staged operation was a
//! no-op on durable state) releases without touching storage.

use std::collections::HashMap;

use bytes::Bytes;
use tidal_core::Limits;
use tidal_storage::WriteBatch;

use crate::api::PartitionEvent;
use crate::error::{PartitionError, PartitionResult};

/// What the processor must do to make progress on the open batch.
#[derive(Debug)]
pub enum FlushAction {
    /// Issue this physical write; its events release on completion.
    Write(WriteBatch),
    /// No durable state changed; release these events immediately.
    Release(Vec<PartitionEvent>),
}

/// Events parked behind the outstanding write.
#[derive(Debug)]
struct InFlight {
    cookie: u64,
    events: Vec<PartitionEvent>,
}

/// Staging area between the state machine and the log store.
#[derive(Debug)]
pub struct WriteBatcher {
    limits: Limits,
    /// Cookie assigned to the next physical write.
    next_cookie: u64,
    /// Open batch: mutations in staging order, coalesced per key.
    open_mutations: Vec<(String, Bytes)>,
    open_index: HashMap<String, usize>,
    /// Open batch: events to release once the batch is durable.
    open_events: Vec<PartitionEvent>,
    in_flight: Option<InFlight>,
}

impl WriteBatcher {
    /// Creates an empty batcher.
    ///
    /// # Panics
    /// Panics if the limits are internally inconsistent.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        assert!(limits.is_valid(), "invalid limits");
        Self {
            limits,
            next_cookie: 1,
            open_mutations: Vec::new(),
            open_index: HashMap::new(),
            open_events: Vec::new(),
            in_flight: None,
        }
    }

    /// Returns true if a physical write is outstanding.
    #[must_use]
    pub const fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Stages a mutation into the open batch, replacing any staged record
    /// under the same key.
    pub fn stage_mutation(&mut self, key: String, value: Bytes) {
        if let Some(&index) = self.open_index.get(&key) {
            self.open_mutations[index].1 = value;
            return;
        }
        // Coalescing bounds distinct keys by consumers + meta, which the
        // limit validity check guarantees fits one batch.
        assert!(
            self.open_mutations.len() < self.limits.max_mutations_per_batch as usize,
            "write batch over mutation limit"
        );
        self.open_index.insert(key.clone(), self.open_mutations.len());
        self.open_mutations.push((key, value));
    }

    /// Stages a completion event behind the open batch.
    ///
    /// # Errors
    /// `LimitExceeded` if the open batch already carries the maximum number
    /// of events.
    pub fn stage_event(&mut self, event: PartitionEvent) -> PartitionResult<()> {
        if self.open_events.len() >= self.limits.max_events_per_batch as usize {
            return Err(PartitionError::LimitExceeded {
                what: "events per batch",
                limit: self.limits.max_events_per_batch,
            });
        }
        self.open_events.push(event);
        Ok(())
    }

    /// Takes the next action needed to drain the open batch, if any.
    ///
    /// Returns `None` while a write is outstanding or when nothing is
    /// staged. A `Write` action registers its events as in flight; the
    /// caller must report completion via [`Self::complete`].
    pub fn take_flush(&mut self) -> Option<FlushAction> {
        if self.in_flight.is_some() {
            return None;
        }
        if !self.open_mutations.is_empty() {
            let cookie = self.next_cookie;
            self.next_cookie += 1;
            let mutations = std::mem::take(&mut self.open_mutations);
            self.open_index.clear();
            let events = std::mem::take(&mut self.open_events);
            self.in_flight = Some(InFlight { cookie, events });
            return Some(FlushAction::Write(WriteBatch::new(cookie, mutations)));
        }
        if !self.open_events.is_empty() {
            return Some(FlushAction::Release(std::mem::take(&mut self.open_events)));
        }
        None
    }

    /// Reports completion of the outstanding write, releasing its events.
    ///
    /// # Panics
    /// Panics if no write is outstanding or the cookie does not match.
    pub fn complete(&mut self, cookie: u64) -> Vec<PartitionEvent> {
        let in_flight = self.in_flight.take().expect("no write in flight");
        assert_eq!(in_flight.cookie, cookie, "write completion cookie mismatch");
        in_flight.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::Cookie;

    fn response(cookie: u64) -> PartitionEvent {
        PartitionEvent::ProxyResponse {
            cookie: Cookie::new(cookie),
            offset: None,
        }
    }

    fn batcher() -> WriteBatcher {
        WriteBatcher::new(Limits::new())
    }

    #[test]
    fn test_flush_carries_mutations_and_parks_events() {
        let mut batcher = batcher();
        batcher.stage_mutation("info/1/a".to_string(), Bytes::from("a1"));
        batcher.stage_event(response(1)).unwrap();

        let Some(FlushAction::Write(batch)) = batcher.take_flush() else {
            panic!("expected a write");
        };
        assert_eq!(batch.writes, vec![("info/1/a".to_string(), Bytes::from("a1"))]);
        assert!(batcher.has_in_flight());

        // Nothing flushes while the write is outstanding.
        batcher.stage_mutation("info/1/b".to_string(), Bytes::from("b1"));
        assert!(batcher.take_flush().is_none());

        let events = batcher.complete(batch.cookie);
        assert_eq!(events, vec![response(1)]);

        // The accumulated batch flushes next.
        let Some(FlushAction::Write(batch)) = batcher.take_flush() else {
            panic!("expected a write");
        };
        assert_eq!(batch.writes[0].0, "info/1/b");
    }

    #[test]
    fn test_mutations_coalesce_per_key() {
        let mut batcher = batcher();
        batcher.stage_mutation("info/1/a".to_string(), Bytes::from("a1"));
        batcher.stage_mutation("info/1/b".to_string(), Bytes::from("b1"));
        batcher.stage_mutation("info/1/a".to_string(), Bytes::from("a2"));

        let Some(FlushAction::Write(batch)) = batcher.take_flush() else {
            panic!("expected a write");
        };
        // Two keys, latest value wins, staging order preserved.
        assert_eq!(
            batch.writes,
            vec![
                ("info/1/a".to_string(), Bytes::from("a2")),
                ("info/1/b".to_string(), Bytes::from("b1")),
            ]
        );
    }

    #[test]
    fn test_event_only_batch_releases_without_write() {
        let mut batcher = batcher();
        batcher.stage_event(response(1)).unwrap();
        batcher.stage_event(response(2)).unwrap();

        let Some(FlushAction::Release(events)) = batcher.take_flush() else {
            panic!("expected a release");
        };
        assert_eq!(events, vec![response(1), response(2)]);
        assert!(batcher.take_flush().is_none());
    }

    #[test]
    fn test_events_release_in_staging_order() {
        let mut batcher = batcher();
        batcher.stage_mutation("k".to_string(), Bytes::from("v"));
        for cookie in 1..=3 {
            batcher.stage_event(response(cookie)).unwrap();
        }

        let Some(FlushAction::Write(batch)) = batcher.take_flush() else {
            panic!("expected a write");
        };
        let events = batcher.complete(batch.cookie);
        assert_eq!(events, vec![response(1), response(2), response(3)]);
    }

    #[test]
    fn test_write_cookies_are_unique() {
        let mut batcher = batcher();
        batcher.stage_mutation("k".to_string(), Bytes::from("v1"));
        let Some(FlushAction::Write(first)) = batcher.take_flush() else {
            panic!("expected a write");
        };
        batcher.complete(first.cookie);

        batcher.stage_mutation("k".to_string(), Bytes::from("v2"));
        let Some(FlushAction::Write(second)) = batcher.take_flush() else {
            panic!("expected a write");
        };
        assert_ne!(first.cookie, second.cookie);
    }

    #[test]
    #[should_panic(expected = "write completion cookie mismatch")]
    fn test_completion_cookie_mismatch_panics() {
        let mut batcher = batcher();
        batcher.stage_mutation("k".to_string(), Bytes::from("v"));
        let Some(FlushAction::Write(batch)) = batcher.take_flush() else {
            panic!("expected a write");
        };
        batcher.complete(batch.cookie + 1);
    }

    #[test]
    fn test_event_limit() {
        let mut limits = Limits::new();
        limits.max_events_per_batch = 1;
        let mut batcher = WriteBatcher::new(limits);

        batcher.stage_event(response(1)).unwrap();
        let err = batcher.stage_event(response(2)).unwrap_err();
        assert!(matches!(err, PartitionError::LimitExceeded { .. }));
    }
}
