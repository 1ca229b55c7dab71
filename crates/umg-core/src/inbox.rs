use std::sync::Arc;

use crate::error::UmgResult;
use crate::storage::{EventFilter, Storage};
use crate::types::{EventId, EventPayload, EventStatus, RawEvent};

/// Default number of failed attempts before an event is marked `failed`
/// for good.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// FIFO durable capture queue in front of the Archivist.
pub struct EventInbox<S: Storage> {
    storage: Arc<S>,
    max_retries: u32,
}

impl<S: Storage> EventInbox<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(storage: Arc<S>, max_retries: u32) -> Self {
        Self { storage, max_retries }
    }

    /// Writes a RawEvent with `status=pending`. Fails only on storage error.
    pub fn enqueue(
        &self,
        payload: EventPayload,
        source: impl Into<String>,
        user_entity_id: Option<crate::types::EntityId>,
    ) -> UmgResult<EventId> {
        self.enqueue_with_idempotency_key(payload, source, user_entity_id, None)
    }

    /// Like [`Self::enqueue`], but if `idempotency_key` matches an already
    /// ingested event, returns that event's id instead of creating a
    /// duplicate.
    pub fn enqueue_with_idempotency_key(
        &self,
        payload: EventPayload,
        source: impl Into<String>,
        user_entity_id: Option<crate::types::EntityId>,
        idempotency_key: Option<String>,
    ) -> UmgResult<EventId> {
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.storage.find_event_by_idempotency_key(key)? {
                return Ok(existing.id);
            }
        }
        let mut event = RawEvent::new(payload, source);
        event.user_entity_id = user_entity_id;
        event.idempotency_key = idempotency_key;
        self.storage.put_raw_event(&event)?;
        Ok(event.id)
    }

    /// Returns the oldest `limit` pending events. Not an exclusive claim —
    /// correctness relies on Archivist idempotence.
    pub fn claim_pending(&self, limit: usize) -> UmgResult<Vec<RawEvent>> {
        let mut filter = EventFilter::with_status(EventStatus::Pending);
        filter.limit = Some(limit);
        self.storage.list_events(filter)
    }

    pub fn mark_processed(&self, event_id: EventId) -> UmgResult<()> {
        self.storage.set_event_status(event_id, EventStatus::Processed, None)
    }

    /// Marks the event `failed` if it has exhausted `max_retries`, otherwise
    /// leaves it `pending` so the next drain replays it.
    pub fn mark_failed(&self, event_id: EventId, reason: impl Into<String>) -> UmgResult<()> {
        let reason = reason.into();
        let event = self.storage.get_raw_event(event_id)?;
        let retries = event.map(|e| e.retries).unwrap_or(0);
        if retries + 1 >= self.max_retries {
            self.storage.set_event_status(event_id, EventStatus::Failed, Some(reason))
        } else {
            // Stays pending for replay; retries counter bumps in set_event_status
            // only on the Failed transition, so bump it here by round-tripping
            // through a pending status write with the reason recorded.
            self.storage.set_event_status(event_id, EventStatus::Pending, Some(reason))?;
            // set_event_status only increments retries on Failed; bump explicitly.
            if let Some(mut e) = self.storage.get_raw_event(event_id)? {
                e.retries += 1;
                self.storage.put_raw_event(&e)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RedbStorage;

    fn inbox() -> (EventInbox<RedbStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("umg.redb")).unwrap());
        (EventInbox::new(storage), dir)
    }

    fn payload() -> EventPayload {
        EventPayload {
            content: "test content".into(),
            source_type: "capture_form".into(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn enqueue_then_claim_returns_pending_fifo() {
        let (inbox, _dir) = inbox();
        let first = inbox.enqueue(payload(), "capture_form", None).unwrap();
        let _second = inbox.enqueue(payload(), "capture_form", None).unwrap();
        let claimed = inbox.claim_pending(1).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first);
    }

    #[test]
    fn mark_failed_below_threshold_stays_pending() {
        let (inbox, _dir) = inbox();
        let id = inbox.enqueue(payload(), "capture_form", None).unwrap();
        inbox.mark_failed(id, "transient").unwrap();
        let claimed = inbox.claim_pending(10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].retries, 1);
    }

    #[test]
    fn enqueue_with_idempotency_key_replays_existing_event() {
        let (inbox, _dir) = inbox();
        let first = inbox
            .enqueue_with_idempotency_key(payload(), "capture_form", None, Some("req-1".into()))
            .unwrap();
        let replayed = inbox
            .enqueue_with_idempotency_key(payload(), "capture_form", None, Some("req-1".into()))
            .unwrap();
        assert_eq!(first, replayed);
        assert_eq!(inbox.claim_pending(10).unwrap().len(), 1);
    }

    #[test]
    fn mark_failed_past_threshold_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let inbox = EventInbox::with_max_retries(storage, 1);
        let id = inbox.enqueue(payload(), "capture_form", None).unwrap();
        inbox.mark_failed(id, "fatal").unwrap();
        let claimed = inbox.claim_pending(10).unwrap();
        assert!(claimed.is_empty());
    }
}
