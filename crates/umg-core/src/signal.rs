use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{UmgError, UmgResult};
use crate::storage::Storage;
use crate::types::EntityId;

/// Half-life of 30 days: `λ = ln 2 / 30`.
const RECENCY_LAMBDA: f64 = std::f64::consts::LN_2 / 30.0;

/// Feedback step applied to importance on acknowledge/dismiss.
pub const FEEDBACK_DELTA: f32 = 0.1;

/// Maintains `(importance, recency, novelty)` per entity.
pub struct SignalScorer<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> SignalScorer<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Set recency = 1.0, refresh last_surfaced_at. Called on any mention
    /// or acknowledge.
    pub fn on_mention(&self, entity_id: EntityId, now: DateTime<Utc>) -> UmgResult<()> {
        let mut signal = self
            .storage
            .get_signal(entity_id)?
            .ok_or(UmgError::EntityNotFound(entity_id))?;
        signal.recency = 1.0;
        signal.last_surfaced_at = now;
        signal.clamp();
        self.storage.put_signal(&signal)
    }

    /// importance += delta, clamped to [0,1]. `delta` is ±FEEDBACK_DELTA
    /// for acknowledge/dismiss respectively.
    pub fn on_feedback(&self, entity_id: EntityId, delta: f32) -> UmgResult<()> {
        let mut signal = self
            .storage
            .get_signal(entity_id)?
            .ok_or(UmgError::EntityNotFound(entity_id))?;
        signal.importance += delta;
        signal.clamp();
        self.storage.put_signal(&signal)
    }

    /// `(1/(1 + edges·0.1) + 1/(1 + age_days·0.05)) / 2`, persisted.
    pub fn recompute_novelty(&self, entity_id: EntityId, now: DateTime<Utc>) -> UmgResult<()> {
        let entity = self
            .storage
            .get_entity(entity_id)?
            .ok_or(UmgError::EntityNotFound(entity_id))?;
        let mut signal = self
            .storage
            .get_signal(entity_id)?
            .ok_or(UmgError::EntityNotFound(entity_id))?;

        let degree = self.storage.edges_from(entity_id)?.len() + self.storage.edges_to(entity_id)?.len();
        let age_days = (now - entity.created_at).num_seconds() as f64 / 86_400.0;

        let edge_term = 1.0 / (1.0 + degree as f64 * 0.1);
        let age_term = 1.0 / (1.0 + age_days.max(0.0) * 0.05);
        signal.novelty = ((edge_term + age_term) / 2.0) as f32;
        signal.clamp();
        self.storage.put_signal(&signal)
    }

    /// Live decayed recency at `now`, not persisted.
    pub fn materialized_recency(&self, entity_id: EntityId, now: DateTime<Utc>) -> UmgResult<f32> {
        let signal = self
            .storage
            .get_signal(entity_id)?
            .ok_or(UmgError::EntityNotFound(entity_id))?;
        let delta_days = (now - signal.last_surfaced_at).num_seconds() as f64 / 86_400.0;
        let decayed = (-RECENCY_LAMBDA * delta_days.max(0.0)).exp();
        Ok((signal.recency as f64 * decayed).clamp(0.0, 1.0) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RedbStorage;
    use crate::types::{Entity, EntityType, Signal};
    use chrono::Duration;
    use uuid::Uuid;

    fn scorer() -> (SignalScorer<RedbStorage>, Arc<RedbStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        (SignalScorer::new(storage.clone()), storage, dir)
    }

    #[test]
    fn on_feedback_clamps_at_bounds() {
        let (scorer, storage, _dir) = scorer();
        let event_id = Uuid::now_v7();
        let entity = Entity::new("Acme", EntityType::Organization, "", event_id);
        storage.put_entity(&entity).unwrap();
        let mut signal = Signal::initial(entity.id, EntityType::Organization, Utc::now());
        signal.importance = 0.95;
        storage.put_signal(&signal).unwrap();

        scorer.on_feedback(entity.id, FEEDBACK_DELTA).unwrap();
        let s = storage.get_signal(entity.id).unwrap().unwrap();
        assert!((s.importance - 1.0).abs() < 1e-6);

        scorer.on_feedback(entity.id, -10.0).unwrap();
        let s = storage.get_signal(entity.id).unwrap().unwrap();
        assert_eq!(s.importance, 0.0);
    }

    #[test]
    fn materialized_recency_decays_with_half_life() {
        let (scorer, storage, _dir) = scorer();
        let event_id = Uuid::now_v7();
        let entity = Entity::new("Acme", EntityType::Organization, "", event_id);
        storage.put_entity(&entity).unwrap();
        let now = Utc::now();
        let mut signal = Signal::initial(entity.id, EntityType::Organization, now);
        signal.recency = 1.0;
        signal.last_surfaced_at = now - Duration::days(30);
        storage.put_signal(&signal).unwrap();

        let recency = scorer.materialized_recency(entity.id, now).unwrap();
        assert!((recency - 0.5).abs() < 0.01, "expected ~0.5 half-life decay, got {recency}");
    }

    #[test]
    fn recompute_novelty_decreases_with_more_edges() {
        let (scorer, storage, _dir) = scorer();
        let event_id = Uuid::now_v7();
        let a = Entity::new("A", EntityType::Person, "", event_id);
        let b = Entity::new("B", EntityType::Person, "", event_id);
        storage.put_entity(&a).unwrap();
        storage.put_entity(&b).unwrap();
        storage.put_signal(&Signal::initial(a.id, EntityType::Person, Utc::now())).unwrap();

        let now = Utc::now();
        scorer.recompute_novelty(a.id, now).unwrap();
        let isolated = storage.get_signal(a.id).unwrap().unwrap().novelty;

        let edge = crate::types::Edge {
            id: Uuid::now_v7(),
            from_id: a.id,
            to_id: b.id,
            kind: crate::types::EdgeKind::new("knows"),
            confidence: 0.9,
            importance: 0.5,
            description: String::new(),
            start_date: None,
            end_date: None,
            weight: 1.0,
            last_reinforced_at: now,
            metadata: Default::default(),
            source_event_id: None,
            created_at: now,
            updated_at: now,
        };
        storage.put_edge(&edge).unwrap();
        scorer.recompute_novelty(a.id, now).unwrap();
        let connected = storage.get_signal(a.id).unwrap().unwrap().novelty;

        assert!(connected < isolated);
    }
}
