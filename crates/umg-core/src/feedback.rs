//! Acknowledge/dismiss handling for surfaced insights. Acknowledging an
//! insight reinforces its driver entities' importance and recency;
//! dismissing one lowers their importance and records a pattern fingerprint
//! so repeated similar dismissals accumulate onto one `DismissedPattern`
//! rather than piling up duplicates. The ranked-section assembly this
//! feeds back into lives in `briefing/engine.rs`-style context building —
//! see `mentor.rs`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{UmgError, UmgResult};
use crate::signal::{SignalScorer, FEEDBACK_DELTA};
use crate::storage::Storage;
use crate::text::{extract_keywords, overlap_ratio};
use crate::types::{DismissedPattern, EntityType, Insight, InsightId, InsightStatus, PatternSignature};

const PATTERN_KEYWORD_CAP: usize = 10;
const OVERLAP_THRESHOLD: f64 = 0.5;

/// Processes feedback on `Insight`s: acknowledge reinforces the driver
/// entities' signals, dismiss penalizes them and records a pattern
/// signature so future digests can avoid repeating the same shape.
pub struct FeedbackProcessor<S: Storage> {
    storage: Arc<S>,
    scorer: SignalScorer<S>,
}

impl<S: Storage> FeedbackProcessor<S> {
    pub fn new(storage: Arc<S>) -> Self {
        let scorer = SignalScorer::new(storage.clone());
        Self { storage, scorer }
    }

    /// importance += FEEDBACK_DELTA, recency := 1.0, last_surfaced_at := now
    /// for every driver entity; insight.status := Acknowledged. Only valid
    /// on an `Open` insight; any other status is a no-op error, with no
    /// side effects applied.
    pub fn acknowledge(&self, insight_id: InsightId) -> UmgResult<Insight> {
        let mut insight = self
            .storage
            .get_insight(insight_id)?
            .ok_or(UmgError::EntityNotFound(insight_id))?;

        if insight.status != InsightStatus::Open {
            return Err(UmgError::InvalidState(format!(
                "insight {insight_id} is not open (status: {:?})",
                insight.status
            )));
        }

        let now = Utc::now();
        for entity_id in &insight.drivers.entity_ids {
            self.scorer.on_feedback(*entity_id, FEEDBACK_DELTA)?;
            self.scorer.on_mention(*entity_id, now)?;
        }

        insight.status = InsightStatus::Acknowledged;
        insight.updated_at = now;
        self.storage.put_insight(&insight)?;
        Ok(insight)
    }

    /// importance -= FEEDBACK_DELTA for every driver entity; extracts a
    /// `PatternSignature` and either reinforces an existing `DismissedPattern`
    /// (same insight_type, ≥50% overlap in driver entity types AND title
    /// keywords) or inserts a new one; insight.status := Dismissed.
    pub fn dismiss(&self, insight_id: InsightId) -> UmgResult<Insight> {
        let mut insight = self
            .storage
            .get_insight(insight_id)?
            .ok_or(UmgError::EntityNotFound(insight_id))?;

        if insight.status != InsightStatus::Open {
            return Err(UmgError::InvalidState(format!(
                "insight {insight_id} is not open (status: {:?})",
                insight.status
            )));
        }

        for entity_id in &insight.drivers.entity_ids {
            self.scorer.on_feedback(*entity_id, -FEEDBACK_DELTA)?;
        }

        let now = Utc::now();
        let driver_entity_types = self.driver_entity_types(&insight.drivers.entity_ids)?;
        let mut keywords = extract_keywords(&insight.title, PATTERN_KEYWORD_CAP);
        keywords.extend(extract_keywords(&insight.body, PATTERN_KEYWORD_CAP));
        keywords.truncate(PATTERN_KEYWORD_CAP * 2);

        self.record_dismissal(
            &insight.drivers.insight_type,
            &driver_entity_types,
            keywords,
            insight.drivers.entity_ids.clone(),
            now,
        )?;

        insight.status = InsightStatus::Dismissed;
        insight.updated_at = now;
        self.storage.put_insight(&insight)?;
        Ok(insight)
    }

    fn driver_entity_types(&self, entity_ids: &[crate::types::EntityId]) -> UmgResult<Vec<EntityType>> {
        let mut types = Vec::with_capacity(entity_ids.len());
        for id in entity_ids {
            if let Some(entity) = self.storage.get_entity(*id)? {
                types.push(entity.entity_type);
            }
        }
        Ok(types)
    }

    fn record_dismissal(
        &self,
        insight_type: &str,
        driver_entity_types: &[EntityType],
        keywords: Vec<String>,
        entity_ids: Vec<crate::types::EntityId>,
        now: chrono::DateTime<Utc>,
    ) -> UmgResult<()> {
        let existing = self
            .storage
            .list_dismissed_patterns()?
            .into_iter()
            .find(|p| {
                p.insight_type == insight_type
                    && overlap_ratio(driver_entity_types, &p.driver_entity_types) >= OVERLAP_THRESHOLD
                    && overlap_ratio(&keywords, &p.pattern_signature.keywords) >= OVERLAP_THRESHOLD
            });

        match existing {
            Some(mut pattern) => {
                pattern.dismissed_count += 1;
                pattern.last_dismissed_at = now;
                self.storage.put_dismissed_pattern(&pattern)
            }
            None => {
                let pattern = DismissedPattern {
                    id: uuid::Uuid::now_v7(),
                    insight_type: insight_type.to_string(),
                    driver_entity_types: driver_entity_types.to_vec(),
                    pattern_signature: PatternSignature { keywords, entity_ids },
                    dismissed_count: 1,
                    first_dismissed_at: now,
                    last_dismissed_at: now,
                };
                self.storage.put_dismissed_pattern(&pattern)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RedbStorage;
    use crate::types::{Entity, InsightDrivers, Signal};
    use uuid::Uuid;

    fn processor() -> (FeedbackProcessor<RedbStorage>, Arc<RedbStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        (FeedbackProcessor::new(storage.clone()), storage, dir)
    }

    fn open_insight(storage: &RedbStorage, driver: crate::types::EntityId, title: &str) -> Insight {
        let now = Utc::now();
        let insight = Insight {
            id: Uuid::now_v7(),
            title: title.to_string(),
            body: "because of recent activity on the project".to_string(),
            drivers: InsightDrivers {
                entity_ids: vec![driver],
                edge_ids: vec![],
                insight_type: "delta_watch".to_string(),
                metadata: Default::default(),
            },
            status: InsightStatus::Open,
            created_at: now,
            updated_at: now,
        };
        storage.put_insight(&insight).unwrap();
        insight
    }

    #[test]
    fn acknowledge_boosts_importance_and_recency() {
        let (processor, storage, _dir) = processor();
        let event_id = Uuid::now_v7();
        let entity = Entity::new("Water OS", EntityType::Project, "", event_id);
        storage.put_entity(&entity).unwrap();
        let mut signal = Signal::initial(entity.id, EntityType::Project, Utc::now() - chrono::Duration::days(10));
        signal.importance = 0.5;
        signal.recency = 0.3;
        storage.put_signal(&signal).unwrap();
        let insight = open_insight(&storage, entity.id, "Water OS launch approaching");

        let updated = processor.acknowledge(insight.id).unwrap();
        assert_eq!(updated.status, InsightStatus::Acknowledged);

        let signal = storage.get_signal(entity.id).unwrap().unwrap();
        assert!((signal.importance - 0.6).abs() < 1e-6);
        assert_eq!(signal.recency, 1.0);
    }

    #[test]
    fn acknowledge_non_open_insight_is_rejected_without_side_effects() {
        let (processor, storage, _dir) = processor();
        let event_id = Uuid::now_v7();
        let entity = Entity::new("Water OS", EntityType::Project, "", event_id);
        storage.put_entity(&entity).unwrap();
        storage
            .put_signal(&Signal::initial(entity.id, EntityType::Project, Utc::now()))
            .unwrap();
        let insight = open_insight(&storage, entity.id, "Water OS launch approaching");
        processor.acknowledge(insight.id).unwrap();

        let result = processor.acknowledge(insight.id);
        assert!(matches!(result, Err(UmgError::InvalidState(_))));

        let signal = storage.get_signal(entity.id).unwrap().unwrap();
        assert_eq!(signal.importance, EntityType::Project.default_importance());
    }

    #[test]
    fn dismiss_lowers_importance_and_records_pattern() {
        let (processor, storage, _dir) = processor();
        let event_id = Uuid::now_v7();
        let entity = Entity::new("Water OS", EntityType::Project, "", event_id);
        storage.put_entity(&entity).unwrap();
        let mut signal = Signal::initial(entity.id, EntityType::Project, Utc::now());
        signal.importance = 0.5;
        storage.put_signal(&signal).unwrap();
        let insight = open_insight(&storage, entity.id, "Water OS launch approaching soon");

        let updated = processor.dismiss(insight.id).unwrap();
        assert_eq!(updated.status, InsightStatus::Dismissed);

        let signal = storage.get_signal(entity.id).unwrap().unwrap();
        assert!((signal.importance - 0.4).abs() < 1e-6);

        let patterns = storage.list_dismissed_patterns().unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].dismissed_count, 1);
    }

    #[test]
    fn repeated_similar_dismissals_reinforce_one_pattern() {
        let (processor, storage, _dir) = processor();
        let event_id = Uuid::now_v7();
        let entity = Entity::new("Water OS", EntityType::Project, "", event_id);
        storage.put_entity(&entity).unwrap();
        storage
            .put_signal(&Signal::initial(entity.id, EntityType::Project, Utc::now()))
            .unwrap();

        let first = open_insight(&storage, entity.id, "Water OS launch approaching soon");
        processor.dismiss(first.id).unwrap();

        let second = open_insight(&storage, entity.id, "Water OS launch timeline approaching");
        processor.dismiss(second.id).unwrap();

        let patterns = storage.list_dismissed_patterns().unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].dismissed_count, 2);
    }
}
