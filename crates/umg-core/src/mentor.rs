//! Query-time context assembly and daily digest generation: ranked
//! sections built from stored entities, signals, and edges.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::error::UmgResult;
use crate::llm::LlmClient;
use crate::signal::SignalScorer;
use crate::storage::{EntityFilter, Storage};
use crate::text::extract_keywords;
use crate::types::{
    DismissedPattern, Edge, Entity, EntityId, EntityType, Insight, InsightDrivers, InsightStatus,
};

const HIGH_PRIORITY_CAP: usize = 10;
const ACTIVE_WORK_CAP: usize = 10;
const RELEVANT_ENTITIES_CAP: usize = 10;
const RELATIONSHIP_EDGES_PER_ENTITY: usize = 5;
const HIGH_PRIORITY_FLOOR: f32 = 0.7;
const ACTIVE_WORK_FLOOR: f32 = 0.8;

/// One turn of caller-supplied conversation history (chat only; not
/// persisted by the assembler itself).
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// A relationship paired with the neighbor entity it connects to, as
/// surfaced to the mentor prompt.
#[derive(Debug, Clone)]
pub struct RelationshipContext {
    pub edge: Edge,
    pub neighbor: Entity,
}

/// The ranked context bundle assembled for one chat turn or digest run
///. Ordering within each list is stable given identical DB state;
/// no list exceeds its cap; within a list entities are deduplicated by id.
#[derive(Debug, Clone, Default)]
pub struct MentorContext {
    pub core_identity: Vec<Entity>,
    pub high_priority: Vec<Entity>,
    pub active_work: Vec<Entity>,
    pub relevant_entities: Vec<Entity>,
    pub relationships: Vec<RelationshipContext>,
    pub conversation_history: Vec<ConversationTurn>,
}

impl MentorContext {
    /// Flattened count summary for the chat endpoint's `context_used` field.
    pub fn counts(&self) -> ContextUsedCounts {
        ContextUsedCounts {
            core_identity_count: self.core_identity.len(),
            high_priority_count: self.high_priority.len(),
            active_work_count: self.active_work.len(),
            relevant_entities_count: self.relevant_entities.len(),
            relationships_count: self.relationships.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextUsedCounts {
    pub core_identity_count: usize,
    pub high_priority_count: usize,
    pub active_work_count: usize,
    pub relevant_entities_count: usize,
    pub relationships_count: usize,
}

fn dedup_by_id(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(e.id))
        .collect()
}

/// Builds `MentorContext` from current database state. One instance is
/// cheap to construct per request; it borrows storage/scorer by reference.
pub struct ContextAssembler<S: Storage> {
    storage: Arc<S>,
    scorer: SignalScorer<S>,
}

impl<S: Storage> ContextAssembler<S> {
    pub fn new(storage: Arc<S>) -> Self {
        let scorer = SignalScorer::new(storage.clone());
        Self { storage, scorer }
    }

    /// Assembles context for `message` (empty string for digest runs, which
    /// have no keyword-matched `relevant_entities`).
    pub fn assemble(
        &self,
        message: &str,
        conversation_history: Vec<ConversationTurn>,
    ) -> UmgResult<MentorContext> {
        let now = Utc::now();
        let all_entities = self.storage.list_entities(EntityFilter::new())?;

        let core_identity: Vec<Entity> = all_entities
            .iter()
            .filter(|e| e.entity_type == EntityType::CoreIdentity)
            .cloned()
            .collect();

        let mut scored = Vec::with_capacity(all_entities.len());
        for entity in &all_entities {
            if let Some(signal) = self.storage.get_signal(entity.id)? {
                let recency = self
                    .scorer
                    .materialized_recency(entity.id, now)
                    .unwrap_or(signal.recency);
                scored.push((entity.clone(), signal.importance, recency));
            }
        }

        let mut high_priority: Vec<_> = scored
            .iter()
            .filter(|(_, importance, _)| *importance >= HIGH_PRIORITY_FLOOR)
            .collect();
        high_priority.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let high_priority = dedup_by_id(
            high_priority
                .into_iter()
                .take(HIGH_PRIORITY_CAP)
                .map(|(e, _, _)| e.clone())
                .collect(),
        );

        let mut active_work: Vec<_> = scored
            .iter()
            .filter(|(_, _, recency)| *recency >= ACTIVE_WORK_FLOOR)
            .collect();
        active_work.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        let active_work = dedup_by_id(
            active_work
                .into_iter()
                .take(ACTIVE_WORK_CAP)
                .map(|(e, _, _)| e.clone())
                .collect(),
        );

        let keywords = extract_keywords(message, 20);
        let relevant_entities = dedup_by_id(
            all_entities
                .iter()
                .filter(|e| {
                    !keywords.is_empty()
                        && keywords.iter().any(|k| e.title.to_lowercase().contains(k.as_str()))
                })
                .take(RELEVANT_ENTITIES_CAP)
                .cloned()
                .collect(),
        );

        let mut relationship_sources = relevant_entities.clone();
        relationship_sources.sort_by_key(|e| e.id);
        let relationships = self.gather_relationships(&relationship_sources)?;

        Ok(MentorContext {
            core_identity,
            high_priority,
            active_work,
            relevant_entities,
            relationships,
            conversation_history,
        })
    }

    fn gather_relationships(&self, entities: &[Entity]) -> UmgResult<Vec<RelationshipContext>> {
        let mut seen_edges = HashSet::new();
        let mut out = Vec::new();
        for entity in entities {
            let mut outgoing = self.storage.edges_from(entity.id)?;
            outgoing.truncate(RELATIONSHIP_EDGES_PER_ENTITY);
            let mut incoming = self.storage.edges_to(entity.id)?;
            incoming.truncate(RELATIONSHIP_EDGES_PER_ENTITY);

            for edge in outgoing.into_iter().chain(incoming) {
                if !seen_edges.insert(edge.id) {
                    continue;
                }
                let neighbor_id = if edge.from_id == entity.id { edge.to_id } else { edge.from_id };
                if let Some(neighbor) = self.storage.get_entity(neighbor_id)? {
                    out.push(RelationshipContext { edge, neighbor });
                }
            }
        }
        Ok(out)
    }
}

/// Renders a `MentorContext` into plain text for an LLM prompt. Kept
/// separate from assembly so chat and digest generation can format
/// differently if they diverge later.
pub fn render_context_summary(context: &MentorContext, dismissed_hint: &str) -> String {
    let mut out = String::new();
    out.push_str("core identity:\n");
    for e in &context.core_identity {
        out.push_str(&format!("- {} ({}): {}\n", e.title, e.entity_type.as_str(), e.summary));
    }
    out.push_str("\nhigh priority:\n");
    for e in &context.high_priority {
        out.push_str(&format!("- [{}] {}: {}\n", e.id, e.title, e.summary));
    }
    out.push_str("\nactive work:\n");
    for e in &context.active_work {
        out.push_str(&format!("- [{}] {}: {}\n", e.id, e.title, e.summary));
    }
    out.push_str("\nrelevant entities:\n");
    for e in &context.relevant_entities {
        out.push_str(&format!("- [{}] {}: {}\n", e.id, e.title, e.summary));
    }
    out.push_str("\nrelationships:\n");
    for r in &context.relationships {
        out.push_str(&format!(
            "- {} -[{}]-> {}\n",
            r.edge.from_id, r.edge.kind, r.neighbor.title
        ));
    }
    if !dismissed_hint.is_empty() {
        out.push_str("\npreviously dismissed:\n");
        out.push_str(dismissed_hint);
    }
    out
}

/// Generates the three daily-digest insights (Delta Watch / Connection /
/// Prompt), each an LLM call grounded in the assembled context plus the
/// last-30-days `DismissedPattern`s of the matching type, so the model can
/// avoid repeating itself.
pub struct DigestGenerator<S: Storage, L: LlmClient> {
    storage: Arc<S>,
    llm: Arc<L>,
    assembler: ContextAssembler<S>,
}

const DIGEST_TYPES: [&str; 3] = ["delta_watch", "connection", "prompt"];
const DISMISSED_PATTERN_WINDOW_DAYS: i64 = 30;

impl<S: Storage, L: LlmClient> DigestGenerator<S, L> {
    pub fn new(storage: Arc<S>, llm: Arc<L>) -> Self {
        let assembler = ContextAssembler::new(storage.clone());
        Self { storage, llm, assembler }
    }

    pub async fn generate(&self) -> UmgResult<Vec<Insight>> {
        let context = self.assembler.assemble("", Vec::new())?;
        let dismissed = self.storage.list_dismissed_patterns()?;
        let now = Utc::now();

        let mut insights = Vec::new();
        for insight_type in DIGEST_TYPES {
            let recent: Vec<&DismissedPattern> = dismissed
                .iter()
                .filter(|p| {
                    p.insight_type == insight_type
                        && (now - p.last_dismissed_at).num_days() <= DISMISSED_PATTERN_WINDOW_DAYS
                })
                .collect();
            let dismissed_hint = recent
                .iter()
                .map(|p| format!("- {}", p.pattern_signature.keywords.join(", ")))
                .collect::<Vec<_>>()
                .join("\n");

            let summary = format!(
                "insight_type: {insight_type}\n\n{}",
                render_context_summary(&context, &dismissed_hint)
            );

            let generated = match self.llm.generate_digest_insights(&summary).await {
                Ok(g) => g,
                Err(e) => {
                    warn!("digest generation failed for '{insight_type}': {e}");
                    continue;
                }
            };

            for candidate in generated {
                if candidate.insight_type != insight_type {
                    continue;
                }
                let valid_ids = self.validate_driver_ids(&candidate.driver_entity_ids)?;
                if valid_ids.is_empty() && !candidate.driver_entity_ids.is_empty() {
                    warn!(
                        "digest generation: none of the proposed driver ids for '{}' exist, dropping",
                        candidate.title
                    );
                    continue;
                }
                let insight = Insight {
                    id: uuid::Uuid::now_v7(),
                    title: candidate.title,
                    body: candidate.body,
                    drivers: InsightDrivers {
                        entity_ids: valid_ids,
                        edge_ids: Vec::new(),
                        insight_type: insight_type.to_string(),
                        metadata: Default::default(),
                    },
                    status: InsightStatus::Open,
                    created_at: now,
                    updated_at: now,
                };
                self.storage.put_insight(&insight)?;
                insights.push(insight);
            }
        }
        Ok(insights)
    }

    fn validate_driver_ids(&self, ids: &[EntityId]) -> UmgResult<Vec<EntityId>> {
        let mut valid = Vec::with_capacity(ids.len());
        for id in ids {
            if self.storage.get_entity(*id)?.is_some() {
                valid.push(*id);
            }
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ExtractedEntity, GeneratedInsight, SemanticEdgeSuggestion};
    use crate::storage::RedbStorage;
    use crate::types::{EdgeKind, EdgeMetadata, Signal};
    use async_trait::async_trait;
    use uuid::Uuid;

    fn put_entity_with_signal(storage: &RedbStorage, title: &str, kind: EntityType, importance: f32, recency: f32) -> Entity {
        let event_id = Uuid::now_v7();
        let e = Entity::new(title, kind, format!("About {title}."), event_id);
        storage.put_entity(&e).unwrap();
        let mut signal = Signal::initial(e.id, kind, Utc::now());
        signal.importance = importance;
        signal.recency = recency;
        storage.put_signal(&signal).unwrap();
        e
    }

    #[test]
    fn core_identity_and_high_priority_and_active_work_are_populated() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let assembler = ContextAssembler::new(storage.clone());

        let identity = put_entity_with_signal(&storage, "Ryan York", EntityType::CoreIdentity, 1.0, 1.0);
        let important = put_entity_with_signal(&storage, "Water OS", EntityType::Project, 0.85, 0.95);
        let _unimportant = put_entity_with_signal(&storage, "Old Task", EntityType::Task, 0.2, 0.1);

        let context = assembler.assemble("", Vec::new()).unwrap();
        assert_eq!(context.core_identity.len(), 1);
        assert_eq!(context.core_identity[0].id, identity.id);
        assert!(context.high_priority.iter().any(|e| e.id == important.id));
        assert!(context.active_work.iter().any(|e| e.id == important.id));
    }

    #[test]
    fn relevant_entities_matches_by_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let assembler = ContextAssembler::new(storage.clone());

        let water_os = put_entity_with_signal(&storage, "Water OS", EntityType::Project, 0.5, 0.1);
        let _other = put_entity_with_signal(&storage, "Unrelated Thing", EntityType::Task, 0.5, 0.1);

        let context = assembler.assemble("What's next for Water OS?", Vec::new()).unwrap();
        assert!(context.relevant_entities.iter().any(|e| e.id == water_os.id));
        assert!(!context.relevant_entities.iter().any(|e| e.id == _other.id));
    }

    #[test]
    fn relationships_are_deduplicated_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let assembler = ContextAssembler::new(storage.clone());

        let a = put_entity_with_signal(&storage, "Ryan York", EntityType::Person, 0.9, 0.9);
        let b = put_entity_with_signal(&storage, "Water OS", EntityType::Project, 0.9, 0.9);
        let now = Utc::now();
        let edge = Edge {
            id: Uuid::now_v7(),
            from_id: a.id,
            to_id: b.id,
            kind: EdgeKind::new("founded"),
            confidence: 0.9,
            importance: 0.9,
            description: String::new(),
            start_date: None,
            end_date: None,
            weight: 1.0,
            last_reinforced_at: now,
            metadata: EdgeMetadata::default(),
            source_event_id: None,
            created_at: now,
            updated_at: now,
        };
        storage.put_edge(&edge).unwrap();

        let context = assembler.assemble("Ryan York Water", Vec::new()).unwrap();
        assert_eq!(context.relationships.len(), 1);
    }

    struct StaticDigestLlm;

    #[async_trait]
    impl LlmClient for StaticDigestLlm {
        async fn extract_entities(&self, _text: &str, _hint: &str) -> UmgResult<Vec<ExtractedEntity>> {
            Ok(vec![])
        }
        async fn propose_semantic_edges(
            &self,
            _text: &str,
            _titles: &[String],
        ) -> UmgResult<Vec<SemanticEdgeSuggestion>> {
            Ok(vec![])
        }
        async fn generate_digest_insights(&self, context_summary: &str) -> UmgResult<Vec<GeneratedInsight>> {
            let insight_type = context_summary
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("insight_type: "))
                .unwrap_or("delta_watch")
                .to_string();
            Ok(vec![GeneratedInsight {
                title: format!("{insight_type} insight"),
                body: "generated body".to_string(),
                insight_type,
                driver_entity_ids: vec![],
            }])
        }
    }

    #[tokio::test]
    async fn generate_digest_produces_one_insight_per_type() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let generator = DigestGenerator::new(storage.clone(), Arc::new(StaticDigestLlm));

        let insights = generator.generate().await.unwrap();
        assert_eq!(insights.len(), 3);
        assert_eq!(storage.list_insights(Default::default()).unwrap().len(), 3);
    }

    struct DanglingIdLlm;

    #[async_trait]
    impl LlmClient for DanglingIdLlm {
        async fn extract_entities(&self, _text: &str, _hint: &str) -> UmgResult<Vec<ExtractedEntity>> {
            Ok(vec![])
        }
        async fn propose_semantic_edges(
            &self,
            _text: &str,
            _titles: &[String],
        ) -> UmgResult<Vec<SemanticEdgeSuggestion>> {
            Ok(vec![])
        }
        async fn generate_digest_insights(&self, context_summary: &str) -> UmgResult<Vec<GeneratedInsight>> {
            let insight_type = context_summary
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("insight_type: "))
                .unwrap_or("delta_watch")
                .to_string();
            Ok(vec![GeneratedInsight {
                title: "bogus".to_string(),
                body: "body".to_string(),
                insight_type,
                driver_entity_ids: vec![Uuid::now_v7()],
            }])
        }
    }

    #[tokio::test]
    async fn digest_drops_insights_whose_driver_ids_do_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let generator = DigestGenerator::new(storage.clone(), Arc::new(DanglingIdLlm));

        let insights = generator.generate().await.unwrap();
        assert!(insights.is_empty());
    }
}
