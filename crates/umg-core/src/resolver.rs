use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::warn;

use crate::error::UmgResult;
use crate::llm::ExtractedEntity;
use crate::storage::{EntityFilter, Storage};
use crate::types::{Entity, EntityId, EventId, Signal};
use crate::vector::{EmbeddingService, VectorFilter, VectorIndex};

/// Outcome of resolving one candidate entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    ExactMatch,
    AliasMatch,
    FuzzyMatch,
    SemanticMatch,
    Created,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub entity_id: EntityId,
    pub kind: ResolutionKind,
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decides create-new vs. merge-with-existing for extracted entities
///. Matching order: exact title+type, alias, normalized-title
/// fuzzy (Levenshtein ratio), optional semantic (cosine similarity of
/// summary embeddings) — first hit wins, falling back to create.
pub struct EntityResolver<S: Storage, E: EmbeddingService> {
    storage: Arc<S>,
    embeddings: Option<Arc<E>>,
    vector_index: Option<Arc<RwLock<dyn VectorIndex>>>,
    fuzzy_threshold: f64,
    semantic_threshold: f32,
}

impl<S: Storage, E: EmbeddingService> EntityResolver<S, E> {
    pub fn new(storage: Arc<S>, fuzzy_threshold: f64, semantic_threshold: f32) -> Self {
        Self {
            storage,
            embeddings: None,
            vector_index: None,
            fuzzy_threshold,
            semantic_threshold,
        }
    }

    pub fn with_embeddings(mut self, embeddings: Arc<E>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    /// Shares a chunk-embedding index with the caller (typically the same
    /// one the Relationship Engine's embedding-similarity strategy uses) so
    /// semantic match does not re-scan every same-type entity's chunks.
    pub fn with_vector_index(mut self, index: Arc<RwLock<dyn VectorIndex>>) -> Self {
        self.vector_index = Some(index);
        self
    }

    /// Resolve one candidate against the existing graph, persisting either
    /// a merge (mutating the matched entity) or a brand-new Entity + Signal.
    pub fn resolve(&self, candidate: &ExtractedEntity, event_id: EventId) -> UmgResult<Resolution> {
        let same_type = self
            .storage
            .list_entities(EntityFilter::new().with_types(vec![candidate.entity_type]))?;

        if let Some(existing) = same_type
            .iter()
            .find(|e| e.title.eq_ignore_ascii_case(&candidate.title))
        {
            return self.merge(existing.clone(), candidate, event_id, ResolutionKind::ExactMatch);
        }

        if let Some(existing) = same_type.iter().find(|e| {
            e.metadata
                .aliases
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&candidate.title))
        }) {
            return self.merge(existing.clone(), candidate, event_id, ResolutionKind::AliasMatch);
        }

        let normalized_candidate = normalize_title(&candidate.title);
        if let Some(existing) = same_type.iter().find(|e| {
            let ratio = strsim::normalized_levenshtein(&normalized_candidate, &normalize_title(&e.title));
            ratio >= self.fuzzy_threshold
        }) {
            return self.merge(existing.clone(), candidate, event_id, ResolutionKind::FuzzyMatch);
        }

        if let Some(existing) = self.semantic_match(candidate, &same_type) {
            return self.merge(existing, candidate, event_id, ResolutionKind::SemanticMatch);
        }

        self.create(candidate, event_id)
    }

    /// Cosine-similarity fallback. Availability over precision: any
    /// embedding-subsystem failure here is logged and treated as a miss,
    /// letting resolution fall through to create-new.
    fn semantic_match(&self, candidate: &ExtractedEntity, pool: &[Entity]) -> Option<Entity> {
        let embeddings = self.embeddings.as_ref()?;
        let candidate_vec = match embeddings.embed(&candidate.summary) {
            Ok(v) => v,
            Err(e) => {
                warn!("semantic match embedding failed, falling back to create: {e}");
                return None;
            }
        };

        if let Some(index) = self.vector_index.as_ref() {
            return self.semantic_match_indexed(index, &candidate_vec, candidate);
        }

        let mut best: Option<(Entity, f32)> = None;
        for entity in pool {
            let chunks = match self.storage.chunks_for_entity(entity.id) {
                Ok(c) => c,
                Err(_) => continue,
            };
            for chunk in chunks {
                let Ok(Some(emb)) = self.storage.get_embedding(chunk.id, embeddings.model_id()) else {
                    continue;
                };
                let score = crate::vector::cosine_similarity(&candidate_vec, &emb.vector);
                if score >= self.semantic_threshold && best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                    best = Some((entity.clone(), score));
                }
            }
        }
        best.map(|(e, _)| e)
    }

    /// Indexed path: searches the shared vector index restricted to
    /// `candidate.entity_type`, then resolves the best matching chunk back
    /// to its owning entity. Any index/storage error is treated as a miss.
    fn semantic_match_indexed(
        &self,
        index: &Arc<RwLock<dyn VectorIndex>>,
        candidate_vec: &crate::types::Vector,
        candidate: &ExtractedEntity,
    ) -> Option<Entity> {
        let filter = VectorFilter::new().with_entity_types(vec![candidate.entity_type]);
        let guard = index.read().ok()?;
        let hits = guard
            .search_threshold(candidate_vec, self.semantic_threshold, Some(&filter))
            .ok()?;
        drop(guard);

        for hit in hits {
            let Ok(Some(chunk)) = self.storage.get_chunk(hit.chunk_id) else { continue };
            if let Ok(Some(entity)) = self.storage.get_entity(chunk.entity_id) {
                return Some(entity);
            }
        }
        None
    }

    fn merge(
        &self,
        mut entity: Entity,
        candidate: &ExtractedEntity,
        event_id: EventId,
        kind: ResolutionKind,
    ) -> UmgResult<Resolution> {
        entity.reinforce(event_id, &candidate.aliases);
        self.storage.put_entity(&entity)?;
        if let Some(mut signal) = self.storage.get_signal(entity.id)? {
            signal.recency = 1.0;
            signal.last_surfaced_at = Utc::now();
            signal.clamp();
            self.storage.put_signal(&signal)?;
        }
        Ok(Resolution {
            entity_id: entity.id,
            kind,
        })
    }

    fn create(&self, candidate: &ExtractedEntity, event_id: EventId) -> UmgResult<Resolution> {
        let mut entity = Entity::new(
            candidate.title.clone(),
            candidate.entity_type,
            candidate.summary.clone(),
            event_id,
        );
        entity.metadata.aliases = candidate.aliases.clone();
        entity.metadata.start_date = candidate.start_date;
        entity.metadata.end_date = candidate.end_date;
        entity.metadata.mention_count = 1;
        entity.metadata.record_reference(event_id);
        entity.metadata.extra = candidate.metadata.clone();
        self.storage.put_entity(&entity)?;

        let signal = Signal::initial(entity.id, entity.entity_type, Utc::now());
        self.storage.put_signal(&signal)?;

        Ok(Resolution {
            entity_id: entity.id,
            kind: ResolutionKind::Created,
        })
    }
}
