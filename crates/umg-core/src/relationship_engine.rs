//! Detects, reinforces, and decays edges between entities. Four pure
//! strategies plus one LLM-backed strategy propose `EdgeCandidate`s; the
//! engine filters, commits them Hebbian-style, then (nightly only) decays
//! and prunes the whole edge set. Narrow `Strategy` implementations feed
//! one orchestrator, which owns the commit/decay/prune protocol.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::UmgResult;
use crate::llm::LlmClient;
use crate::storage::{EdgeFilter, Storage};
use crate::types::{Edge, EdgeKind, EdgeMetadata, Entity, EntityId, EventId};
use crate::vector::{cosine_similarity, EmbeddingService, VectorIndex};

/// One proposed relationship, before commit. `confidence` gates whether it
/// survives filtering; `description` and `source_strategy` are carried into
/// `EdgeMetadata` on first commit only.
#[derive(Debug, Clone)]
pub struct EdgeCandidate {
    pub from_id: EntityId,
    pub to_id: EntityId,
    pub kind: EdgeKind,
    pub confidence: f32,
    pub importance: f32,
    pub description: String,
    pub source_strategy: &'static str,
    pub source_event_id: Option<EventId>,
}

/// A pure, synchronous detection strategy run over a bounded scope of
/// entities. The semantic-LLM strategy is async and is therefore handled
/// directly by `RelationshipEngine` rather than implementing this trait.
pub trait Strategy<S: Storage>: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, storage: &S, scope: &[Entity]) -> UmgResult<Vec<EdgeCandidate>>;
}

/// Splits a role title on its last `" at "` or `", "` separator, returning
/// the organization-name tail a canonical `"<Role> at <X>"` / `"<Role>, <X>"`
/// title implies.
fn role_title_tail(title: &str) -> Option<&str> {
    if let Some(idx) = title.rfind(" at ") {
        return Some(title[idx + 4..].trim());
    }
    if let Some(idx) = title.rfind(", ") {
        return Some(title[idx + 2..].trim());
    }
    None
}

/// Deterministic title-shape matcher: a `role` entity whose title parses as
/// `"<Role> at <X>"` / `"<Role>, <X>"`, where `<X>` matches an existing
/// `organization` entity's title, emits `role_at` at confidence 0.95 — the
/// one canonical title-shape pattern this strategy recognizes.
pub struct PatternStrategy;

impl<S: Storage> Strategy<S> for PatternStrategy {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn detect(&self, _storage: &S, scope: &[Entity]) -> UmgResult<Vec<EdgeCandidate>> {
        let mut candidates = Vec::new();
        for role in scope.iter().filter(|e| e.entity_type == crate::types::EntityType::Role) {
            let Some(tail) = role_title_tail(&role.title) else { continue };
            for org in scope.iter().filter(|e| e.entity_type == crate::types::EntityType::Organization) {
                if org.title.eq_ignore_ascii_case(tail) {
                    candidates.push(EdgeCandidate {
                        from_id: role.id,
                        to_id: org.id,
                        kind: EdgeKind::role_at(),
                        confidence: 0.95,
                        importance: 0.95,
                        description: format!("'{}' is a role at '{}'", role.title, org.title),
                        source_strategy: "pattern",
                        source_event_id: None,
                    });
                }
            }
        }
        Ok(candidates)
    }
}

/// Cosine-similarity strategy over entity summary embeddings, proposing
/// `semantically_related` edges above `embedding_similarity_threshold`.
/// Same-type pairs above 0.95 are treated as likely near-duplicates and
/// skipped rather than auto-merged (open question, resolved in DESIGN.md).
pub struct EmbeddingSimilarityStrategy<E: EmbeddingService> {
    embeddings: Arc<E>,
    threshold: f32,
    vector_index: Option<Arc<RwLock<dyn VectorIndex>>>,
}

impl<E: EmbeddingService> EmbeddingSimilarityStrategy<E> {
    pub fn new(embeddings: Arc<E>, threshold: f32) -> Self {
        Self {
            embeddings,
            threshold,
            vector_index: None,
        }
    }

    /// Shares the index the Entity Resolver's semantic match also reads, so
    /// nightly/full-graph runs query an ANN structure instead of comparing
    /// every pair of scope entities directly.
    pub fn with_vector_index(mut self, index: Arc<RwLock<dyn VectorIndex>>) -> Self {
        self.vector_index = Some(index);
        self
    }
}

impl<S: Storage, E: EmbeddingService> Strategy<S> for EmbeddingSimilarityStrategy<E> {
    fn name(&self) -> &'static str {
        "embedding_similarity"
    }

    fn detect(&self, storage: &S, scope: &[Entity]) -> UmgResult<Vec<EdgeCandidate>> {
        const NEAR_DUPLICATE: f32 = 0.95;
        let model_id = self.embeddings.model_id();

        let mut vectors = Vec::with_capacity(scope.len());
        for entity in scope {
            let chunks = storage.chunks_for_entity(entity.id)?;
            let Some(first) = chunks.first() else { continue };
            let Some(embedding) = storage.get_embedding(first.id, model_id)? else {
                continue;
            };
            vectors.push((entity, first.id, embedding.vector));
        }

        if let Some(index) = self.vector_index.as_ref() {
            return self.detect_indexed(index, &vectors, NEAR_DUPLICATE);
        }

        let mut candidates = Vec::new();
        for i in 0..vectors.len() {
            for j in (i + 1)..vectors.len() {
                let (entity_a, _, vec_a) = &vectors[i];
                let (entity_b, _, vec_b) = &vectors[j];
                let score = cosine_similarity(vec_a, vec_b);
                if let Some(candidate) = Self::candidate_for(entity_a, entity_b, score, self.threshold, NEAR_DUPLICATE) {
                    candidates.push(candidate);
                }
            }
        }
        Ok(candidates)
    }
}

impl<E: EmbeddingService> EmbeddingSimilarityStrategy<E> {
    fn candidate_for(
        entity_a: &Entity,
        entity_b: &Entity,
        score: f32,
        threshold: f32,
        near_duplicate: f32,
    ) -> Option<EdgeCandidate> {
        if score < threshold {
            return None;
        }
        if entity_a.entity_type == entity_b.entity_type && score >= near_duplicate {
            debug!(
                "embedding_similarity: '{}' / '{}' score {score:.3} looks like a near-duplicate, skipping",
                entity_a.title, entity_b.title
            );
            return None;
        }
        Some(EdgeCandidate {
            from_id: entity_a.id,
            to_id: entity_b.id,
            kind: EdgeKind::semantically_related(),
            confidence: score,
            importance: score,
            description: format!("embedding similarity {score:.2}"),
            source_strategy: "embedding_similarity",
            source_event_id: None,
        })
    }

    /// Indexed path: for each scope entity, searches the shared index (which
    /// may span the whole graph) and keeps only hits whose owning entity is
    /// also in `scope`, avoiding the O(scope^2) brute-force pass at nightly
    /// scale.
    fn detect_indexed(
        &self,
        index: &Arc<RwLock<dyn VectorIndex>>,
        vectors: &[(&Entity, crate::types::ChunkId, crate::types::Vector)],
        near_duplicate: f32,
    ) -> UmgResult<Vec<EdgeCandidate>> {
        let scope_ids: HashSet<EntityId> = vectors.iter().map(|(e, _, _)| e.id).collect();
        let chunk_owner: HashMap<crate::types::ChunkId, EntityId> =
            vectors.iter().map(|(e, chunk_id, _)| (*chunk_id, e.id)).collect();
        let by_id: HashMap<EntityId, &Entity> = vectors.iter().map(|(e, _, _)| (e.id, *e)).collect();

        let guard = index.read().map_err(|_| {
            crate::error::UmgError::Config("vector index lock poisoned".to_string())
        })?;

        let mut seen_pairs = HashSet::new();
        let mut candidates = Vec::new();
        for (entity, own_chunk, vector) in vectors {
            let hits = guard.search_threshold(vector, self.threshold, None)?;
            for hit in hits {
                if hit.chunk_id == *own_chunk {
                    continue;
                }
                let Some(&other_id) = chunk_owner.get(&hit.chunk_id) else {
                    // Chunk belongs to an entity outside this run's scope.
                    continue;
                };
                if other_id == entity.id || !scope_ids.contains(&other_id) {
                    continue;
                }
                let pair = if entity.id < other_id {
                    (entity.id, other_id)
                } else {
                    (other_id, entity.id)
                };
                if !seen_pairs.insert(pair) {
                    continue;
                }
                let Some(other) = by_id.get(&other_id) else { continue };
                if let Some(candidate) = Self::candidate_for(entity, other, hit.score, self.threshold, near_duplicate) {
                    candidates.push(candidate);
                }
            }
        }
        drop(guard);
        Ok(candidates)
    }
}

/// Proposes `temporal_overlap` edges between entities whose
/// `(start_date, end_date)` ranges intersect (open ranges treated as
/// ongoing-to-now). Confidence scales with overlap duration: 0.6 under 90 days, 0.7 under 365 days, 0.8 at or beyond.
pub struct TemporalStrategy;

fn overlap_span(
    a_start: chrono::DateTime<Utc>,
    a_end: chrono::DateTime<Utc>,
    b_start: chrono::DateTime<Utc>,
    b_end: chrono::DateTime<Utc>,
) -> Option<chrono::Duration> {
    if a_start <= b_end && b_start <= a_end {
        let overlap_start = a_start.max(b_start);
        let overlap_end = a_end.min(b_end);
        Some(overlap_end - overlap_start)
    } else {
        None
    }
}

fn temporal_confidence(overlap: chrono::Duration) -> f32 {
    let days = overlap.num_days();
    if days < 90 {
        0.6
    } else if days < 365 {
        0.7
    } else {
        0.8
    }
}

impl<S: Storage> Strategy<S> for TemporalStrategy {
    fn name(&self) -> &'static str {
        "temporal"
    }

    fn detect(&self, _storage: &S, scope: &[Entity]) -> UmgResult<Vec<EdgeCandidate>> {
        let now = Utc::now();
        let mut candidates = Vec::new();
        for i in 0..scope.len() {
            for j in (i + 1)..scope.len() {
                let a = &scope[i];
                let b = &scope[j];
                let (Some(a_start), Some(b_start)) = (a.metadata.start_date, b.metadata.start_date) else {
                    continue;
                };
                let a_end = a.metadata.end_date.unwrap_or(now);
                let b_end = b.metadata.end_date.unwrap_or(now);
                if let Some(overlap) = overlap_span(a_start, a_end, b_start, b_end) {
                    let confidence = temporal_confidence(overlap);
                    candidates.push(EdgeCandidate {
                        from_id: a.id,
                        to_id: b.id,
                        kind: EdgeKind::temporal_overlap(),
                        confidence,
                        importance: confidence,
                        description: format!("'{}' and '{}' overlap in time", a.title, b.title),
                        source_strategy: "temporal",
                        source_event_id: None,
                    });
                }
            }
        }
        Ok(candidates)
    }
}

/// Graph-topology strategy: proposes `inferred_connection` edges between
/// entities sharing a common neighbor within 2 hops (triadic closure),
/// bounded to avoid walking the whole graph on a large scope.
pub struct TopologyStrategy;

impl<S: Storage> Strategy<S> for TopologyStrategy {
    fn name(&self) -> &'static str {
        "topology"
    }

    fn detect(&self, storage: &S, scope: &[Entity]) -> UmgResult<Vec<EdgeCandidate>> {
        let mut candidates = Vec::new();
        for entity in scope {
            let mut neighbors = HashSet::new();
            for edge in storage.edges_from(entity.id)? {
                neighbors.insert(edge.to_id);
            }
            for edge in storage.edges_to(entity.id)? {
                neighbors.insert(edge.from_id);
            }

            let mut two_hop = HashSet::new();
            for neighbor_id in &neighbors {
                for edge in storage.edges_from(*neighbor_id)? {
                    if edge.to_id != entity.id && !neighbors.contains(&edge.to_id) {
                        two_hop.insert(edge.to_id);
                    }
                }
                for edge in storage.edges_to(*neighbor_id)? {
                    if edge.from_id != entity.id && !neighbors.contains(&edge.from_id) {
                        two_hop.insert(edge.from_id);
                    }
                }
            }

            for candidate_id in two_hop {
                if storage.edges_between(entity.id, candidate_id)?.is_empty() {
                    candidates.push(EdgeCandidate {
                        from_id: entity.id,
                        to_id: candidate_id,
                        kind: EdgeKind::inferred_connection(),
                        confidence: 0.5,
                        importance: 0.4,
                        description: "shares a common connection".to_string(),
                        source_strategy: "topology",
                        source_event_id: None,
                    });
                }
            }
        }
        Ok(candidates)
    }
}

/// Which scope a run analyzes and how thoroughly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Triggered after an Archivist pass; scope limited to the entities
    /// touched by that event.
    Incremental,
    /// Scheduled, full-graph run: all four sync strategies plus the
    /// semantic-LLM strategy, followed by global decay and pruning.
    Nightly,
    /// Manually triggered via the admin endpoint; same scope rules as
    /// nightly but does not imply decay/prune unless requested.
    OnDemand { run_decay: bool },
}

/// Outcome of one engine run, returned to the caller and logged.
#[derive(Debug, Clone, Default)]
pub struct EngineRunResult {
    pub edges_created: usize,
    pub edges_updated: usize,
    pub edges_decayed: usize,
    pub edges_pruned: usize,
    pub entities_analyzed: usize,
    pub processing_time: Duration,
    pub strategies_used: Vec<&'static str>,
}

pub struct RelationshipEngine<S: Storage, L: LlmClient, E: EmbeddingService> {
    storage: Arc<S>,
    llm: Arc<L>,
    pattern: PatternStrategy,
    embedding: EmbeddingSimilarityStrategy<E>,
    temporal: TemporalStrategy,
    topology: TopologyStrategy,
    config: EngineConfig,
    vector_index: Option<Arc<RwLock<dyn VectorIndex>>>,
}

impl<S: Storage, L: LlmClient, E: EmbeddingService> RelationshipEngine<S, L, E> {
    pub fn new(storage: Arc<S>, llm: Arc<L>, embeddings: Arc<E>, config: EngineConfig) -> Self {
        let embedding = EmbeddingSimilarityStrategy::new(embeddings, config.embedding_similarity_threshold);
        Self {
            storage,
            llm,
            pattern: PatternStrategy,
            embedding,
            temporal: TemporalStrategy,
            topology: TopologyStrategy,
            config,
            vector_index: None,
        }
    }

    /// Shares a chunk-embedding index with the embedding-similarity
    /// strategy (the same one the Entity Resolver reads), so full-graph
    /// runs query an ANN structure instead of an O(scope^2) brute-force pass.
    pub fn with_vector_index(mut self, index: Arc<RwLock<dyn VectorIndex>>) -> Self {
        self.embedding = self.embedding.with_vector_index(index.clone());
        self.vector_index = Some(index);
        self
    }

    /// Runs one cycle over `mode`'s scope. `touched` is the set of entities
    /// to analyze for `Incremental`; ignored for `Nightly`/`OnDemand`, which
    /// analyze the whole graph.
    pub async fn run(&self, mode: RunMode, touched: &[EntityId]) -> UmgResult<EngineRunResult> {
        let start = Instant::now();
        let deadline = matches!(mode, RunMode::Nightly)
            .then(|| start + Duration::from_secs(self.config.nightly_soft_cap_minutes * 60));

        let scope = self.resolve_scope(mode, touched)?;
        let mut result = EngineRunResult {
            entities_analyzed: scope.len(),
            ..Default::default()
        };

        // Full-graph runs fold in every embedding written since the last
        // rebuild before querying it; incremental runs skip this — one
        // archivist event's worth of inserts is cheap enough to wait for
        // the next full run.
        if !matches!(mode, RunMode::Incremental) {
            if let Some(index) = &self.vector_index {
                if let Ok(mut guard) = index.write() {
                    if let Err(e) = guard.rebuild() {
                        warn!("relationship engine: vector index rebuild failed: {e}");
                    }
                }
            }
        }

        let mut candidates = Vec::new();
        for strategy in self.strategies_for_mode(mode) {
            if Self::past_deadline(deadline) {
                warn!("relationship engine: soft cap reached, skipping remaining strategies");
                break;
            }
            match strategy.detect(&self.storage, &scope) {
                Ok(mut found) => {
                    result.strategies_used.push(strategy.name());
                    candidates.append(&mut found);
                }
                Err(e) => warn!("relationship engine: strategy '{}' failed: {e}", strategy.name()),
            }
        }

        if !Self::past_deadline(deadline) {
            match self.semantic_candidates(&scope).await {
                Ok(mut found) => {
                    result.strategies_used.push("semantic_llm");
                    candidates.append(&mut found);
                }
                Err(e) => warn!("relationship engine: semantic strategy failed: {e}"),
            }
        }

        for candidate in candidates {
            match self.commit(candidate) {
                Ok(CommitOutcome::Created) => result.edges_created += 1,
                Ok(CommitOutcome::Reinforced) => result.edges_updated += 1,
                Ok(CommitOutcome::Skipped) => {}
                Err(e) => warn!("relationship engine: commit failed: {e}"),
            }
        }

        let should_decay = matches!(mode, RunMode::Nightly) || matches!(mode, RunMode::OnDemand { run_decay: true });
        if should_decay {
            let (decayed, pruned) = self.decay_and_prune(matches!(mode, RunMode::Nightly))?;
            result.edges_decayed = decayed;
            result.edges_pruned = pruned;
        }

        result.processing_time = start.elapsed();
        Ok(result)
    }

    fn past_deadline(deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Incremental runs use only the two cheap strategies (pattern-based,
    /// semantic LLM — added separately below); nightly/on-demand run all
    /// five.
    fn strategies_for_mode(&self, mode: RunMode) -> Vec<&dyn Strategy<S>> {
        match mode {
            RunMode::Incremental => vec![&self.pattern as &dyn Strategy<S>],
            RunMode::Nightly | RunMode::OnDemand { .. } => {
                vec![&self.pattern, &self.embedding, &self.temporal, &self.topology]
            }
        }
    }

    /// Incremental scope is the event's entities plus up to 50 of the most
    /// recently touched other entities; nightly
    /// and on-demand analyze the whole graph (or caller-specified ids).
    const INCREMENTAL_RECENT_NEIGHBORS: usize = 50;

    fn resolve_scope(&self, mode: RunMode, touched: &[EntityId]) -> UmgResult<Vec<Entity>> {
        match mode {
            RunMode::Incremental => {
                let mut seen: HashSet<EntityId> = HashSet::new();
                let mut entities = Vec::with_capacity(touched.len());
                for id in touched {
                    if seen.insert(*id) {
                        if let Some(e) = self.storage.get_entity(*id)? {
                            entities.push(e);
                        }
                    }
                }

                let recent = self.storage.list_entities(
                    crate::storage::EntityFilter::new().with_limit(Self::INCREMENTAL_RECENT_NEIGHBORS),
                )?;
                for entity in recent {
                    if seen.insert(entity.id) {
                        entities.push(entity);
                    }
                }
                Ok(entities)
            }
            RunMode::Nightly | RunMode::OnDemand { .. } => {
                self.storage.list_entities(crate::storage::EntityFilter::new())
            }
        }
    }

    async fn semantic_candidates(&self, scope: &[Entity]) -> UmgResult<Vec<EdgeCandidate>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let titles: Vec<String> = scope.iter().map(|e| e.title.clone()).collect();
        let by_title: std::collections::HashMap<&str, EntityId> =
            scope.iter().map(|e| (e.title.as_str(), e.id)).collect();

        let context: String = scope
            .iter()
            .map(|e| format!("{}: {}", e.title, e.summary))
            .collect::<Vec<_>>()
            .join("\n");

        let suggestions = self.llm.propose_semantic_edges(&context, &titles).await?;
        let mut candidates = Vec::new();
        for suggestion in suggestions {
            let (Some(&from_id), Some(&to_id)) = (
                by_title.get(suggestion.from_title.as_str()),
                by_title.get(suggestion.to_title.as_str()),
            ) else {
                warn!(
                    "semantic_llm: suggestion references unknown title '{}' or '{}', dropping",
                    suggestion.from_title, suggestion.to_title
                );
                continue;
            };
            if from_id == to_id {
                continue;
            }
            candidates.push(EdgeCandidate {
                from_id,
                to_id,
                kind: EdgeKind::new(suggestion.kind),
                confidence: suggestion.confidence,
                importance: suggestion.confidence,
                description: suggestion.description,
                source_strategy: "semantic_llm",
                source_event_id: None,
            });
        }
        Ok(candidates)
    }

    /// Create-or-reinforce commit protocol.
    /// A `DuplicateEdge` race on create is retried once as a reinforce.
    fn commit(&self, candidate: EdgeCandidate) -> UmgResult<CommitOutcome> {
        if candidate.from_id == candidate.to_id {
            return Ok(CommitOutcome::Skipped);
        }
        if candidate.confidence < self.config.min_confidence {
            return Ok(CommitOutcome::Skipped);
        }
        if self.config.shadow_mode {
            debug!(
                "shadow_mode: would commit {} -> {} ({})",
                candidate.from_id, candidate.to_id, candidate.kind
            );
            return Ok(CommitOutcome::Skipped);
        }

        let existing = self
            .storage
            .get_edge_by_triple(candidate.from_id, candidate.to_id, &candidate.kind)?;

        if let Some(mut edge) = existing {
            self.reinforce(&mut edge, &candidate);
            self.storage.put_edge(&edge)?;
            return Ok(CommitOutcome::Reinforced);
        }

        let now = Utc::now();
        let mut metadata = EdgeMetadata {
            source_strategy: candidate.source_strategy.to_string(),
            ..Default::default()
        };
        metadata.record_event(candidate.source_event_id);
        let edge = Edge {
            id: uuid::Uuid::now_v7(),
            from_id: candidate.from_id,
            to_id: candidate.to_id,
            kind: candidate.kind.clone(),
            confidence: candidate.confidence,
            importance: candidate.importance,
            description: candidate.description.clone(),
            start_date: None,
            end_date: None,
            weight: 1.0,
            last_reinforced_at: now,
            metadata,
            source_event_id: candidate.source_event_id,
            created_at: now,
            updated_at: now,
        };

        match self.storage.put_edge(&edge) {
            Ok(()) => Ok(CommitOutcome::Created),
            Err(crate::error::UmgError::DuplicateEdge { .. }) => {
                // Another concurrent run created it first; retry as reinforce.
                if let Some(mut raced) =
                    self.storage.get_edge_by_triple(candidate.from_id, candidate.to_id, &candidate.kind)?
                {
                    self.reinforce(&mut raced, &candidate);
                    self.storage.put_edge(&raced)?;
                    Ok(CommitOutcome::Reinforced)
                } else {
                    Ok(CommitOutcome::Skipped)
                }
            }
            Err(e) => Err(e),
        }
    }

    fn reinforce(&self, edge: &mut Edge, candidate: &EdgeCandidate) {
        edge.weight += 1.0;
        edge.confidence = edge.confidence.max(candidate.confidence);
        edge.last_reinforced_at = Utc::now();
        edge.updated_at = Utc::now();
        edge.metadata.reinforcement_count += 1;
        edge.metadata.record_event(candidate.source_event_id);
    }

    /// Multiplicative decay of every edge weight by `decay_factor`, followed
    /// by deletion of edges whose weight falls below `prune_threshold`.
    /// Pruning only ever runs immediately after a successful decay pass.
    fn decay_and_prune(&self, prune: bool) -> UmgResult<(usize, usize)> {
        let edges = self.storage.all_edges()?;
        let mut decayed = 0;
        for mut edge in edges {
            edge.weight *= self.config.decay_factor;
            edge.updated_at = Utc::now();
            self.storage.put_edge(&edge)?;
            decayed += 1;
        }

        if !prune {
            return Ok((decayed, 0));
        }

        let prunable = self
            .storage
            .list_edges(EdgeFilter::below_weight(self.config.prune_threshold))?;
        for edge in &prunable {
            self.storage.delete_edge(edge.id)?;
        }
        Ok((decayed, prunable.len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitOutcome {
    Created,
    Reinforced,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ExtractedEntity, GeneratedInsight, SemanticEdgeSuggestion};
    use crate::storage::RedbStorage;
    use crate::types::EntityType;
    use async_trait::async_trait;

    struct NoopLlm;

    #[async_trait]
    impl LlmClient for NoopLlm {
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
        async fn generate_digest_insights(&self, _summary: &str) -> UmgResult<Vec<GeneratedInsight>> {
            Ok(vec![])
        }
    }

    struct FakeEmbeddings;
    impl EmbeddingService for FakeEmbeddings {
        fn embed(&self, _text: &str) -> UmgResult<crate::types::Vector> {
            Ok(vec![0.1, 0.2])
        }
        fn embed_batch(&self, texts: &[String]) -> UmgResult<Vec<crate::types::Vector>> {
            texts.iter().map(|t| self.embed(t)).collect()
        }
        fn dimension(&self) -> usize {
            2
        }
        fn model_id(&self) -> &str {
            "fake-v1"
        }
    }

    fn engine() -> (
        RelationshipEngine<RedbStorage, NoopLlm, FakeEmbeddings>,
        Arc<RedbStorage>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let engine = RelationshipEngine::new(storage.clone(), Arc::new(NoopLlm), Arc::new(FakeEmbeddings), EngineConfig::default());
        (engine, storage, dir)
    }

    fn entity(storage: &RedbStorage, title: &str, kind: EntityType, summary: &str) -> Entity {
        let event_id = uuid::Uuid::now_v7();
        let e = Entity::new(title, kind, summary, event_id);
        storage.put_entity(&e).unwrap();
        storage
            .put_signal(&crate::types::Signal::initial(e.id, kind, Utc::now()))
            .unwrap();
        e
    }

    #[test]
    fn pattern_strategy_detects_role_at_organization() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("u.redb")).unwrap();
        let org = entity(&storage, "Acme Corp", EntityType::Organization, "A company.");
        let role = entity(&storage, "Engineer at Acme Corp", EntityType::Role, "An engineering role.");

        let candidates = PatternStrategy.detect(&storage, &[org, role]).unwrap();
        assert!(candidates.iter().any(|c| c.kind == EdgeKind::role_at()));
    }

    #[tokio::test]
    async fn incremental_run_creates_then_reinforces_same_edge() {
        let (engine, storage, _dir) = engine();
        let org = entity(&storage, "Acme Corp", EntityType::Organization, "A company.");
        let role = entity(&storage, "Engineer at Acme Corp", EntityType::Role, "An engineering role.");

        let first = engine.run(RunMode::Incremental, &[org.id, role.id]).await.unwrap();
        assert_eq!(first.edges_created, 1);

        let second = engine.run(RunMode::Incremental, &[org.id, role.id]).await.unwrap();
        assert_eq!(second.edges_created, 0);
        assert_eq!(second.edges_updated, 1);

        let edges = storage.all_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 2.0);
    }

    #[tokio::test]
    async fn shadow_mode_never_commits() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let mut config = EngineConfig::default();
        config.shadow_mode = true;
        let engine = RelationshipEngine::new(storage.clone(), Arc::new(NoopLlm), Arc::new(FakeEmbeddings), config);

        let org = entity(&storage, "Acme Corp", EntityType::Organization, "A company.");
        let role = entity(&storage, "Engineer at Acme Corp", EntityType::Role, "An engineering role.");
        let result = engine.run(RunMode::Incremental, &[org.id, role.id]).await.unwrap();
        assert_eq!(result.edges_created, 0);
        assert!(storage.all_edges().unwrap().is_empty());
    }

    #[tokio::test]
    async fn low_confidence_candidates_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let mut config = EngineConfig::default();
        config.min_confidence = 0.99;
        let engine = RelationshipEngine::new(storage.clone(), Arc::new(NoopLlm), Arc::new(FakeEmbeddings), config);

        let org = entity(&storage, "Acme Corp", EntityType::Organization, "A company.");
        let role = entity(&storage, "Engineer at Acme Corp", EntityType::Role, "An engineering role.");
        let result = engine.run(RunMode::Incremental, &[org.id, role.id]).await.unwrap();
        assert_eq!(result.edges_created, 0);
    }

    #[test]
    fn decay_multiplies_every_edge_weight_by_decay_factor() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("u.redb")).unwrap();
        let a = entity(&storage, "A", EntityType::Person, "");
        let b = entity(&storage, "B", EntityType::Person, "");
        let c = entity(&storage, "C", EntityType::Person, "");
        let now = Utc::now();

        let make_edge = |from, to, weight: f32, importance: f32| Edge {
            id: uuid::Uuid::now_v7(),
            from_id: from,
            to_id: to,
            kind: EdgeKind::new("knows"),
            confidence: 0.8,
            importance,
            description: String::new(),
            start_date: None,
            end_date: None,
            weight,
            last_reinforced_at: now,
            metadata: Default::default(),
            source_event_id: None,
            created_at: now,
            updated_at: now,
        };

        let low_importance = make_edge(a.id, b.id, 0.5, 0.1);
        let high_importance = make_edge(a.id, c.id, 2.0, 0.9);
        storage.put_edge(&low_importance).unwrap();
        storage.put_edge(&high_importance).unwrap();

        let storage = Arc::new(storage);
        let mut config = EngineConfig::default();
        config.decay_factor = 0.99;
        let engine = RelationshipEngine::new(storage.clone(), Arc::new(NoopLlm), Arc::new(FakeEmbeddings), config);
        engine.decay_and_prune(false).unwrap();

        let low_after = storage.get_edge(low_importance.id).unwrap().unwrap();
        let high_after = storage.get_edge(high_importance.id).unwrap().unwrap();
        assert!((low_after.weight - 0.5 * 0.99).abs() < 1e-6);
        assert!((high_after.weight - 2.0 * 0.99).abs() < 1e-6);
    }

    #[test]
    fn prune_deletes_edges_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("u.redb")).unwrap();
        let a = entity(&storage, "A", EntityType::Person, "");
        let b = entity(&storage, "B", EntityType::Person, "");
        let now = Utc::now();
        let edge = Edge {
            id: uuid::Uuid::now_v7(),
            from_id: a.id,
            to_id: b.id,
            kind: EdgeKind::new("knows"),
            confidence: 0.5,
            importance: 0.0,
            description: String::new(),
            start_date: None,
            end_date: None,
            weight: 0.05,
            last_reinforced_at: now,
            metadata: Default::default(),
            source_event_id: None,
            created_at: now,
            updated_at: now,
        };
        storage.put_edge(&edge).unwrap();

        let storage = Arc::new(storage);
        let engine = RelationshipEngine::new(storage.clone(), Arc::new(NoopLlm), Arc::new(FakeEmbeddings), EngineConfig::default());
        let (_decayed, pruned) = engine.decay_and_prune(true).unwrap();
        assert_eq!(pruned, 1);
        assert!(storage.all_edges().unwrap().is_empty());
    }
}
