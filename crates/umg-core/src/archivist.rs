//! The staged ingestion pipeline: clean → reference-resolve →
//! extract → resolve/persist → snapshot → chunk → embed → score → trigger →
//! finalize. One orchestrator method composes narrow, individually-idempotent
//! stages, each logging and skipping its own per-item failures rather than
//! aborting the whole event.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::UmgResult;
use crate::inbox::EventInbox;
use crate::llm::{ExtractedEntity, LlmClient};
use crate::resolver::EntityResolver;
use crate::signal::SignalScorer;
use crate::storage::Storage;
use crate::text::{chunk_text, clean_text};
use crate::types::{Chunk, EmbeddingRecord, EntityId, EventId, EventPayload, RawEvent};
use crate::vector::{embedding_input, EmbeddingService, VectorIndex};

/// Per-event map from a pronoun/short name to the entity id it resolves to.
/// Seeded from the capturing user's pinned entity so first-person pronouns
/// resolve without an LLM round trip.
pub type ReferenceMap = HashMap<String, EntityId>;

const FIRST_PERSON_PRONOUNS: [&str; 4] = ["i", "me", "my", "myself"];

fn build_reference_map(user_entity_id: Option<EntityId>) -> ReferenceMap {
    let mut map = ReferenceMap::new();
    if let Some(id) = user_entity_id {
        for pronoun in FIRST_PERSON_PRONOUNS {
            map.insert(pronoun.to_string(), id);
        }
    }
    map
}

/// Observable side effects of processing one event, returned for logging/testing — the engine trigger is left to
/// the caller, which enqueues `trigger_entity_ids` into whichever
/// Relationship Engine mode it runs.
#[derive(Debug, Clone, Default)]
pub struct ArchivistResult {
    pub event_id: EventId,
    pub entities_created: usize,
    pub entities_reinforced: usize,
    pub chunks_written: usize,
    pub embeddings_written: usize,
    /// Entities attributable to this event, threaded to the
    /// Relationship Engine's incremental trigger.
    pub trigger_entity_ids: Vec<EntityId>,
}

/// Turns one `RawEvent` into entities/chunks/embeddings/signals, preserving
/// I1–I7. Every stage is idempotent: replaying an already-processed event
/// reinforces existing rows rather than duplicating them.
pub struct Archivist<S: Storage, L: LlmClient, E: EmbeddingService> {
    storage: Arc<S>,
    inbox: EventInbox<S>,
    llm: Arc<L>,
    embeddings: Arc<E>,
    resolver: EntityResolver<S, E>,
    scorer: SignalScorer<S>,
    config: EngineConfig,
    vector_index: Option<Arc<RwLock<dyn VectorIndex>>>,
}

impl<S: Storage, L: LlmClient, E: EmbeddingService> Archivist<S, L, E> {
    pub fn new(storage: Arc<S>, llm: Arc<L>, embeddings: Arc<E>, config: EngineConfig) -> Self {
        let resolver = EntityResolver::new(
            storage.clone(),
            config.fuzzy_match_threshold,
            config.embedding_similarity_threshold,
        )
        .with_embeddings(embeddings.clone());
        let scorer = SignalScorer::new(storage.clone());
        let inbox = EventInbox::with_max_retries(storage.clone(), config.max_event_retries);
        Self {
            storage,
            inbox,
            llm,
            embeddings,
            resolver,
            scorer,
            config,
            vector_index: None,
        }
    }

    /// Shares a chunk-embedding index with the resolver and relationship
    /// engine; every embedding this Archivist writes is mirrored into it.
    pub fn with_vector_index(mut self, index: Arc<RwLock<dyn VectorIndex>>) -> Self {
        self.resolver = self.resolver.with_vector_index(index.clone());
        self.vector_index = Some(index);
        self
    }

    /// Drains up to `limit` pending events and processes each in turn
    /// (`POST /process`, the Archivist's poll-loop body).
    pub async fn drain_pending(&self, limit: usize) -> UmgResult<Vec<ArchivistResult>> {
        let pending = self.inbox.claim_pending(limit)?;

        let mut results = Vec::with_capacity(pending.len());
        for event in pending {
            match self.process_one(&event).await {
                Ok(result) => {
                    self.inbox.mark_processed(event.id)?;
                    results.push(result);
                }
                Err(e) => {
                    warn!("archivist: event {} failed, retrying later: {e}", event.id);
                    self.inbox.mark_failed(event.id, e.to_string())?;
                }
            }
        }
        Ok(results)
    }

    /// Runs stages 1–9 for one event. Finalization (stage 10, marking the
    /// event `processed`) is the caller's responsibility so that a fatal
    /// error here leaves the event `pending` for replay.
    pub async fn process_one(&self, event: &RawEvent) -> UmgResult<ArchivistResult> {
        // Stage 1: clean.
        let cleaned = clean_text(&event.payload.content);

        // Stage 2: reference resolution.
        let reference_map = build_reference_map(event.user_entity_id);
        let reference_hint = reference_map
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");

        // Stage 3: entity extraction.
        let candidates = self.llm.extract_entities(&cleaned, &reference_hint).await?;

        // Stage 4: resolution and persistence, in order of appearance so a
        // repeated candidate within one event resolves deterministically.
        let mut result = ArchivistResult {
            event_id: event.id,
            ..Default::default()
        };
        let mut candidate_entity_ids = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match self.resolver.resolve(candidate, event.id) {
                Ok(resolution) => {
                    match resolution.kind {
                        crate::resolver::ResolutionKind::Created => result.entities_created += 1,
                        _ => result.entities_reinforced += 1,
                    }
                    candidate_entity_ids.push((candidate.clone(), resolution.entity_id));
                }
                Err(e) => {
                    warn!("archivist: resolving candidate '{}' failed: {e}", candidate.title);
                }
            }
        }

        // Stage 5: edge pre-trigger snapshot.
        let mut trigger_ids: Vec<EntityId> = candidate_entity_ids.iter().map(|(_, id)| *id).collect();
        trigger_ids.dedup();
        result.trigger_entity_ids = trigger_ids;

        // Stages 6-8 run per touched entity; a failure on one entity must
        // not abort the others.
        for (candidate, entity_id) in &candidate_entity_ids {
            if let Err(e) = self.chunk_embed_score(*entity_id, candidate, &cleaned, &mut result) {
                warn!("archivist: post-processing entity {entity_id} failed: {e}");
            }
        }

        Ok(result)
    }

    fn chunk_embed_score(
        &self,
        entity_id: EntityId,
        candidate: &ExtractedEntity,
        cleaned_text: &str,
        result: &mut ArchivistResult,
    ) -> UmgResult<()> {
        let entity = self
            .storage
            .get_entity(entity_id)?
            .ok_or(crate::error::UmgError::EntityNotFound(entity_id))?;

        // Stage 6: chunking. Chunk the summary plus (for newly-created
        // entities) the portion of cleaned text that mentions it; keyed by
        // (entity_id, ordinal), so reprocessing overwrites rather than
        // appends.
        let mut source_text = entity.summary.clone();
        if source_text.trim().is_empty() {
            source_text = cleaned_text.to_string();
        } else if cleaned_text.contains(&candidate.title) {
            source_text.push('\n');
            source_text.push_str(cleaned_text);
        }

        let pieces = chunk_text(&source_text, self.config.chunk_size, self.config.chunk_overlap);
        let mut chunks = Vec::with_capacity(pieces.len());
        for (ordinal, text) in pieces.into_iter().enumerate() {
            let chunk = Chunk {
                id: Uuid::now_v7(),
                entity_id,
                text,
                ordinal: ordinal as u32,
                metadata: Default::default(),
                created_at: chrono::Utc::now(),
            };
            self.storage.put_chunk(&chunk)?;
            result.chunks_written += 1;
            chunks.push(chunk);
        }

        // Stage 7: embedding. Idempotent by (chunk_id, model_id); only
        // chunks lacking an embedding under the current model get one.
        let model_id = self.embeddings.model_id().to_string();
        for chunk in &chunks {
            if self.storage.get_embedding(chunk.id, &model_id)?.is_some() {
                continue;
            }
            let input = embedding_input(&entity, &chunk.text);
            match self.embeddings.embed(&input) {
                Ok(vector) => {
                    let record = EmbeddingRecord {
                        chunk_id: chunk.id,
                        vector,
                        model_id: model_id.clone(),
                        created_at: chrono::Utc::now(),
                    };
                    self.storage.put_embedding(&record)?;
                    result.embeddings_written += 1;

                    // Mirrored into the shared index without a rebuild: new
                    // chunks are searchable once the next nightly/on-demand
                    // run rebuilds it.
                    if let Some(index) = &self.vector_index {
                        if let Ok(mut guard) = index.write() {
                            let _ = guard.insert(chunk.id, &record.vector, entity.entity_type);
                        }
                    }
                }
                Err(e) => {
                    // Embeddings are optional for functionality; log
                    // and continue rather than fail the entity.
                    warn!("archivist: embedding chunk {} failed: {e}", chunk.id);
                }
            }
        }

        // Stage 8: signal scoring.
        self.scorer.on_mention(entity_id, chrono::Utc::now())?;
        self.scorer.recompute_novelty(entity_id, chrono::Utc::now())?;

        Ok(())
    }

    /// Seam used by the ingest endpoint: enqueues a RawEvent through the
    /// caller-owned `EventInbox`, then returns immediately — processing
    /// happens on the next `drain_pending` pass.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// A trivial payload constructor used by the ingest endpoint and mentor
/// chat re-entry.
pub fn payload_from_content(
    content: impl Into<String>,
    source_type: impl Into<String>,
    metadata: HashMap<String, serde_json::Value>,
) -> EventPayload {
    EventPayload {
        content: content.into(),
        source_type: source_type.into(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SemanticEdgeSuggestion;
    use crate::storage::RedbStorage;
    use crate::types::EntityType;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticLlm {
        entities: Vec<ExtractedEntity>,
    }

    #[async_trait]
    impl LlmClient for StaticLlm {
        async fn extract_entities(&self, _text: &str, _hint: &str) -> UmgResult<Vec<ExtractedEntity>> {
            Ok(self.entities.clone())
        }
        async fn propose_semantic_edges(
            &self,
            _text: &str,
            _titles: &[String],
        ) -> UmgResult<Vec<SemanticEdgeSuggestion>> {
            Ok(vec![])
        }
        async fn generate_digest_insights(
            &self,
            _summary: &str,
        ) -> UmgResult<Vec<crate::llm::GeneratedInsight>> {
            Ok(vec![])
        }
    }

    struct FakeEmbeddings {
        calls: Mutex<u32>,
    }

    impl EmbeddingService for FakeEmbeddings {
        fn embed(&self, _text: &str) -> UmgResult<crate::types::Vector> {
            *self.calls.lock().unwrap() += 1;
            Ok(vec![0.1, 0.2, 0.3])
        }
        fn embed_batch(&self, texts: &[String]) -> UmgResult<Vec<crate::types::Vector>> {
            texts.iter().map(|t| self.embed(t)).collect()
        }
        fn dimension(&self) -> usize {
            3
        }
        fn model_id(&self) -> &str {
            "fake-v1"
        }
    }

    fn harness(
        entities: Vec<ExtractedEntity>,
    ) -> (Archivist<RedbStorage, StaticLlm, FakeEmbeddings>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("u.redb")).unwrap());
        let llm = Arc::new(StaticLlm { entities });
        let embeddings = Arc::new(FakeEmbeddings { calls: Mutex::new(0) });
        (
            Archivist::new(storage, llm, embeddings, EngineConfig::default()),
            dir,
        )
    }

    fn role_org_candidates() -> Vec<ExtractedEntity> {
        vec![
            ExtractedEntity {
                title: "Executive Director at Youth Empowerment Through Arts and Humanities".into(),
                entity_type: EntityType::Role,
                summary: "Led programs at YETAH.".into(),
                aliases: vec![],
                start_date: None,
                end_date: None,
                metadata: Default::default(),
            },
            ExtractedEntity {
                title: "Youth Empowerment Through Arts and Humanities".into(),
                entity_type: EntityType::Organization,
                summary: "A nonprofit arts organization.".into(),
                aliases: vec![],
                start_date: None,
                end_date: None,
                metadata: Default::default(),
            },
        ]
    }

    #[tokio::test]
    async fn processes_role_and_org_event_end_to_end() {
        let (archivist, _dir) = harness(role_org_candidates());
        let event = RawEvent::new(
            payload_from_content(
                "I was Executive Director at Youth Empowerment Through Arts and Humanities.",
                "capture_form",
                Default::default(),
            ),
            "capture_form",
        );

        let result = archivist.process_one(&event).await.unwrap();
        assert_eq!(result.entities_created, 2);
        assert_eq!(result.trigger_entity_ids.len(), 2);
        assert!(result.chunks_written > 0);
        assert!(result.embeddings_written > 0);
    }

    #[tokio::test]
    async fn reprocessing_same_event_does_not_duplicate_entities() {
        let (archivist, _dir) = harness(role_org_candidates());
        let event = RawEvent::new(
            payload_from_content(
                "I was Executive Director at Youth Empowerment Through Arts and Humanities.",
                "capture_form",
                Default::default(),
            ),
            "capture_form",
        );

        let first = archivist.process_one(&event).await.unwrap();
        let second = archivist.process_one(&event).await.unwrap();

        assert_eq!(first.entities_created, 2);
        assert_eq!(second.entities_created, 0);
        assert_eq!(second.entities_reinforced, 2);
    }
}
