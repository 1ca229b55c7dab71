use crate::error::UmgResult;
use crate::storage::filters::{EdgeFilter, EntityFilter, EventFilter, InsightFilter, StorageStats};
use crate::types::{
    DismissedPattern, DismissedPatternId, Edge, EdgeId, EdgeKind, EmbeddingRecord, Entity,
    EntityId, EventId, EventStatus, Insight, InsightId, RawEvent, Signal,
};
use std::path::Path;

/// Persistence seam for the whole engine. A single implementation
/// (`redb_storage::RedbStorage`) backs production and tests alike; the
/// trait exists so higher-level components (Archivist, Relationship
/// Engine, Mentor) can be exercised against an in-memory fake if needed.
pub trait Storage: Send + Sync {
    // === Event Inbox ===

    fn put_raw_event(&self, event: &RawEvent) -> UmgResult<()>;
    fn get_raw_event(&self, id: EventId) -> UmgResult<Option<RawEvent>>;
    fn find_event_by_idempotency_key(&self, key: &str) -> UmgResult<Option<RawEvent>>;
    fn list_events(&self, filter: EventFilter) -> UmgResult<Vec<RawEvent>>;
    fn set_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        failure_reason: Option<String>,
    ) -> UmgResult<()>;

    // === Entities ===

    fn put_entity(&self, entity: &Entity) -> UmgResult<()>;
    fn get_entity(&self, id: EntityId) -> UmgResult<Option<Entity>>;
    fn list_entities(&self, filter: EntityFilter) -> UmgResult<Vec<Entity>>;

    // === Chunks & embeddings ===

    fn put_chunk(&self, chunk: &crate::types::Chunk) -> UmgResult<()>;
    fn get_chunk(&self, id: crate::types::ChunkId) -> UmgResult<Option<crate::types::Chunk>>;
    fn chunks_for_entity(&self, entity_id: EntityId) -> UmgResult<Vec<crate::types::Chunk>>;
    fn put_embedding(&self, embedding: &EmbeddingRecord) -> UmgResult<()>;
    fn get_embedding(&self, chunk_id: crate::types::ChunkId, model_id: &str) -> UmgResult<Option<EmbeddingRecord>>;
    fn all_embeddings(&self, model_id: &str) -> UmgResult<Vec<EmbeddingRecord>>;

    // === Signals ===

    fn put_signal(&self, signal: &Signal) -> UmgResult<()>;
    fn get_signal(&self, entity_id: EntityId) -> UmgResult<Option<Signal>>;
    fn all_signals(&self) -> UmgResult<Vec<Signal>>;

    // === Edges ===

    fn put_edge(&self, edge: &Edge) -> UmgResult<()>;
    fn get_edge(&self, id: EdgeId) -> UmgResult<Option<Edge>>;
    fn get_edge_by_triple(
        &self,
        from_id: EntityId,
        to_id: EntityId,
        kind: &EdgeKind,
    ) -> UmgResult<Option<Edge>>;
    fn delete_edge(&self, id: EdgeId) -> UmgResult<()>;
    fn edges_from(&self, entity_id: EntityId) -> UmgResult<Vec<Edge>>;
    fn edges_to(&self, entity_id: EntityId) -> UmgResult<Vec<Edge>>;
    fn edges_between(&self, a: EntityId, b: EntityId) -> UmgResult<Vec<Edge>>;
    fn list_edges(&self, filter: EdgeFilter) -> UmgResult<Vec<Edge>>;
    fn all_edges(&self) -> UmgResult<Vec<Edge>>;

    // === Insights / Feedback ===

    fn put_insight(&self, insight: &Insight) -> UmgResult<()>;
    fn get_insight(&self, id: InsightId) -> UmgResult<Option<Insight>>;
    fn list_insights(&self, filter: InsightFilter) -> UmgResult<Vec<Insight>>;

    fn put_dismissed_pattern(&self, pattern: &DismissedPattern) -> UmgResult<()>;
    fn list_dismissed_patterns(&self) -> UmgResult<Vec<DismissedPattern>>;
    fn get_dismissed_pattern(&self, id: DismissedPatternId) -> UmgResult<Option<DismissedPattern>>;

    // === Maintenance ===

    fn stats(&self) -> UmgResult<StorageStats>;
    fn snapshot(&self, path: &Path) -> UmgResult<()>;
}
