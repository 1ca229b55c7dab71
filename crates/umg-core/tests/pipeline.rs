//! End-to-end coverage across Archivist -> Relationship Engine -> Storage,
//! exercising the public API the way `umg-server` composes it rather than
//! unit-testing a single module in isolation.

use std::sync::Arc;

use async_trait::async_trait;
use umg_core::{
    payload_from_content, Archivist, EdgeFilter, EngineConfig, EntityType, EventInbox,
    ExtractedEntity, GeneratedInsight, LlmClient, RawEvent, RedbStorage, RelationshipEngine,
    RunMode, SemanticEdgeSuggestion, Storage, UmgResult, Vector, EmbeddingService,
};

struct ScriptedLlm {
    entities: Vec<ExtractedEntity>,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
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

    async fn generate_digest_insights(&self, _summary: &str) -> UmgResult<Vec<GeneratedInsight>> {
        Ok(vec![])
    }
}

struct FakeEmbeddings;

impl EmbeddingService for FakeEmbeddings {
    fn embed(&self, _text: &str) -> UmgResult<Vector> {
        Ok(vec![0.1, 0.2, 0.3])
    }
    fn embed_batch(&self, texts: &[String]) -> UmgResult<Vec<Vector>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn dimension(&self) -> usize {
        3
    }
    fn model_id(&self) -> &str {
        "fake-v1"
    }
}

fn role_org_entities() -> Vec<ExtractedEntity> {
    vec![
        ExtractedEntity {
            title: "Staff Engineer at Lumen Robotics".into(),
            entity_type: EntityType::Role,
            summary: "Led the perception team.".into(),
            aliases: vec![],
            start_date: None,
            end_date: None,
            metadata: Default::default(),
        },
        ExtractedEntity {
            title: "Lumen Robotics".into(),
            entity_type: EntityType::Organization,
            summary: "A robotics startup.".into(),
            aliases: vec![],
            start_date: None,
            end_date: None,
            metadata: Default::default(),
        },
    ]
}

/// Scenario: capture -> Archivist -> incremental Relationship Engine pass
/// creates a `role_at` edge, and replaying the same capture reinforces it
/// instead of duplicating it.
#[tokio::test]
async fn ingest_resolve_relate_and_reinforce() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(RedbStorage::open(dir.path().join("umg.redb")).unwrap());
    let llm = Arc::new(ScriptedLlm { entities: role_org_entities() });
    let embeddings = Arc::new(FakeEmbeddings);
    let config = EngineConfig::default();

    let inbox = EventInbox::new(storage.clone());
    let archivist = Archivist::new(storage.clone(), llm.clone(), embeddings.clone(), config.clone());
    let engine = RelationshipEngine::new(storage.clone(), llm.clone(), embeddings.clone(), config.clone());

    let content = "I'm now Staff Engineer at Lumen Robotics, leading the perception team.";
    let event_id = inbox
        .enqueue(
            payload_from_content(content, "capture_form", Default::default()),
            "capture_form",
            None,
        )
        .unwrap();

    let pending: Vec<RawEvent> = inbox.claim_pending(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, event_id);

    let first_run = archivist.process_one(&pending[0]).await.unwrap();
    assert_eq!(first_run.entities_created, 2);
    inbox.mark_processed(event_id).unwrap();

    let first_engine_run = engine
        .run(RunMode::Incremental, &first_run.trigger_entity_ids)
        .await
        .unwrap();
    assert_eq!(first_engine_run.edges_created, 1);

    let edges = storage.list_edges(EdgeFilter::new()).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].kind.as_str(), "role_at");
    let first_weight = edges[0].weight;

    // Replaying the same capture must not duplicate the entities or the
    // edge; it must reinforce both.
    let second_event = RawEvent::new(
        payload_from_content(content, "capture_form", Default::default()),
        "capture_form",
    );
    let second_run = archivist.process_one(&second_event).await.unwrap();
    assert_eq!(second_run.entities_created, 0);
    assert_eq!(second_run.entities_reinforced, 2);

    let second_engine_run = engine
        .run(RunMode::Incremental, &second_run.trigger_entity_ids)
        .await
        .unwrap();
    assert_eq!(second_engine_run.edges_created, 0);
    assert_eq!(second_engine_run.edges_updated, 1);

    let edges_after = storage.list_edges(EdgeFilter::new()).unwrap();
    assert_eq!(edges_after.len(), 1);
    assert!(edges_after[0].weight > first_weight);
}

/// Scenario: a nightly run decays every edge weight, then prunes whatever
/// falls below `prune_threshold`.
#[tokio::test]
async fn nightly_run_decays_and_prunes_weak_edges() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(RedbStorage::open(dir.path().join("umg.redb")).unwrap());
    let llm = Arc::new(ScriptedLlm { entities: vec![] });
    let embeddings = Arc::new(FakeEmbeddings);
    let mut config = EngineConfig::default();
    config.decay_factor = 0.5;
    config.prune_threshold = 0.2;

    let engine = RelationshipEngine::new(storage.clone(), llm.clone(), embeddings.clone(), config.clone());

    let e1 = seed_entity(&storage, "Weak Link A", EntityType::Concept);
    let e2 = seed_entity(&storage, "Weak Link B", EntityType::Concept);
    let now = chrono::Utc::now();
    let edge = umg_core::Edge {
        id: uuid::Uuid::now_v7(),
        from_id: e1.id,
        to_id: e2.id,
        kind: umg_core::EdgeKind::new("related_to"),
        confidence: 0.9,
        importance: 0.5,
        description: String::new(),
        start_date: None,
        end_date: None,
        weight: 0.3,
        last_reinforced_at: now,
        metadata: Default::default(),
        source_event_id: None,
        created_at: now,
        updated_at: now,
    };
    storage.put_edge(&edge).unwrap();

    let run = engine.run(RunMode::OnDemand { run_decay: true }, &[]).await.unwrap();
    assert!(run.edges_decayed >= 1);
    assert_eq!(run.edges_pruned, 1);

    let remaining = storage.list_edges(EdgeFilter::new()).unwrap();
    assert!(remaining.is_empty());
}

fn seed_entity(storage: &RedbStorage, title: &str, kind: EntityType) -> umg_core::Entity {
    let event_id = uuid::Uuid::now_v7();
    let entity = umg_core::Entity::new(title, kind, String::new(), event_id);
    storage.put_entity(&entity).unwrap();
    entity
}
