use std::collections::HashMap;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use umg_core::{ConversationTurn, EntityId, EventId, EventPayload, InsightId, LlmClient, RunMode, Storage};

use super::{AppResult, AppState, JsonResponse};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(create_event))
        .route("/process", post(process))
        .route("/status", get(status))
        .route("/relationship-engine", post(trigger_relationship_engine).get(relationship_engine_status))
        .route("/mentor/chat", post(mentor_chat))
        .route("/mentor/generate-digest", post(generate_digest))
        .route("/mentor/status", get(mentor_status))
        .route("/feedback/acknowledge", post(acknowledge_feedback))
        .route("/feedback/dismiss", post(dismiss_feedback))
        .with_state(state)
}

// === POST /events ===

#[derive(Deserialize)]
struct CreateEventRequest {
    content: String,
    source_type: String,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    user_entity_id: Option<EntityId>,
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
struct CreateEventResponse {
    event_id: EventId,
    status: &'static str,
}

async fn create_event(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateEventRequest>,
) -> AppResult<Json<JsonResponse<CreateEventResponse>>> {
    let idempotency_key = body.idempotency_key.or_else(|| {
        headers
            .get("Idempotency-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let payload = EventPayload {
        content: body.content,
        source_type: body.source_type,
        metadata: body.metadata,
    };

    let event_id = state.inbox.enqueue_with_idempotency_key(
        payload,
        "capture_form",
        body.user_entity_id,
        idempotency_key,
    )?;

    Ok(Json(JsonResponse::ok(CreateEventResponse {
        event_id,
        status: "pending",
    })))
}

// === POST /process ===

#[derive(Serialize)]
struct ProcessResponse {
    events_processed: usize,
    entities_created: usize,
    entities_reinforced: usize,
}

async fn process(State(state): State<AppState>) -> AppResult<Json<JsonResponse<ProcessResponse>>> {
    let results = state.archivist.drain_pending(50).await?;
    let mut response = ProcessResponse {
        events_processed: results.len(),
        entities_created: 0,
        entities_reinforced: 0,
    };
    for result in &results {
        response.entities_created += result.entities_created;
        response.entities_reinforced += result.entities_reinforced;
        if !result.trigger_entity_ids.is_empty() {
            state
                .relationship_engine
                .run(RunMode::Incremental, &result.trigger_entity_ids)
                .await?;
        }
    }
    Ok(Json(JsonResponse::ok(response)))
}

// === GET /status ===

#[derive(Serialize)]
struct StatusResponse {
    pending: u64,
    processing: u64,
    processed_last_24h: u64,
    failed: u64,
}

async fn status(State(state): State<AppState>) -> AppResult<Json<JsonResponse<StatusResponse>>> {
    use umg_core::{EventFilter, EventStatus};

    let stats = state.storage.stats()?;
    let day_ago = chrono::Utc::now() - chrono::Duration::hours(24);
    let processed_last_24h = state
        .storage
        .list_events(EventFilter::with_status(EventStatus::Processed))?
        .into_iter()
        .filter(|e| e.updated_at > day_ago)
        .count() as u64;

    Ok(Json(JsonResponse::ok(StatusResponse {
        pending: stats.pending_events,
        // Single in-process drain loop; nothing is ever mid-flight between
        // requests, so there is no distinct "processing" state to report.
        processing: 0,
        processed_last_24h,
        failed: stats.failed_events,
    })))
}

// === /relationship-engine ===

#[derive(Deserialize)]
struct RelationshipEngineRequest {
    mode: String,
    #[serde(default)]
    entity_ids: Vec<EntityId>,
    #[serde(default)]
    full_scan: bool,
}

#[derive(Serialize)]
struct RelationshipEngineRunResponse {
    edges_created: usize,
    edges_updated: usize,
    edges_decayed: usize,
    edges_pruned: usize,
    entities_analyzed: usize,
    processing_time_ms: u128,
    strategies_used: Vec<&'static str>,
}

async fn trigger_relationship_engine(
    State(state): State<AppState>,
    Json(body): Json<RelationshipEngineRequest>,
) -> AppResult<Json<JsonResponse<RelationshipEngineRunResponse>>> {
    let mode = match body.mode.as_str() {
        "incremental" => RunMode::Incremental,
        "nightly" => RunMode::Nightly,
        "on-demand" => RunMode::OnDemand { run_decay: body.full_scan },
        other => {
            return Err(umg_core::UmgError::Validation(format!("unknown relationship-engine mode: {other}")).into())
        }
    };

    let run = state.relationship_engine.run(mode, &body.entity_ids).await?;
    Ok(Json(JsonResponse::ok(RelationshipEngineRunResponse {
        edges_created: run.edges_created,
        edges_updated: run.edges_updated,
        edges_decayed: run.edges_decayed,
        edges_pruned: run.edges_pruned,
        entities_analyzed: run.entities_analyzed,
        processing_time_ms: run.processing_time.as_millis(),
        strategies_used: run.strategies_used,
    })))
}

#[derive(Serialize)]
struct RelationshipEngineStatusResponse {
    status: &'static str,
    strategies: Vec<&'static str>,
    config: RelationshipEngineConfigResponse,
}

#[derive(Serialize)]
struct RelationshipEngineConfigResponse {
    min_confidence: f32,
    decay_factor: f32,
    prune_threshold: f32,
}

async fn relationship_engine_status(
    State(state): State<AppState>,
) -> AppResult<Json<JsonResponse<RelationshipEngineStatusResponse>>> {
    Ok(Json(JsonResponse::ok(RelationshipEngineStatusResponse {
        status: "ready",
        strategies: vec!["pattern", "embedding_similarity", "temporal_overlap", "graph_topology", "semantic_llm"],
        config: RelationshipEngineConfigResponse {
            min_confidence: state.config.min_confidence,
            decay_factor: state.config.decay_factor,
            prune_threshold: state.config.prune_threshold,
        },
    })))
}

// === /mentor/chat ===

#[derive(Deserialize)]
struct ChatTurn {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    conversation_history: Vec<ChatTurn>,
    user_entity_id: Option<EntityId>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    user_event_id: EventId,
    assistant_event_id: EventId,
    entities_mentioned: Vec<String>,
    context_used: ContextUsedResponse,
}

#[derive(Serialize)]
struct ContextUsedResponse {
    core_identity_count: usize,
    high_priority_count: usize,
    active_work_count: usize,
    relevant_entities_count: usize,
    relationships_count: usize,
}

async fn mentor_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> AppResult<Json<JsonResponse<ChatResponse>>> {
    let history: Vec<ConversationTurn> = body
        .conversation_history
        .into_iter()
        .map(|t| ConversationTurn { role: t.role, content: t.content })
        .collect();

    let context = state.context_assembler.assemble(&body.message, history)?;
    let counts = context.counts();
    let summary = umg_core::render_context_summary(&context, "");

    // The user's message is durable regardless of whether the LLM call
    // below succeeds.
    let user_event_id = state.inbox.enqueue(
        EventPayload {
            content: body.message.clone(),
            source_type: "mentor_chat".into(),
            metadata: HashMap::new(),
        },
        "mentor_chat",
        body.user_entity_id,
    )?;

    let reply = state.llm.respond_to_message(&summary, &body.message).await?;

    let assistant_event_id = state.inbox.enqueue(
        EventPayload {
            content: reply.clone(),
            source_type: "mentor_chat".into(),
            metadata: HashMap::new(),
        },
        "mentor_chat",
        body.user_entity_id,
    )?;

    let entities_mentioned = context
        .relevant_entities
        .iter()
        .map(|e| e.title.clone())
        .collect();

    Ok(Json(JsonResponse::ok(ChatResponse {
        response: reply,
        user_event_id,
        assistant_event_id,
        entities_mentioned,
        context_used: ContextUsedResponse {
            core_identity_count: counts.core_identity_count,
            high_priority_count: counts.high_priority_count,
            active_work_count: counts.active_work_count,
            relevant_entities_count: counts.relevant_entities_count,
            relationships_count: counts.relationships_count,
        },
    })))
}

// === /mentor/generate-digest ===

#[derive(Serialize)]
struct GenerateDigestResponse {
    success: bool,
    insights_created: usize,
    insights: Vec<InsightSummary>,
}

#[derive(Serialize)]
struct InsightSummary {
    #[serde(rename = "type")]
    insight_type: String,
    id: InsightId,
}

async fn generate_digest(
    State(state): State<AppState>,
) -> AppResult<Json<JsonResponse<GenerateDigestResponse>>> {
    let insights = state.digest_generator.generate().await?;
    let summaries = insights
        .iter()
        .map(|i| InsightSummary { insight_type: i.drivers.insight_type.clone(), id: i.id })
        .collect();

    Ok(Json(JsonResponse::ok(GenerateDigestResponse {
        success: true,
        insights_created: insights.len(),
        insights: summaries,
    })))
}

// === GET /mentor/status ===

#[derive(Serialize)]
struct MentorStatusResponse {
    status: &'static str,
    context_mode: &'static str,
    model: String,
    entity_count: u64,
    signal_count: u64,
}

async fn mentor_status(State(state): State<AppState>) -> AppResult<Json<JsonResponse<MentorStatusResponse>>> {
    let stats = state.storage.stats()?;
    let signal_count = state.storage.all_signals()?.len() as u64;

    Ok(Json(JsonResponse::ok(MentorStatusResponse {
        status: "ready",
        context_mode: "dynamic",
        model: state.llm_model.clone(),
        entity_count: stats.entity_count,
        signal_count,
    })))
}

// === /feedback/acknowledge and /feedback/dismiss ===

#[derive(Deserialize)]
struct FeedbackRequest {
    insight_id: InsightId,
}

#[derive(Serialize)]
struct SignalChange {
    entity_id: EntityId,
    importance_before: f32,
    importance_after: f32,
}

async fn acknowledge_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackRequest>,
) -> AppResult<Json<JsonResponse<AcknowledgeResponse>>> {
    let before = snapshot_driver_importance(&state, body.insight_id)?;
    let insight = state.feedback.acknowledge(body.insight_id)?;
    let changes = diff_driver_importance(&state, &insight.drivers.entity_ids, &before)?;

    Ok(Json(JsonResponse::ok(AcknowledgeResponse {
        success: true,
        entities_adjusted: changes.len(),
        changes,
    })))
}

#[derive(Serialize)]
struct AcknowledgeResponse {
    success: bool,
    entities_adjusted: usize,
    changes: Vec<SignalChange>,
}

#[derive(Serialize)]
struct DismissResponse {
    success: bool,
    entities_adjusted: usize,
    pattern_recorded: bool,
    changes: Vec<SignalChange>,
    pattern: Option<PatternSummary>,
}

#[derive(Serialize)]
struct PatternSummary {
    insight_type: String,
    dismissed_count: u32,
    keywords: Vec<String>,
}

async fn dismiss_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackRequest>,
) -> AppResult<Json<JsonResponse<DismissResponse>>> {
    let before = snapshot_driver_importance(&state, body.insight_id)?;
    let insight = state.feedback.dismiss(body.insight_id)?;
    let changes = diff_driver_importance(&state, &insight.drivers.entity_ids, &before)?;

    let pattern = state
        .storage
        .list_dismissed_patterns()?
        .into_iter()
        .filter(|p| p.insight_type == insight.drivers.insight_type)
        .max_by_key(|p| p.last_dismissed_at)
        .map(|p| PatternSummary {
            insight_type: p.insight_type,
            dismissed_count: p.dismissed_count,
            keywords: p.pattern_signature.keywords,
        });

    Ok(Json(JsonResponse::ok(DismissResponse {
        success: true,
        entities_adjusted: changes.len(),
        pattern_recorded: pattern.is_some(),
        changes,
        pattern,
    })))
}

fn snapshot_driver_importance(
    state: &AppState,
    insight_id: InsightId,
) -> AppResult<HashMap<EntityId, f32>> {
    let insight = state
        .storage
        .get_insight(insight_id)?
        .ok_or_else(|| umg_core::UmgError::EntityNotFound(insight_id))?;
    let mut before = HashMap::new();
    for entity_id in &insight.drivers.entity_ids {
        if let Some(signal) = state.storage.get_signal(*entity_id)? {
            before.insert(*entity_id, signal.importance);
        }
    }
    Ok(before)
}

fn diff_driver_importance(
    state: &AppState,
    entity_ids: &[EntityId],
    before: &HashMap<EntityId, f32>,
) -> AppResult<Vec<SignalChange>> {
    let mut changes = Vec::with_capacity(entity_ids.len());
    for entity_id in entity_ids {
        let Some(signal) = state.storage.get_signal(*entity_id)? else {
            continue;
        };
        let importance_before = before.get(entity_id).copied().unwrap_or(signal.importance);
        changes.push(SignalChange {
            entity_id: *entity_id,
            importance_before,
            importance_after: signal.importance,
        });
    }
    Ok(changes)
}
