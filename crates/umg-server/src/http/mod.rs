mod routes;

pub use routes::create_router;

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use umg_core::{
    Archivist, ContextAssembler, DigestGenerator, EngineConfig, EventInbox, FastEmbedService,
    FeedbackProcessor, OpenAiLlmClient, RedbStorage, RelationshipEngine,
};

/// Shared application state, clone-cheap via `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<RedbStorage>,
    pub inbox: Arc<EventInbox<RedbStorage>>,
    pub archivist: Arc<Archivist<RedbStorage, OpenAiLlmClient, FastEmbedService>>,
    pub relationship_engine: Arc<RelationshipEngine<RedbStorage, OpenAiLlmClient, FastEmbedService>>,
    pub context_assembler: Arc<ContextAssembler<RedbStorage>>,
    pub digest_generator: Arc<DigestGenerator<RedbStorage, OpenAiLlmClient>>,
    pub feedback: Arc<FeedbackProcessor<RedbStorage>>,
    pub llm: Arc<OpenAiLlmClient>,
    pub llm_model: String,
    pub config: EngineConfig,
    pub start_time: Instant,
}

/// `{success, data, error}` response envelope, reused for every endpoint.
#[derive(Serialize)]
pub struct JsonResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
}

impl JsonResponse<()> {
    pub fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

/// Maps `UmgError` (and anything else convertible to `anyhow::Error`) onto
/// an HTTP response. Validation-shaped failures map to 400; everything else
/// maps to 500 — the `From<UmgError>` impl below implements that split for
/// the umg-core error taxonomy.
pub struct AppError(anyhow::Error, StatusCode);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.1, Json(JsonResponse::<()>::err(self.0.to_string()))).into_response()
    }
}

impl From<umg_core::UmgError> for AppError {
    fn from(err: umg_core::UmgError) -> Self {
        let status = match &err {
            umg_core::UmgError::EntityNotFound(_)
            | umg_core::UmgError::EdgeNotFound(_)
            | umg_core::UmgError::EventNotFound(_) => StatusCode::NOT_FOUND,
            umg_core::UmgError::Validation(_)
            | umg_core::UmgError::InvalidEdge(_)
            | umg_core::UmgError::InvalidState(_)
            | umg_core::UmgError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(err.into(), status)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self(err, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub type AppResult<T> = Result<T, AppError>;
