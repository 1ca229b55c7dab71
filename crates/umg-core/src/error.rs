use thiserror::Error;

use crate::types::{EdgeId, EntityId, EventId};

/// The crate-wide error type, spanning transient-external, validation,
/// data-integrity, strategy-level, and fatal failure modes.
#[derive(Debug, Error)]
pub enum UmgError {
    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("storage transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("storage table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("storage storage error: {0}")]
    StorageBackend(#[from] redb::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("invalid edge: {0}")]
    InvalidEdge(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("duplicate edge from={from} to={to} kind={kind}")]
    DuplicateEdge {
        from: EntityId,
        to: EntityId,
        kind: String,
    },

    #[error("strategy {strategy} failed: {source}")]
    Strategy {
        strategy: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("embedding provider error: {0}")]
    Embedding(anyhow::Error),

    #[error("llm provider error: {0}")]
    Llm(anyhow::Error),

    #[error("advisory lock unavailable: {0}")]
    Locked(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),
}

pub type UmgResult<T> = Result<T, UmgError>;
