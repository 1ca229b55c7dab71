//! Event-to-graph consolidation: durable capture, entity extraction and
//! resolution, signal scoring, relationship detection, and query-time
//! context assembly. `umg-server` is the thin HTTP/CLI shell around this
//! crate's pipeline.

pub mod archivist;
pub mod config;
pub mod error;
pub mod feedback;
pub mod inbox;
pub mod llm;
pub mod mentor;
pub mod relationship_engine;
pub mod resolver;
pub mod signal;
pub mod storage;
pub mod text;
pub mod types;
pub mod vector;

pub use archivist::{payload_from_content, Archivist, ArchivistResult, ReferenceMap};
pub use config::EngineConfig;
pub use error::{UmgError, UmgResult};
pub use feedback::FeedbackProcessor;
pub use inbox::EventInbox;
pub use llm::{ExtractedEntity, GeneratedInsight, LlmClient, LlmConfig, OpenAiLlmClient, SemanticEdgeSuggestion};
pub use mentor::{
    render_context_summary, ContextAssembler, ConversationTurn, ContextUsedCounts, DigestGenerator,
    MentorContext, RelationshipContext,
};
pub use relationship_engine::{EdgeCandidate, EngineRunResult, RelationshipEngine, RunMode, Strategy};
pub use resolver::{EntityResolver, Resolution, ResolutionKind};
pub use signal::SignalScorer;
pub use storage::{EdgeFilter, EntityFilter, EventFilter, InsightFilter, RedbStorage, Storage, StorageStats};
pub use types::*;
pub use vector::{EmbeddingService, FastEmbedService, HnswIndex, VectorFilter, VectorIndex};
