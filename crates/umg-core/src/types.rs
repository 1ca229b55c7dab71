use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier aliases. All IDs are UUIDv7 so they sort time-ordered.
pub type EventId = Uuid;
pub type EntityId = Uuid;
pub type ChunkId = Uuid;
pub type EdgeId = Uuid;
pub type InsightId = Uuid;
pub type DismissedPatternId = Uuid;

/// A fixed-dimensional embedding vector.
pub type Vector = Vec<f32>;

/// Status of a `RawEvent` as it moves through the Archivist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processed,
    Failed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
        }
    }
}

/// Raw capture payload, before cleaning/extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    pub content: String,
    pub source_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// A durable, replayable capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    pub id: EventId,
    pub payload: EventPayload,
    /// Free-form source tag, e.g. "capture_form", "mentor_chat".
    pub source: String,
    pub status: EventStatus,
    /// Optional pinned user entity, threaded into reference resolution.
    pub user_entity_id: Option<EntityId>,
    /// Idempotency key supplied by the caller, if any.
    pub idempotency_key: Option<String>,
    pub retries: u32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(payload: EventPayload, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            payload,
            source: source.into(),
            status: EventStatus::Pending,
            user_entity_id: None,
            idempotency_key: None,
            retries: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The closed set of entity types (glossary). Importance, pattern matching,
/// and chunking all branch on this — unlike `EdgeKind` it is NOT open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    CoreIdentity,
    Person,
    Organization,
    Role,
    Project,
    Feature,
    Product,
    Goal,
    Skill,
    Decision,
    Task,
    MeetingNote,
    Location,
    Concept,
    Event,
    Reflection,
}

impl EntityType {
    pub const ALL: [EntityType; 16] = [
        EntityType::CoreIdentity,
        EntityType::Person,
        EntityType::Organization,
        EntityType::Role,
        EntityType::Project,
        EntityType::Feature,
        EntityType::Product,
        EntityType::Goal,
        EntityType::Skill,
        EntityType::Decision,
        EntityType::Task,
        EntityType::MeetingNote,
        EntityType::Location,
        EntityType::Concept,
        EntityType::Event,
        EntityType::Reflection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::CoreIdentity => "core_identity",
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Role => "role",
            EntityType::Project => "project",
            EntityType::Feature => "feature",
            EntityType::Product => "product",
            EntityType::Goal => "goal",
            EntityType::Skill => "skill",
            EntityType::Decision => "decision",
            EntityType::Task => "task",
            EntityType::MeetingNote => "meeting_note",
            EntityType::Location => "location",
            EntityType::Concept => "concept",
            EntityType::Event => "event",
            EntityType::Reflection => "reflection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Type-defaulted initial importance.
    pub fn default_importance(self) -> f32 {
        match self {
            EntityType::CoreIdentity => 1.0,
            EntityType::Person => 0.8,
            EntityType::Project => 0.85,
            EntityType::Feature => 0.8,
            EntityType::Product => 0.8,
            EntityType::Goal => 0.75,
            EntityType::Role => 0.7,
            EntityType::Organization => 0.65,
            EntityType::Decision => 0.7,
            EntityType::Skill => 0.6,
            EntityType::Task => 0.55,
            EntityType::Concept => 0.55,
            EntityType::Location => 0.5,
            EntityType::Event => 0.5,
            EntityType::MeetingNote => 0.5,
            EntityType::Reflection => 0.45,
        }
    }
}

/// Entity metadata bag. Kept as a concrete struct rather than a raw
/// JSON blob so the invariants (dedup on `referenced_by_event_ids`, alias
/// union) are enforced by the type system, not by hand-rolled map access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EntityMetadata {
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_user_entity: bool,
    #[serde(default)]
    pub mention_count: u32,
    #[serde(default)]
    pub referenced_by_event_ids: Vec<EventId>,
    /// Free-form extras (e.g. LLM-supplied dates/fields not otherwise typed).
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl EntityMetadata {
    /// Append `event_id`, deduplicated. Used on every mention.
    pub fn record_reference(&mut self, event_id: EventId) {
        if !self.referenced_by_event_ids.contains(&event_id) {
            self.referenced_by_event_ids.push(event_id);
        }
    }

    /// Union aliases, deduplicated, case-sensitive (titles are compared
    /// case-insensitively elsewhere; the stored alias preserves casing).
    pub fn union_aliases(&mut self, new_aliases: &[String]) {
        for alias in new_aliases {
            if !self.aliases.iter().any(|a| a == alias) {
                self.aliases.push(alias.clone());
            }
        }
    }
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub title: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub summary: String,
    pub metadata: EntityMetadata,
    /// First RawEvent this entity was extracted from.
    pub source_event_id: EventId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        title: impl Into<String>,
        entity_type: EntityType,
        summary: impl Into<String>,
        source_event_id: EventId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            entity_type,
            summary: summary.into(),
            metadata: EntityMetadata::default(),
            source_event_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a repeat mention: bump `mention_count`, append the event id,
    /// refresh `updated_at`. Does not touch `summary`.
    pub fn reinforce(&mut self, event_id: EventId, new_aliases: &[String]) {
        self.metadata.mention_count += 1;
        self.metadata.record_reference(event_id);
        self.metadata.union_aliases(new_aliases);
        self.updated_at = Utc::now();
    }
}

/// A slice of an entity's summary/cleaned text, keyed by `(entity_id, ordinal)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub entity_id: EntityId,
    pub text: String,
    pub ordinal: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// An embedding for a chunk, keyed 1:1 by `(chunk_id, model_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk_id: ChunkId,
    pub vector: Vector,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

/// Per-entity importance/recency/novelty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub entity_id: EntityId,
    pub importance: f32,
    pub recency: f32,
    pub novelty: f32,
    pub last_surfaced_at: DateTime<Utc>,
}

impl Signal {
    pub fn initial(entity_id: EntityId, entity_type: EntityType, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            importance: entity_type.default_importance(),
            recency: 1.0,
            novelty: 1.0,
            last_surfaced_at: now,
        }
    }

    /// Clamp all three scores into `[0, 1]`. Called after every mutation.
    pub fn clamp(&mut self) {
        self.importance = self.importance.clamp(0.0, 1.0);
        self.recency = self.recency.clamp(0.0, 1.0);
        self.novelty = self.novelty.clamp(0.0, 1.0);
    }
}

/// An open-string edge kind. Canonical constructors exist for the kinds the
/// pattern/topological strategies emit; arbitrary LLM-coined snake_case
/// kinds are constructed via `EdgeKind::new`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKind(String);

fn snake_case_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"[^a-z0-9]+").unwrap())
}

impl EdgeKind {
    /// Construct from an arbitrary string, coercing it to snake_case (runs
    /// of non-alphanumerics become a single underscore, trimmed). LLM-coined
    /// kinds are not trusted to already be snake_case.
    pub fn new(kind: impl Into<String>) -> Self {
        let raw = kind.into().to_lowercase();
        let normalized = snake_case_pattern().replace_all(&raw, "_").trim_matches('_').to_string();
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn role_at() -> Self {
        Self::new("role_at")
    }
    pub fn temporal_overlap() -> Self {
        Self::new("temporal_overlap")
    }
    pub fn inferred_connection() -> Self {
        Self::new("inferred_connection")
    }
    pub fn semantically_related() -> Self {
        Self::new("semantically_related")
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edge provenance/bookkeeping metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EdgeMetadata {
    pub source_strategy: String,
    #[serde(default)]
    pub reinforcement_count: u32,
    #[serde(default)]
    pub detected_in_events: Vec<EventId>,
}

impl EdgeMetadata {
    pub fn record_event(&mut self, event_id: Option<EventId>) {
        if let Some(id) = event_id {
            if !self.detected_in_events.contains(&id) {
                self.detected_in_events.push(id);
            }
        }
    }
}

/// A typed, weighted relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub from_id: EntityId,
    pub to_id: EntityId,
    pub kind: EdgeKind,
    pub confidence: f32,
    pub importance: f32,
    pub description: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub weight: f32,
    pub last_reinforced_at: DateTime<Utc>,
    pub metadata: EdgeMetadata,
    pub source_event_id: Option<EventId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Rejects self-loops and out-of-range weight/confidence, the invariants
    /// every edge must hold before it reaches storage.
    pub fn validate(&self) -> Result<(), String> {
        if self.from_id == self.to_id {
            return Err("self-edges are not allowed".to_string());
        }
        if self.weight < 0.0 {
            return Err(format!("weight {} must be >= 0", self.weight));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} out of range [0,1]", self.confidence));
        }
        Ok(())
    }
}

/// Status of a surfaced Insight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Open,
    Acknowledged,
    Dismissed,
}

/// Which entities/edges justify an insight, and what kind it is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InsightDrivers {
    pub entity_ids: Vec<EntityId>,
    pub edge_ids: Vec<EdgeId>,
    pub insight_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// A mentor-generated digest item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub id: InsightId,
    pub title: String,
    pub body: String,
    pub drivers: InsightDrivers,
    pub status: InsightStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pattern signature recorded after a dismiss, to avoid repeating ourselves
/// in future digests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternSignature {
    pub keywords: Vec<String>,
    pub entity_ids: Vec<EntityId>,
}

/// Aggregated record of repeatedly-dismissed insight patterns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DismissedPattern {
    pub id: DismissedPatternId,
    pub insight_type: String,
    pub driver_entity_types: Vec<EntityType>,
    pub pattern_signature: PatternSignature,
    pub dismissed_count: u32,
    pub first_dismissed_at: DateTime<Utc>,
    pub last_dismissed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pattern-based and topological strategies emit canonical snake_case
    /// kinds; pin their exact spelling so a typo doesn't silently fragment
    /// the same relationship into two edge kinds.
    #[test]
    fn canonical_edge_kinds_have_exact_spelling() {
        assert_eq!(EdgeKind::role_at().as_str(), "role_at");
        assert_eq!(EdgeKind::temporal_overlap().as_str(), "temporal_overlap");
        assert_eq!(EdgeKind::inferred_connection().as_str(), "inferred_connection");
        assert_eq!(EdgeKind::semantically_related().as_str(), "semantically_related");
    }

    #[test]
    fn edge_kind_new_normalizes_to_snake_case() {
        assert_eq!(EdgeKind::new("Mentored By").as_str(), "mentored_by");
        assert_eq!(EdgeKind::new("co-founded!!").as_str(), "co_founded");
    }

    #[test]
    fn entity_type_round_trips_through_str() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn edge_rejects_self_loop() {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let edge = Edge {
            id: Uuid::now_v7(),
            from_id: id,
            to_id: id,
            kind: EdgeKind::role_at(),
            confidence: 0.9,
            importance: 0.5,
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
        assert!(edge.validate().is_err());
    }

    #[test]
    fn signal_clamp_bounds_all_three_scores() {
        let mut s = Signal {
            entity_id: Uuid::now_v7(),
            importance: 1.4,
            recency: -0.2,
            novelty: 2.0,
            last_surfaced_at: Utc::now(),
        };
        s.clamp();
        assert_eq!(s.importance, 1.0);
        assert_eq!(s.recency, 0.0);
        assert_eq!(s.novelty, 1.0);
    }

    #[test]
    fn entity_reinforce_dedups_event_ids() {
        let event = Uuid::now_v7();
        let mut e = Entity::new("Acme", EntityType::Organization, "", event);
        e.reinforce(event, &["The Acme Corp".to_string()]);
        e.reinforce(event, &["The Acme Corp".to_string()]);
        assert_eq!(e.metadata.referenced_by_event_ids, vec![event]);
        assert_eq!(e.metadata.aliases, vec!["The Acme Corp".to_string()]);
        assert_eq!(e.metadata.mention_count, 2);
    }
}
