use chrono::{DateTime, Utc};

use crate::types::{EntityType, EventStatus, InsightStatus};

/// Query criteria for `Storage::list_entities`.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub types: Option<Vec<EntityType>>,
    pub title_substring: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: Vec<EntityType>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_title_substring(mut self, s: impl Into<String>) -> Self {
        self.title_substring = Some(s.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Query criteria for `Storage::list_edges`.
#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    pub min_weight: Option<f32>,
    pub max_weight: Option<f32>,
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn below_weight(weight: f32) -> Self {
        Self {
            max_weight: Some(weight),
            ..Self::default()
        }
    }
}

/// Query criteria for `Storage::list_events`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn with_status(status: EventStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Query criteria for `Storage::list_insights`.
#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub status: Option<InsightStatus>,
    pub limit: Option<usize>,
}

/// Database-wide counters, surfaced via `GET /status` and friends.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub entity_count: u64,
    pub edge_count: u64,
    pub pending_events: u64,
    pub processed_events: u64,
    pub failed_events: u64,
    pub db_size_bytes: u64,
}
