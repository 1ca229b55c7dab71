use chrono::Utc;
use redb::{Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{UmgError, UmgResult};
use crate::storage::filters::{EdgeFilter, EntityFilter, EventFilter, InsightFilter, StorageStats};
use crate::storage::traits::Storage;
use crate::types::{
    Chunk, ChunkId, DismissedPattern, DismissedPatternId, Edge, EdgeId, EdgeKind, EmbeddingRecord,
    Entity, EntityId, EventId, EventStatus, Insight, InsightId, InsightStatus, RawEvent, Signal,
};

const RAW_EVENTS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("raw_events");
const ENTITIES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("entities");
const CHUNKS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("chunks");
const EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");
const SIGNALS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("signals");
const EDGES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("edges");
const INSIGHTS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("insights");
const DISMISSED_PATTERNS: TableDefinition<&[u8; 16], &[u8]> =
    TableDefinition::new("dismissed_patterns");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const EVENTS_BY_STATUS: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("raw_events_by_status");
const ENTITIES_BY_TYPE: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("entities_by_type");
const CHUNKS_BY_ENTITY: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("chunks_by_entity");
const EDGES_BY_FROM: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("edges_by_from");
const EDGES_BY_TO: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("edges_by_to");
const INSIGHTS_BY_STATUS: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("insights_by_status");

/// Uniqueness index enforcing I2: one edge per `(from_id, to_id, kind)`.
const EDGE_BY_TRIPLE: TableDefinition<&[u8], &[u8; 16]> = TableDefinition::new("edge_by_triple");

pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";
const STATS_ENTITY_COUNT_KEY: &str = "stats:entity_count";
const STATS_EDGE_COUNT_KEY: &str = "stats:edge_count";

/// `redb`-backed implementation of [`Storage`]. One file, all seven tables
/// of the data model plus their secondary indexes.
pub struct RedbStorage {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> UmgResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| UmgError::Config(format!("failed to create directory: {e}")))?;
            }
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;

        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(RAW_EVENTS)?;
                let _ = write_txn.open_table(ENTITIES)?;
                let _ = write_txn.open_table(CHUNKS)?;
                let _ = write_txn.open_table(EMBEDDINGS)?;
                let _ = write_txn.open_table(SIGNALS)?;
                let _ = write_txn.open_table(EDGES)?;
                let _ = write_txn.open_table(INSIGHTS)?;
                let _ = write_txn.open_table(DISMISSED_PATTERNS)?;
                let _ = write_txn.open_table(EDGE_BY_TRIPLE)?;
                let _ = write_txn.open_multimap_table(EVENTS_BY_STATUS)?;
                let _ = write_txn.open_multimap_table(ENTITIES_BY_TYPE)?;
                let _ = write_txn.open_multimap_table(CHUNKS_BY_ENTITY)?;
                let _ = write_txn.open_multimap_table(EDGES_BY_FROM)?;
                let _ = write_txn.open_multimap_table(EDGES_BY_TO)?;
                let _ = write_txn.open_multimap_table(INSIGHTS_BY_STATUS)?;
                let mut meta = write_txn.open_table(META)?;
                if is_new {
                    meta.insert(SCHEMA_VERSION_KEY, CURRENT_SCHEMA_VERSION.to_string().as_bytes())?;
                }
            }
            write_txn.commit()?;
        }

        if !is_new {
            Self::check_schema_version(&db)?;
        }

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    fn check_schema_version(db: &Database) -> UmgResult<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table
                .and_then(|t| {
                    t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                        std::str::from_utf8(v.value())
                            .ok()
                            .and_then(|s| s.parse::<u32>().ok())
                    })
                })
                .unwrap_or(1)
        };
        if version != CURRENT_SCHEMA_VERSION {
            return Err(UmgError::Config(format!(
                "database schema v{version} does not match binary schema v{CURRENT_SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn uuid_to_bytes(id: &Uuid) -> [u8; 16] {
        *id.as_bytes()
    }

    fn bytes_to_uuid(bytes: &[u8; 16]) -> Uuid {
        Uuid::from_bytes(*bytes)
    }

    fn triple_key(from_id: EntityId, to_id: EntityId, kind: &EdgeKind) -> Vec<u8> {
        let mut key = Vec::with_capacity(32 + kind.as_str().len());
        key.extend_from_slice(from_id.as_bytes());
        key.extend_from_slice(to_id.as_bytes());
        key.extend_from_slice(kind.as_str().as_bytes());
        key
    }

    fn increment_meta_counter(&self, key: &str) -> UmgResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            let current = Self::read_counter_in_txn(&meta, key)?;
            meta.insert(key, (current + 1).to_le_bytes().as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn decrement_meta_counter(&self, key: &str) -> UmgResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            let current = Self::read_counter_in_txn(&meta, key)?;
            meta.insert(key, current.saturating_sub(1).to_le_bytes().as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_counter_in_txn(
        meta: &redb::Table<&str, &[u8]>,
        key: &str,
    ) -> UmgResult<u64> {
        Ok(meta
            .get(key)?
            .map(|v| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(v.value());
                u64::from_le_bytes(bytes)
            })
            .unwrap_or(0))
    }

    fn read_meta_counter(&self, key: &str) -> UmgResult<u64> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        Self::read_counter_in_txn(&meta, key)
    }
}

impl Storage for RedbStorage {
    fn put_raw_event(&self, event: &RawEvent) -> UmgResult<()> {
        let id_bytes = Self::uuid_to_bytes(&event.id);
        let write_txn = self.db.begin_write()?;

        let old_status = {
            let table = write_txn.open_table(RAW_EVENTS)?;
            table
                .get(&id_bytes)?
                .map(|g| bincode::deserialize::<RawEvent>(g.value()))
                .transpose()?
                .map(|e| e.status)
        };

        let bytes = bincode::serialize(event)?;
        {
            let mut table = write_txn.open_table(RAW_EVENTS)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        {
            let mut status_idx = write_txn.open_multimap_table(EVENTS_BY_STATUS)?;
            if let Some(old) = old_status {
                if old != event.status {
                    status_idx.remove(old.as_str(), &id_bytes)?;
                }
            }
            status_idx.insert(event.status.as_str(), &id_bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_raw_event(&self, id: EventId) -> UmgResult<Option<RawEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RAW_EVENTS)?;
        let id_bytes = Self::uuid_to_bytes(&id);
        table
            .get(&id_bytes)?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn find_event_by_idempotency_key(&self, key: &str) -> UmgResult<Option<RawEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RAW_EVENTS)?;
        for row in table.iter()? {
            let (_, value) = row?;
            let event: RawEvent = bincode::deserialize(value.value())?;
            if event.idempotency_key.as_deref() == Some(key) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn list_events(&self, filter: EventFilter) -> UmgResult<Vec<RawEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RAW_EVENTS)?;
        let mut events = Vec::new();

        if let Some(status) = filter.status {
            let status_idx = read_txn.open_multimap_table(EVENTS_BY_STATUS)?;
            for id_bytes in status_idx.get(status.as_str())? {
                let id_bytes = *id_bytes?.value();
                if let Some(bytes) = table.get(&id_bytes)? {
                    events.push(bincode::deserialize::<RawEvent>(bytes.value())?);
                }
            }
        } else {
            for item in table.iter()? {
                let (_, value) = item?;
                events.push(bincode::deserialize::<RawEvent>(value.value())?);
            }
        }

        if let Some(after) = filter.created_after {
            events.retain(|e| e.created_at > after);
        }
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn set_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        failure_reason: Option<String>,
    ) -> UmgResult<()> {
        let mut event = self.get_raw_event(id)?.ok_or(UmgError::EventNotFound(id))?;
        if status == EventStatus::Failed {
            event.retries += 1;
        }
        event.status = status;
        event.failure_reason = failure_reason;
        event.updated_at = Utc::now();
        self.put_raw_event(&event)
    }

    fn put_entity(&self, entity: &Entity) -> UmgResult<()> {
        let id_bytes = Self::uuid_to_bytes(&entity.id);
        let write_txn = self.db.begin_write()?;

        let is_new = {
            let table = write_txn.open_table(ENTITIES)?;
            table.get(&id_bytes)?.is_none()
        };

        let bytes = bincode::serialize(entity)?;
        {
            let mut table = write_txn.open_table(ENTITIES)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        {
            let mut type_idx = write_txn.open_multimap_table(ENTITIES_BY_TYPE)?;
            type_idx.insert(entity.entity_type.as_str(), &id_bytes)?;
        }
        write_txn.commit()?;
        if is_new {
            self.increment_meta_counter(STATS_ENTITY_COUNT_KEY)?;
        }
        Ok(())
    }

    fn get_entity(&self, id: EntityId) -> UmgResult<Option<Entity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;
        let id_bytes = Self::uuid_to_bytes(&id);
        table
            .get(&id_bytes)?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn list_entities(&self, filter: EntityFilter) -> UmgResult<Vec<Entity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITIES)?;
        let mut entities = Vec::new();

        if let Some(ref types) = filter.types {
            let type_idx = read_txn.open_multimap_table(ENTITIES_BY_TYPE)?;
            for t in types {
                for id_bytes in type_idx.get(t.as_str())? {
                    let id_bytes = *id_bytes?.value();
                    if let Some(bytes) = table.get(&id_bytes)? {
                        entities.push(bincode::deserialize::<Entity>(bytes.value())?);
                    }
                }
            }
        } else {
            for item in table.iter()? {
                let (_, value) = item?;
                entities.push(bincode::deserialize::<Entity>(value.value())?);
            }
        }

        if let Some(ref needle) = filter.title_substring {
            let needle_lower = needle.to_lowercase();
            entities.retain(|e| e.title.to_lowercase().contains(&needle_lower));
        }
        if let Some(after) = filter.created_after {
            entities.retain(|e| e.created_at > after);
        }
        if let Some(before) = filter.created_before {
            entities.retain(|e| e.created_at < before);
        }

        entities.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let start = filter.offset.unwrap_or(0);
        let end = filter.limit.map(|l| start + l).unwrap_or(entities.len());
        Ok(entities.into_iter().skip(start).take(end.saturating_sub(start)).collect())
    }

    fn put_chunk(&self, chunk: &Chunk) -> UmgResult<()> {
        let id_bytes = Self::uuid_to_bytes(&chunk.id);
        let entity_bytes = Self::uuid_to_bytes(&chunk.entity_id);
        let bytes = bincode::serialize(chunk)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHUNKS)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        {
            let mut idx = write_txn.open_multimap_table(CHUNKS_BY_ENTITY)?;
            idx.insert(&entity_bytes, &id_bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_chunk(&self, id: crate::types::ChunkId) -> UmgResult<Option<Chunk>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHUNKS)?;
        let id_bytes = Self::uuid_to_bytes(&id);
        match table.get(&id_bytes)? {
            Some(bytes) => Ok(Some(bincode::deserialize(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn chunks_for_entity(&self, entity_id: EntityId) -> UmgResult<Vec<Chunk>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHUNKS)?;
        let idx = read_txn.open_multimap_table(CHUNKS_BY_ENTITY)?;
        let entity_bytes = Self::uuid_to_bytes(&entity_id);
        let mut chunks = Vec::new();
        for id_bytes in idx.get(&entity_bytes)? {
            let id_bytes = *id_bytes?.value();
            if let Some(bytes) = table.get(&id_bytes)? {
                chunks.push(bincode::deserialize::<Chunk>(bytes.value())?);
            }
        }
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    fn put_embedding(&self, embedding: &EmbeddingRecord) -> UmgResult<()> {
        let key = format!("{}:{}", embedding.chunk_id, embedding.model_id);
        let bytes = bincode::serialize(embedding)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EMBEDDINGS)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_embedding(&self, chunk_id: ChunkId, model_id: &str) -> UmgResult<Option<EmbeddingRecord>> {
        let key = format!("{chunk_id}:{model_id}");
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EMBEDDINGS)?;
        table
            .get(key.as_str())?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn all_embeddings(&self, model_id: &str) -> UmgResult<Vec<EmbeddingRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EMBEDDINGS)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let rec: EmbeddingRecord = bincode::deserialize(value.value())?;
            if rec.model_id == model_id {
                out.push(rec);
            }
        }
        Ok(out)
    }

    fn put_signal(&self, signal: &Signal) -> UmgResult<()> {
        let id_bytes = Self::uuid_to_bytes(&signal.entity_id);
        let bytes = bincode::serialize(signal)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SIGNALS)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_signal(&self, entity_id: EntityId) -> UmgResult<Option<Signal>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNALS)?;
        let id_bytes = Self::uuid_to_bytes(&entity_id);
        table
            .get(&id_bytes)?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn all_signals(&self) -> UmgResult<Vec<Signal>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNALS)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            out.push(bincode::deserialize::<Signal>(value.value())?);
        }
        Ok(out)
    }

    fn put_edge(&self, edge: &Edge) -> UmgResult<()> {
        edge.validate().map_err(UmgError::Validation)?;

        let from_bytes = Self::uuid_to_bytes(&edge.from_id);
        let to_bytes = Self::uuid_to_bytes(&edge.to_id);
        let id_bytes = Self::uuid_to_bytes(&edge.id);
        let triple_key = Self::triple_key(edge.from_id, edge.to_id, &edge.kind);

        let write_txn = self.db.begin_write()?;

        {
            let entities = write_txn.open_table(ENTITIES)?;
            if entities.get(&from_bytes)?.is_none() {
                return Err(UmgError::InvalidEdge(format!(
                    "source entity {} does not exist",
                    edge.from_id
                )));
            }
            if entities.get(&to_bytes)?.is_none() {
                return Err(UmgError::InvalidEdge(format!(
                    "target entity {} does not exist",
                    edge.to_id
                )));
            }
        }

        let is_new = {
            let triple_idx = write_txn.open_table(EDGE_BY_TRIPLE)?;
            match triple_idx.get(triple_key.as_slice())? {
                Some(existing) if *existing.value() != id_bytes => {
                    return Err(UmgError::DuplicateEdge {
                        from: edge.from_id,
                        to: edge.to_id,
                        kind: edge.kind.to_string(),
                    });
                }
                Some(_) => false,
                None => true,
            }
        };

        let bytes = bincode::serialize(edge)?;
        {
            let mut table = write_txn.open_table(EDGES)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        {
            let mut triple_idx = write_txn.open_table(EDGE_BY_TRIPLE)?;
            triple_idx.insert(triple_key.as_slice(), &id_bytes)?;
        }
        {
            let mut from_idx = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            from_idx.insert(&from_bytes, &id_bytes)?;
        }
        {
            let mut to_idx = write_txn.open_multimap_table(EDGES_BY_TO)?;
            to_idx.insert(&to_bytes, &id_bytes)?;
        }
        write_txn.commit()?;
        if is_new {
            self.increment_meta_counter(STATS_EDGE_COUNT_KEY)?;
        }
        Ok(())
    }

    fn get_edge(&self, id: EdgeId) -> UmgResult<Option<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let id_bytes = Self::uuid_to_bytes(&id);
        table
            .get(&id_bytes)?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn get_edge_by_triple(
        &self,
        from_id: EntityId,
        to_id: EntityId,
        kind: &EdgeKind,
    ) -> UmgResult<Option<Edge>> {
        let triple_key = Self::triple_key(from_id, to_id, kind);
        let read_txn = self.db.begin_read()?;
        let triple_idx = read_txn.open_table(EDGE_BY_TRIPLE)?;
        let Some(id_bytes) = triple_idx.get(triple_key.as_slice())? else {
            return Ok(None);
        };
        let id_bytes = *id_bytes.value();
        let edges = read_txn.open_table(EDGES)?;
        edges
            .get(&id_bytes)?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn delete_edge(&self, id: EdgeId) -> UmgResult<()> {
        let edge = self.get_edge(id)?.ok_or(UmgError::EdgeNotFound(id))?;
        let id_bytes = Self::uuid_to_bytes(&id);
        let from_bytes = Self::uuid_to_bytes(&edge.from_id);
        let to_bytes = Self::uuid_to_bytes(&edge.to_id);
        let triple_key = Self::triple_key(edge.from_id, edge.to_id, &edge.kind);

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EDGES)?;
            table.remove(&id_bytes)?;
        }
        {
            let mut triple_idx = write_txn.open_table(EDGE_BY_TRIPLE)?;
            triple_idx.remove(triple_key.as_slice())?;
        }
        {
            let mut from_idx = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            from_idx.remove(&from_bytes, &id_bytes)?;
        }
        {
            let mut to_idx = write_txn.open_multimap_table(EDGES_BY_TO)?;
            to_idx.remove(&to_bytes, &id_bytes)?;
        }
        write_txn.commit()?;
        self.decrement_meta_counter(STATS_EDGE_COUNT_KEY)?;
        Ok(())
    }

    fn edges_from(&self, entity_id: EntityId) -> UmgResult<Vec<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let idx = read_txn.open_multimap_table(EDGES_BY_FROM)?;
        let entity_bytes = Self::uuid_to_bytes(&entity_id);
        let mut edges = Vec::new();
        for id_bytes in idx.get(&entity_bytes)? {
            let id_bytes = *id_bytes?.value();
            if let Some(bytes) = table.get(&id_bytes)? {
                edges.push(bincode::deserialize::<Edge>(bytes.value())?);
            }
        }
        Ok(edges)
    }

    fn edges_to(&self, entity_id: EntityId) -> UmgResult<Vec<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let idx = read_txn.open_multimap_table(EDGES_BY_TO)?;
        let entity_bytes = Self::uuid_to_bytes(&entity_id);
        let mut edges = Vec::new();
        for id_bytes in idx.get(&entity_bytes)? {
            let id_bytes = *id_bytes?.value();
            if let Some(bytes) = table.get(&id_bytes)? {
                edges.push(bincode::deserialize::<Edge>(bytes.value())?);
            }
        }
        Ok(edges)
    }

    fn edges_between(&self, a: EntityId, b: EntityId) -> UmgResult<Vec<Edge>> {
        let mut edges = self.edges_from(a)?;
        edges.retain(|e| e.to_id == b);
        let mut reverse = self.edges_from(b)?;
        reverse.retain(|e| e.to_id == a);
        edges.extend(reverse);
        Ok(edges)
    }

    fn list_edges(&self, filter: EdgeFilter) -> UmgResult<Vec<Edge>> {
        let mut edges = self.all_edges()?;
        if let Some(min) = filter.min_weight {
            edges.retain(|e| e.weight >= min);
        }
        if let Some(max) = filter.max_weight {
            edges.retain(|e| e.weight < max);
        }
        if let Some(ref kind) = filter.kind {
            edges.retain(|e| e.kind.as_str() == kind);
        }
        if let Some(limit) = filter.limit {
            edges.truncate(limit);
        }
        Ok(edges)
    }

    fn all_edges(&self) -> UmgResult<Vec<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let mut edges = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            edges.push(bincode::deserialize::<Edge>(value.value())?);
        }
        Ok(edges)
    }

    fn put_insight(&self, insight: &Insight) -> UmgResult<()> {
        let id_bytes = Self::uuid_to_bytes(&insight.id);
        let write_txn = self.db.begin_write()?;
        let old_status = {
            let table = write_txn.open_table(INSIGHTS)?;
            table
                .get(&id_bytes)?
                .map(|g| bincode::deserialize::<Insight>(g.value()))
                .transpose()?
                .map(|i| i.status)
        };
        let bytes = bincode::serialize(insight)?;
        {
            let mut table = write_txn.open_table(INSIGHTS)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        {
            let mut status_idx = write_txn.open_multimap_table(INSIGHTS_BY_STATUS)?;
            if let Some(old) = old_status {
                if old != insight.status {
                    status_idx.remove(status_label(old), &id_bytes)?;
                }
            }
            status_idx.insert(status_label(insight.status), &id_bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_insight(&self, id: InsightId) -> UmgResult<Option<Insight>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INSIGHTS)?;
        let id_bytes = Self::uuid_to_bytes(&id);
        table
            .get(&id_bytes)?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn list_insights(&self, filter: InsightFilter) -> UmgResult<Vec<Insight>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INSIGHTS)?;
        let mut insights = Vec::new();
        if let Some(status) = filter.status {
            let idx = read_txn.open_multimap_table(INSIGHTS_BY_STATUS)?;
            for id_bytes in idx.get(status_label(status))? {
                let id_bytes = *id_bytes?.value();
                if let Some(bytes) = table.get(&id_bytes)? {
                    insights.push(bincode::deserialize::<Insight>(bytes.value())?);
                }
            }
        } else {
            for item in table.iter()? {
                let (_, value) = item?;
                insights.push(bincode::deserialize::<Insight>(value.value())?);
            }
        }
        insights.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            insights.truncate(limit);
        }
        Ok(insights)
    }

    fn put_dismissed_pattern(&self, pattern: &DismissedPattern) -> UmgResult<()> {
        let id_bytes = Self::uuid_to_bytes(&pattern.id);
        let bytes = bincode::serialize(pattern)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DISMISSED_PATTERNS)?;
            table.insert(&id_bytes, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_dismissed_patterns(&self) -> UmgResult<Vec<DismissedPattern>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DISMISSED_PATTERNS)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            out.push(bincode::deserialize::<DismissedPattern>(value.value())?);
        }
        Ok(out)
    }

    fn get_dismissed_pattern(&self, id: DismissedPatternId) -> UmgResult<Option<DismissedPattern>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DISMISSED_PATTERNS)?;
        let id_bytes = Self::uuid_to_bytes(&id);
        table
            .get(&id_bytes)?
            .map(|g| bincode::deserialize(g.value()).map_err(UmgError::from))
            .transpose()
    }

    fn stats(&self) -> UmgResult<StorageStats> {
        let entity_count = self.read_meta_counter(STATS_ENTITY_COUNT_KEY)?;
        let edge_count = self.read_meta_counter(STATS_EDGE_COUNT_KEY)?;
        let pending_events = self.list_events(EventFilter::with_status(EventStatus::Pending))?.len() as u64;
        let processed_events = self.list_events(EventFilter::with_status(EventStatus::Processed))?.len() as u64;
        let failed_events = self.list_events(EventFilter::with_status(EventStatus::Failed))?.len() as u64;
        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(StorageStats {
            entity_count,
            edge_count,
            pending_events,
            processed_events,
            failed_events,
            db_size_bytes,
        })
    }

    fn snapshot(&self, path: &Path) -> UmgResult<()> {
        self.db.begin_write()?.commit()?;
        std::fs::copy(&self.path, path)
            .map_err(|e| UmgError::Config(format!("snapshot copy failed: {e}")))?;
        Ok(())
    }
}

fn status_label(status: InsightStatus) -> &'static str {
    match status {
        InsightStatus::Open => "open",
        InsightStatus::Acknowledged => "acknowledged",
        InsightStatus::Dismissed => "dismissed",
    }
}
