use instant_distance::{Builder, HnswMap, Point, Search};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{UmgError, UmgResult};
use crate::types::{ChunkId, EntityType, Vector};

/// Result from a similarity search over chunk embeddings.
#[derive(Debug, Clone)]
pub struct SimilarityResult {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub distance: f32,
}

/// Filter applied post-search, restricting results by the owning entity's
/// type.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub entity_types: Option<Vec<EntityType>>,
    pub exclude: Option<Vec<ChunkId>>,
}

impl VectorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_types(mut self, types: Vec<EntityType>) -> Self {
        self.entity_types = Some(types);
        self
    }

    pub fn excluding(mut self, ids: Vec<ChunkId>) -> Self {
        self.exclude = Some(ids);
        self
    }
}

/// Nearest-neighbor search over chunk embeddings, backing the
/// embedding-similarity relationship strategy and the Entity Resolver's
/// semantic match step.
pub trait VectorIndex: Send + Sync {
    fn insert(&mut self, id: ChunkId, embedding: &Vector, entity_type: EntityType) -> UmgResult<()>;
    fn remove(&mut self, id: ChunkId) -> UmgResult<()>;
    fn search(
        &self,
        query: &Vector,
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> UmgResult<Vec<SimilarityResult>>;
    fn search_threshold(
        &self,
        query: &Vector,
        threshold: f32,
        filter: Option<&VectorFilter>,
    ) -> UmgResult<Vec<SimilarityResult>>;
    fn search_batch(
        &self,
        queries: &[(ChunkId, Vector)],
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> UmgResult<HashMap<ChunkId, Vec<SimilarityResult>>>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn rebuild(&mut self) -> UmgResult<()>;
    fn save(&self, path: &Path) -> UmgResult<()>;
    fn load(path: &Path) -> UmgResult<Self>
    where
        Self: Sized;
}

#[derive(Clone, Debug)]
struct EmbeddingPoint(Vec<f32>);

impl Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        let norm_a: f32 = self.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = other.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - (dot / (norm_a * norm_b))
    }
}

/// HNSW-based implementation. Inserts are buffered into `vectors`/`rebuild`
/// is required before they are reachable from `search` via the HNSW graph;
/// until then `search` falls back to brute force (exact, just slower).
pub struct HnswIndex {
    index: Option<HnswMap<EmbeddingPoint, ChunkId>>,
    vectors: HashMap<ChunkId, Vec<f32>>,
    entity_types: HashMap<ChunkId, EntityType>,
    dimension: usize,
}

impl HnswIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            index: None,
            vectors: HashMap::new(),
            entity_types: HashMap::new(),
            dimension,
        }
    }

    fn matches_filter(&self, id: &ChunkId, filter: &VectorFilter) -> bool {
        if let Some(ref exclude) = filter.exclude {
            if exclude.contains(id) {
                return false;
            }
        }
        if let Some(ref types) = filter.entity_types {
            if let Some(t) = self.entity_types.get(id) {
                if !types.contains(t) {
                    return false;
                }
            }
        }
        true
    }

    fn distance_to_similarity(distance: f32) -> f32 {
        (1.0 - distance).clamp(0.0, 1.0)
    }

    fn brute_force_search(
        &self,
        query: &Vector,
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> UmgResult<Vec<SimilarityResult>> {
        let query_point = EmbeddingPoint(query.clone());
        let mut results: Vec<SimilarityResult> = self
            .vectors
            .iter()
            .filter(|(id, _)| filter.map(|f| self.matches_filter(id, f)).unwrap_or(true))
            .map(|(id, vec)| {
                let distance = query_point.distance(&EmbeddingPoint(vec.clone()));
                SimilarityResult {
                    chunk_id: *id,
                    score: Self::distance_to_similarity(distance),
                    distance,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }
}

impl VectorIndex for HnswIndex {
    fn insert(&mut self, id: ChunkId, embedding: &Vector, entity_type: EntityType) -> UmgResult<()> {
        if embedding.len() != self.dimension {
            return Err(UmgError::Embedding(anyhow::anyhow!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        self.vectors.insert(id, embedding.clone());
        self.entity_types.insert(id, entity_type);
        Ok(())
    }

    fn remove(&mut self, id: ChunkId) -> UmgResult<()> {
        self.vectors.remove(&id);
        self.entity_types.remove(&id);
        Ok(())
    }

    fn search(
        &self,
        query: &Vector,
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> UmgResult<Vec<SimilarityResult>> {
        if self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        let Some(index) = self.index.as_ref() else {
            return self.brute_force_search(query, k, filter);
        };

        let query_point = EmbeddingPoint(query.clone());
        let mut search = Search::default();
        let results = index.search(&query_point, &mut search);

        let mut filtered = Vec::new();
        for item in results.take(k * 10) {
            let chunk_id = *item.value;
            let distance = item.distance;
            if let Some(f) = filter {
                if !self.matches_filter(&chunk_id, f) {
                    continue;
                }
            }
            filtered.push(SimilarityResult {
                chunk_id,
                score: Self::distance_to_similarity(distance),
                distance,
            });
            if filtered.len() >= k {
                break;
            }
        }
        Ok(filtered)
    }

    fn search_threshold(
        &self,
        query: &Vector,
        threshold: f32,
        filter: Option<&VectorFilter>,
    ) -> UmgResult<Vec<SimilarityResult>> {
        let results = self.search(query, self.vectors.len().max(1), filter)?;
        Ok(results.into_iter().filter(|r| r.score >= threshold).collect())
    }

    fn search_batch(
        &self,
        queries: &[(ChunkId, Vector)],
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> UmgResult<HashMap<ChunkId, Vec<SimilarityResult>>> {
        let results: Vec<(ChunkId, UmgResult<Vec<SimilarityResult>>)> = queries
            .par_iter()
            .map(|(id, embedding)| (*id, self.search(embedding, k, filter)))
            .collect();

        let mut map = HashMap::with_capacity(results.len());
        for (id, result) in results {
            map.insert(id, result?);
        }
        Ok(map)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn rebuild(&mut self) -> UmgResult<()> {
        if self.vectors.is_empty() {
            self.index = None;
            return Ok(());
        }
        let mut points = Vec::new();
        let mut values = Vec::new();
        for (id, vec) in &self.vectors {
            points.push(EmbeddingPoint(vec.clone()));
            values.push(*id);
        }
        self.index = Some(Builder::default().build(points, values));
        Ok(())
    }

    fn save(&self, path: &Path) -> UmgResult<()> {
        let data = bincode::serialize(&(&self.vectors, &self.entity_types, self.dimension))?;
        fs::write(path, data).map_err(|e| UmgError::Config(format!("failed to write index: {e}")))?;
        Ok(())
    }

    fn load(path: &Path) -> UmgResult<Self> {
        let data = fs::read(path).map_err(|e| UmgError::Config(format!("failed to read index: {e}")))?;
        let (vectors, entity_types, dimension): (
            HashMap<ChunkId, Vec<f32>>,
            HashMap<ChunkId, EntityType>,
            usize,
        ) = bincode::deserialize(&data)?;

        let mut index = Self {
            index: None,
            vectors,
            entity_types,
            dimension,
        };
        index.rebuild()?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn insert_and_search_finds_nearest() {
        let mut index = HnswIndex::new(3);
        let id1 = Uuid::now_v7();
        let id2 = Uuid::now_v7();
        let id3 = Uuid::now_v7();

        index.insert(id1, &vec![1.0, 0.0, 0.0], EntityType::Concept).unwrap();
        index.insert(id2, &vec![0.9, 0.1, 0.0], EntityType::Concept).unwrap();
        index.insert(id3, &vec![0.0, 1.0, 0.0], EntityType::Concept).unwrap();
        index.rebuild().unwrap();

        let results = index.search(&vec![1.0, 0.0, 0.0], 2, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, id1);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut index = HnswIndex::new(3);
        assert!(index.insert(Uuid::now_v7(), &vec![1.0, 2.0], EntityType::Concept).is_err());
    }

    #[test]
    fn filter_by_entity_type() {
        let mut index = HnswIndex::new(3);
        let id1 = Uuid::now_v7();
        let id2 = Uuid::now_v7();
        index.insert(id1, &vec![1.0, 0.0, 0.0], EntityType::Person).unwrap();
        index.insert(id2, &vec![0.9, 0.1, 0.0], EntityType::Organization).unwrap();
        index.rebuild().unwrap();

        let filter = VectorFilter::new().with_entity_types(vec![EntityType::Organization]);
        let results = index.search(&vec![1.0, 0.0, 0.0], 5, Some(&filter)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, id2);
    }

    #[test]
    fn threshold_search_drops_dissimilar() {
        let mut index = HnswIndex::new(3);
        let close = Uuid::now_v7();
        let far = Uuid::now_v7();
        index.insert(close, &vec![1.0, 0.0, 0.0], EntityType::Concept).unwrap();
        index.insert(far, &vec![0.0, 0.0, 1.0], EntityType::Concept).unwrap();
        index.rebuild().unwrap();

        let results = index.search_threshold(&vec![1.0, 0.0, 0.0], 0.5, None).unwrap();
        assert!(results.iter().all(|r| r.score >= 0.5));
        assert!(results.iter().any(|r| r.chunk_id == close));
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.bin");
        let mut index = HnswIndex::new(3);
        let id = Uuid::now_v7();
        index.insert(id, &vec![1.0, 0.0, 0.0], EntityType::Concept).unwrap();
        index.rebuild().unwrap();
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let results = loaded.search(&vec![1.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(results[0].chunk_id, id);
    }
}
