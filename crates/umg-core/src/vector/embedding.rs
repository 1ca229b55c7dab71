use fastembed::{EmbeddingModel, InitOptions, TextEmbedding as FastEmbedModel};

use crate::error::{UmgError, UmgResult};
use crate::types::{Entity, Vector};

/// Service for generating text embeddings. Abstracted behind a trait so
/// the Archivist's embedding stage and the Entity Resolver's
/// optional semantic match stay testable without a live model.
pub trait EmbeddingService: Send + Sync {
    fn embed(&self, text: &str) -> UmgResult<Vector>;
    fn embed_batch(&self, texts: &[String]) -> UmgResult<Vec<Vector>>;
    fn dimension(&self) -> usize;
    fn model_id(&self) -> &str;
}

/// FastEmbed-backed embedding service, the default production implementation.
pub struct FastEmbedService {
    model: FastEmbedModel,
    model_id: String,
    dimension: usize,
}

impl FastEmbedService {
    pub fn new() -> UmgResult<Self> {
        Self::with_model(EmbeddingModel::BGESmallENV15)
    }

    pub fn with_model(model: EmbeddingModel) -> UmgResult<Self> {
        let init_options = InitOptions::new(model.clone());
        let fastembed_model = FastEmbedModel::try_new(init_options)
            .map_err(|e| UmgError::Embedding(anyhow::anyhow!(e.to_string())))?;

        let model_id = format!("{:?}", model);
        let dimension = match model {
            EmbeddingModel::BGESmallENV15 => 384,
            EmbeddingModel::BGEBaseENV15 => 768,
            EmbeddingModel::BGELargeENV15 => 1024,
            EmbeddingModel::AllMiniLML6V2 => 384,
            EmbeddingModel::AllMiniLML12V2 => 384,
            _ => 384,
        };

        Ok(Self {
            model: fastembed_model,
            model_id,
            dimension,
        })
    }
}

impl EmbeddingService for FastEmbedService {
    fn embed(&self, text: &str) -> UmgResult<Vector> {
        let embeddings = self
            .model
            .embed(vec![text.to_string()], None)
            .map_err(|e| UmgError::Embedding(anyhow::anyhow!(e.to_string())))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| UmgError::Embedding(anyhow::anyhow!("no embedding generated")))
    }

    fn embed_batch(&self, texts: &[String]) -> UmgResult<Vec<Vector>> {
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| UmgError::Embedding(anyhow::anyhow!(e.to_string())))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl<E: EmbeddingService> EmbeddingService for std::sync::Arc<E> {
    fn embed(&self, text: &str) -> UmgResult<Vector> {
        (**self).embed(text)
    }
    fn embed_batch(&self, texts: &[String]) -> UmgResult<Vec<Vector>> {
        (**self).embed_batch(texts)
    }
    fn dimension(&self) -> usize {
        (**self).dimension()
    }
    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Builds the text fed to the embedding model for a chunk's owning entity —
/// type and title give the model context the raw chunk text alone lacks.
pub fn embedding_input(entity: &Entity, chunk_text: &str) -> String {
    format!(
        "{}: {}\n{}",
        entity.entity_type.as_str(),
        entity.title,
        chunk_text
    )
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;
    use uuid::Uuid;

    #[test]
    fn embedding_input_includes_type_and_title() {
        let entity = Entity::new("Acme Corp", EntityType::Organization, "", Uuid::now_v7());
        let input = embedding_input(&entity, "Acme is a nonprofit arts org.");
        assert!(input.contains("organization: Acme Corp"));
        assert!(input.contains("nonprofit arts org"));
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.1, 0.2, 0.3, 0.4];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
