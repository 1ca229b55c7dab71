pub mod embedding;
pub mod index;

pub use embedding::{cosine_similarity, embedding_input, EmbeddingService, FastEmbedService};
pub use index::{HnswIndex, SimilarityResult, VectorFilter, VectorIndex};
