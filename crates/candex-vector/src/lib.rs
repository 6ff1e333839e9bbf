//! Candex Vector Storage - collection management and similarity search
//!
//! This crate provides:
//! - `VectorStore` trait over a single named collection of candidate points
//! - In-memory store for tests and local runs
//! - Qdrant integration (optional, feature-gated)

pub mod error;
pub mod store;
pub mod types;

#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use error::{VectorError, VectorResult};
pub use store::{InMemoryVectorStore, VectorStore};
pub use types::{point_id, CollectionConfig, IndexPoint, PointPayload, ScoredPoint, SearchFilter, SearchQuery};

#[cfg(feature = "qdrant")]
pub use qdrant::{QdrantConfig, QdrantVectorStore};

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{VectorError, VectorResult};
    pub use crate::store::VectorStore;
    pub use crate::types::{CollectionConfig, IndexPoint, PointPayload, ScoredPoint, SearchFilter, SearchQuery};
}
