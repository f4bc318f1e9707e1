pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod service;

pub use client::{EmbeddingClient, EmbeddingError, EmbeddingResult, OpenAiEmbeddingClient};
pub use config::{ConfigError, DatabaseConfig, EmbeddingConfig, PgvecConfig};
pub use database::{CollectionStore, Document, MemoryStore, NearestRow, PgVectorStore, VectorRecord};
pub use error::{Result, StoreError};
pub use service::{PgVectorService, SearchResult, VectorCollectionService};
