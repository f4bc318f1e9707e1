//! 向量集合服务
//!
//! 把文本查询转换为向量，按余弦距离做最近邻检索，并管理命名集合。
//! 每个操作都会等待自身的往返完成后才返回；并发覆盖同一个集合时，
//! 最终内容取决于执行顺序，调用方需要自行串行化。

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::client::{EmbeddingClient, OpenAiEmbeddingClient};
use crate::config::PgvecConfig;
use crate::database::{CollectionStore, Document, NearestRow, PgVectorStore, VectorRecord};
use crate::error::{Result, StoreError};

/// 检索结果：文本 + 相似度（1 - 余弦距离）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub content: String,
    pub metadata: Map<String, JsonValue>,
    pub score: f64,
}

impl From<NearestRow> for SearchResult {
    fn from(row: NearestRow) -> Self {
        SearchResult {
            content: row.content,
            metadata: row.metadata,
            score: 1.0 - row.distance,
        }
    }
}

pub struct VectorCollectionService<E, S> {
    embedder: E,
    store: S,
    collection: Option<String>,
}

/// 生产环境组合：OpenAI 兼容嵌入接口 + Postgres/pgvector
pub type PgVectorService = VectorCollectionService<OpenAiEmbeddingClient, PgVectorStore>;

impl PgVectorService {
    pub async fn connect(config: &PgvecConfig) -> Result<Self> {
        config.embedding.validate()?;
        let embedder = OpenAiEmbeddingClient::new(&config.embedding)?;
        let store = PgVectorStore::connect(&config.database, config.embedding.dimension).await?;
        Ok(Self::new(embedder, store))
    }
}

impl<E, S> VectorCollectionService<E, S>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    /// 未指定活动集合时，`search` 跨所有集合检索
    pub fn new(embedder: E, store: S) -> Self {
        Self {
            embedder,
            store,
            collection: None,
        }
    }

    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn set_collection(&mut self, name: Option<String>) {
        self.collection = name;
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// 查询文本对应的嵌入向量
    pub async fn get_vector(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.embedder.embed_query(text).await?;
        let expected = self.embedder.dimension();
        if vector.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    /// 在活动集合中检索（未设置活动集合时跨所有集合）
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.search_scoped(self.collection.as_deref(), query_text, k).await
    }

    pub async fn search_in(&self, collection: &str, query_text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.search_scoped(Some(collection), query_text, k).await
    }

    pub async fn search_all(&self, query_text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.search_scoped(None, query_text, k).await
    }

    async fn search_scoped(&self, collection: Option<&str>, query_text: &str, k: usize) -> Result<Vec<SearchResult>> {
        if query_text.trim().is_empty() {
            return Err(StoreError::InvalidInput("query text must not be empty".to_string()));
        }
        if k == 0 {
            return Err(StoreError::InvalidInput("k must be at least 1".to_string()));
        }

        let vector = self.get_vector(query_text).await?;
        let rows = self.store.query_nearest(collection, &vector, k).await?;
        debug!(
            "Search in {} returned {} rows (k = {})",
            collection.unwrap_or("<all collections>"),
            rows.len(),
            k
        );

        Ok(rows.into_iter().map(SearchResult::from).collect())
    }

    /// 从文档创建集合；`overwrite` 为 true 时先删除同名集合。
    /// 所有文档先完成嵌入再整批写入，嵌入失败时存储保持不变。
    pub async fn create_or_replace_collection(
        &self,
        documents: Vec<Document>,
        collection_name: &str,
        overwrite: bool,
    ) -> Result<()> {
        if collection_name.trim().is_empty() {
            return Err(StoreError::InvalidInput("collection name must not be empty".to_string()));
        }

        info!(
            "Creating collection {} from {} documents (overwrite: {})",
            collection_name,
            documents.len(),
            overwrite
        );

        let records = if documents.is_empty() {
            Vec::new()
        } else {
            let texts = documents.iter().map(|d| d.content.clone()).collect();
            let embeddings = self.embedder.embed(texts).await?;
            if embeddings.len() != documents.len() {
                return Err(StoreError::EmbeddingProvider(crate::client::EmbeddingError::InvalidResponse(
                    format!("Expected {} embeddings, got {}", documents.len(), embeddings.len()),
                )));
            }
            documents
                .into_iter()
                .zip(embeddings)
                .map(|(document, embedding)| VectorRecord::new(document, embedding))
                .collect()
        };

        self.store.load_collection(collection_name, records, overwrite).await
    }

    pub async fn list_collections(&self) -> Result<BTreeSet<String>> {
        self.store.list_collections().await
    }

    /// 用给定文档整体替换集合内容（不是合并）。
    /// 先查询再写入，两步之间不是原子的。
    pub async fn update_collection(&self, documents: Vec<Document>, collection_name: &str) -> Result<()> {
        info!("Updating collection: {}", collection_name);
        let exists = self.list_collections().await?.contains(collection_name);
        self.create_or_replace_collection(documents, collection_name, exists).await
    }

    /// 集合不存在时只记录警告
    pub async fn delete_collection(&self, collection_name: &str) -> Result<()> {
        info!("Deleting collection: {}", collection_name);
        if !self.store.delete_collection(collection_name).await? {
            warn!("Collection {} not found, nothing to delete", collection_name);
        }
        Ok(())
    }
}
