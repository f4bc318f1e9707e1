pub mod memory;
pub mod pgvector;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::Result;

pub use memory::MemoryStore;
pub use pgvec_indexing::Document;
pub use self::pgvector::PgVectorStore;

/// 向量库中的一条记录，写入后不可修改
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: Uuid,
    pub content: String,
    pub metadata: Map<String, JsonValue>,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn new(document: Document, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: document.content,
            metadata: document.metadata,
            embedding,
        }
    }
}

/// 最近邻查询返回的原始行，distance 为余弦距离
#[derive(Debug, Clone, PartialEq)]
pub struct NearestRow {
    pub id: Uuid,
    pub content: String,
    pub metadata: Map<String, JsonValue>,
    pub distance: f64,
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// 目录表不存在时返回空集合
    async fn list_collections(&self) -> Result<BTreeSet<String>>;

    /// 整批写入；`overwrite` 为 true 时先删除同名集合，否则追加到已有集合
    async fn load_collection(&self, name: &str, records: Vec<VectorRecord>, overwrite: bool) -> Result<()>;

    /// 返回是否真的删除了集合
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// 按余弦距离升序返回前 k 条；`collection` 为 None 时跨所有集合查询
    async fn query_nearest(&self, collection: Option<&str>, vector: &[f32], k: usize) -> Result<Vec<NearestRow>>;
}
