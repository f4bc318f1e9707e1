//! 进程内向量存储
//!
//! 暴力计算余弦距离，不依赖数据库；用于测试和离线运行。

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::database::{CollectionStore, NearestRow, VectorRecord};
use crate::error::{Result, StoreError};

#[derive(Debug)]
struct StoredRecord {
    seq: u64,
    record: VectorRecord,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    collections: BTreeMap<String, Vec<StoredRecord>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    dimensions: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// 集合中的记录数，集合不存在时为 None
    pub async fn record_count(&self, name: &str) -> Option<usize> {
        self.inner.read().await.collections.get(name).map(Vec::len)
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                got: len,
            });
        }
        Ok(())
    }
}

/// 余弦距离 = 1 - cos(a, b)；零向量视为完全不相似
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        Ok(self.inner.read().await.collections.keys().cloned().collect())
    }

    async fn load_collection(&self, name: &str, records: Vec<VectorRecord>, overwrite: bool) -> Result<()> {
        for record in &records {
            self.check_dimension(record.embedding.len())?;
        }

        let mut inner = self.inner.write().await;
        let mut seq = inner.next_seq;
        let stored: Vec<StoredRecord> = records
            .into_iter()
            .map(|record| {
                seq += 1;
                StoredRecord { seq, record }
            })
            .collect();
        inner.next_seq = seq;

        let entry = inner.collections.entry(name.to_string()).or_default();
        if overwrite {
            entry.clear();
        }
        entry.extend(stored);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.inner.write().await.collections.remove(name).is_some())
    }

    async fn query_nearest(&self, collection: Option<&str>, vector: &[f32], k: usize) -> Result<Vec<NearestRow>> {
        self.check_dimension(vector.len())?;

        let inner = self.inner.read().await;
        let mut scored: Vec<(f64, u64, &VectorRecord)> = inner
            .collections
            .iter()
            .filter(|(name, _)| collection.is_none_or(|wanted| wanted == name.as_str()))
            .flat_map(|(_, records)| records.iter())
            .map(|stored| (cosine_distance(&stored.record.embedding, vector), stored.seq, &stored.record))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, _, record)| NearestRow {
                id: record.id,
                content: record.content.clone(),
                metadata: record.metadata.clone(),
                distance,
            })
            .collect())
    }
}
