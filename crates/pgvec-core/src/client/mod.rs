pub mod openai;

use async_trait::async_trait;

pub use openai::OpenAiEmbeddingClient;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("API error: {0}")]
    Api(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid vector: {0}")]
    InvalidVector(String),
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// 统一向量嵌入接口
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// 批量嵌入文本，返回顺序与输入一致
    async fn embed(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// 嵌入单条查询文本
    async fn embed_query(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding returned for query".to_string()))
    }

    /// 获取向量维度
    fn dimension(&self) -> usize;
}
