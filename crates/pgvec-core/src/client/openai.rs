use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{EmbeddingClient, EmbeddingError, EmbeddingResult};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize, Debug)]
struct ApiError {
    code: Option<serde_json::Value>,
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: ApiError,
}

/// OpenAI 兼容的 `/embeddings` 接口客户端（OpenAI、DashScope compatible-mode 等）
pub struct OpenAiEmbeddingClient {
    api_key: String,
    endpoint: String,
    model: String,
    client: Client,
    dimension: usize,
    batch_size: usize,
    timeout_secs: u64,
    /// 是否启用归一化
    normalize: bool,
}

impl std::fmt::Debug for OpenAiEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .field("normalize", &self.normalize)
            .finish()
    }
}

impl OpenAiEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            client,
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            timeout_secs: config.timeout_secs,
            normalize: config.normalize,
        })
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// L2 归一化单个 embedding 向量，确保 ||v|| = 1.0
    fn normalize_embedding(&self, embedding: &mut [f32]) -> EmbeddingResult<()> {
        if !self.normalize {
            return Ok(());
        }

        if embedding.is_empty() {
            return Err(EmbeddingError::InvalidVector("Empty embedding vector".to_string()));
        }

        let norm = embedding
            .iter()
            .map(|&x| (x as f64).powi(2))
            .sum::<f64>()
            .sqrt() as f32;

        if norm.abs() < 1e-8 {
            return Err(EmbeddingError::InvalidVector("Zero vector cannot be normalized".to_string()));
        }

        for value in embedding.iter_mut() {
            *value /= norm;
        }

        Ok(())
    }

    fn map_send_error(&self, e: reqwest::Error) -> EmbeddingError {
        if e.is_timeout() {
            EmbeddingError::Timeout(self.timeout_secs)
        } else {
            EmbeddingError::Network(e.to_string())
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        debug!("Requesting {} embeddings from {}", texts.len(), self.endpoint);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            warn!("Embedding API returned {}", status);
            return Err(match serde_json::from_str::<ErrorResponse>(&resp_text) {
                Ok(err_resp) => {
                    let msg = err_resp.error.message.unwrap_or_else(|| "Unknown error".to_string());
                    let code = match err_resp.error.code {
                        Some(serde_json::Value::String(code)) => code,
                        Some(other) => other.to_string(),
                        None => status.as_u16().to_string(),
                    };
                    EmbeddingError::Api(format!("[{}] {}", code, msg))
                }
                Err(_) => EmbeddingError::Api(format!("HTTP {}: {}", status, resp_text.trim())),
            });
        }

        let value: serde_json::Value = serde_json::from_str(&resp_text)
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let mut vectors = parse_embeddings(&value)?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        for embedding in vectors.iter_mut() {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::InvalidVector(format!(
                    "Embedding dim mismatch: expected {}, got {}",
                    self.dimension,
                    embedding.len()
                )));
            }
            self.normalize_embedding(embedding)?;
        }

        Ok(vectors)
    }
}

/// 兼容两种响应格式：OpenAI 的 `data[]` 与达摩院原生的 `output.embeddings[]`
fn parse_embeddings(value: &serde_json::Value) -> EmbeddingResult<Vec<Vec<f32>>> {
    fn to_vector(item: &serde_json::Value) -> Option<Vec<f32>> {
        item.get("embedding").and_then(|e| e.as_array()).map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
    }

    let items = value
        .get("data")
        .and_then(|d| d.as_array())
        .or_else(|| {
            value
                .get("output")
                .and_then(|o| o.get("embeddings"))
                .and_then(|e| e.as_array())
        })
        .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding data in response".to_string()))?;

    let mut indexed = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let index = item
            .get("index")
            .or_else(|| item.get("text_index"))
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = to_vector(item)
            .ok_or_else(|| EmbeddingError::InvalidResponse(format!("Item {} has no embedding", position)))?;
        indexed.push((index, embedding));
    }
    indexed.sort_by_key(|(index, _)| *index);

    // 索引必须恰好覆盖 0..n，不允许重复或越界
    let misplaced = indexed
        .iter()
        .enumerate()
        .find(|(position, (index, _))| index != position);
    if let Some((position, (index, _))) = misplaced {
        return Err(EmbeddingError::InvalidResponse(format!(
            "Embedding index {} does not match expected position {}",
            index, position
        )));
    }

    Ok(indexed.into_iter().map(|(_, embedding)| embedding).collect())
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(EmbeddingError::Api("Input texts cannot be empty".to_string()));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            api_base: server.uri(),
            api_key: "test-key".to_string(),
            model: "test-embedding".to_string(),
            dimension: 3,
            timeout_secs: 1,
            batch_size: 16,
            normalize: true,
        }
    }

    fn norm(v: &[f32]) -> f64 {
        v.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt()
    }

    #[tokio::test]
    async fn embeds_in_input_order_and_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "model": "test-embedding",
                "data": [
                    {"index": 1, "embedding": [0.0, 4.0, 0.0]},
                    {"index": 0, "embedding": [3.0, 0.0, 4.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server)).unwrap();
        let vectors = client
            .embed(vec!["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        assert!((vectors[0][0] - 0.6).abs() < 1e-6);
        assert!((vectors[0][2] - 0.8).abs() < 1e-6);
        assert!((vectors[1][1] - 1.0).abs() < 1e-6);
        for v in &vectors {
            assert!((norm(v) - 1.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn splits_requests_by_batch_size() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .expect(3)
            .mount(&server)
            .await;

        let mut config = test_config(&server);
        config.batch_size = 1;
        let client = OpenAiEmbeddingClient::new(&config).unwrap();
        let vectors = client
            .embed(vec!["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 3);
    }

    #[tokio::test]
    async fn accepts_dashscope_native_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": {"embeddings": [{"text_index": 0, "embedding": [1.0, 1.0, 0.0]}]}
            })))
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server))
            .unwrap()
            .with_normalize(false);
        let vector = client.embed_query("hello").await.unwrap();

        assert_eq!(vector, vec![1.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "rate_limit_exceeded", "message": "Rate limit reached"}
            })))
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server)).unwrap();
        let result = client.embed_query("hello").await;

        match result {
            Err(EmbeddingError::Api(msg)) => {
                assert_eq!(msg, "[rate_limit_exceeded] Rate limit reached");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn plain_text_error_body_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client.embed_query("hello").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::Api(ref msg) if msg.starts_with("HTTP 401")));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({"data": []})),
            )
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client.embed_query("hello").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::Timeout(1)));
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client.embed_query("hello").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::InvalidVector(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_indices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]},
                    {"index": 0, "embedding": [0.0, 1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client
            .embed(vec!["first".to_string(), "second".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let parsed = parse_embeddings(&json!({
            "data": [
                {"index": 0, "embedding": [1.0, 0.0, 0.0]},
                {"index": 5, "embedding": [0.0, 1.0, 0.0]}
            ]
        }));
        assert!(matches!(parsed, Err(EmbeddingError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = OpenAiEmbeddingClient::new(&test_config(&server)).unwrap();
        let result = client.embed(vec![]).await;

        if let Err(EmbeddingError::Api(msg)) = result {
            assert_eq!(msg, "Input texts cannot be empty");
        } else {
            panic!("Expected Api error for empty input");
        }
    }

    #[test]
    fn zero_vector_cannot_be_normalized() {
        let config = EmbeddingConfig {
            api_key: "k".to_string(),
            dimension: 4,
            ..EmbeddingConfig::default()
        };
        let client = OpenAiEmbeddingClient::new(&config).unwrap();

        let mut zero_vector = vec![0.0f32; 4];
        let result = client.normalize_embedding(&mut zero_vector);

        assert!(matches!(result, Err(EmbeddingError::InvalidVector(msg)) if msg.contains("Zero vector")));
    }
}
