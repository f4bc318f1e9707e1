use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use pgvec_core::{CollectionStore, EmbeddingClient, PgvecConfig, SearchResult, VectorCollectionService};
use pgvec_indexing::{CharacterSplitter, Document, TextLoader};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Chunking {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// 按该模型的 token 计长，未设置时按字符
    pub tokens: Option<String>,
}

impl Chunking {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, model: Option<String>) -> Self {
        self.tokens = model;
        self
    }

    fn splitter(&self) -> Result<CharacterSplitter> {
        let splitter = CharacterSplitter::new(self.chunk_size, self.chunk_overlap)?;
        match &self.tokens {
            None => Ok(splitter),
            #[cfg(feature = "token-aware")]
            Some(model) => Ok(splitter.token_aware(model)?),
            #[cfg(not(feature = "token-aware"))]
            Some(_) => bail!("--tokens requires pgvec to be built with the `token-aware` feature"),
        }
    }
}

/// 默认配置文件：`<config_dir>/pgvec/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(dir.join("pgvec").join("config.toml"))
}

/// 读取配置文件，再用环境变量覆盖
pub fn load_config(path: Option<&Path>) -> Result<PgvecConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    let mut config = read_config_file(&path)?;
    config.apply_env().context("Invalid environment configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<PgvecConfig> {
    PgvecConfig::load(path).with_context(|| format!("Failed to load config file: {}", path.display()))
}

pub fn load_documents(file: &Path, chunking: &Chunking) -> Result<Vec<Document>> {
    let documents = TextLoader::new(file).load()?;
    let splitter = chunking.splitter()?;
    let chunks = splitter.split_documents(&documents);
    info!("Split {} into {} chunks", file.display(), chunks.len());
    Ok(chunks)
}

pub async fn load_collection<E, S>(
    service: &VectorCollectionService<E, S>,
    file: &Path,
    collection: &str,
    chunking: &Chunking,
    overwrite: bool,
) -> Result<()>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    let documents = load_documents(file, chunking)?;
    let count = documents.len();
    service
        .create_or_replace_collection(documents, collection, overwrite)
        .await
        .with_context(|| format!("Failed to load collection {}", collection))?;
    println!("Loaded {} chunks into collection '{}'", count, collection);
    Ok(())
}

pub async fn update_collection<E, S>(
    service: &VectorCollectionService<E, S>,
    file: &Path,
    collection: &str,
    chunking: &Chunking,
) -> Result<()>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    let documents = load_documents(file, chunking)?;
    let count = documents.len();
    service
        .update_collection(documents, collection)
        .await
        .with_context(|| format!("Failed to update collection {}", collection))?;
    println!("Collection '{}' now holds {} chunks", collection, count);
    Ok(())
}

pub async fn search<E, S>(service: &VectorCollectionService<E, S>, query: &str, k: usize) -> Result<()>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    let results = service.search(query, k).await.context("Search failed")?;
    if results.is_empty() {
        println!("No results.");
    }
    for (rank, result) in results.iter().enumerate() {
        println!("{}", format_result(rank + 1, result));
    }
    Ok(())
}

pub fn format_result(rank: usize, result: &SearchResult) -> String {
    let source = result
        .metadata
        .get("source")
        .and_then(|s| s.as_str())
        .map(|s| format!(" ({})", s))
        .unwrap_or_default();
    format!("[{}] score {:.4}{}\n{}\n", rank, result.score, source, result.content.trim())
}

pub async fn list_collections<E, S>(service: &VectorCollectionService<E, S>) -> Result<()>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    let names = service.list_collections().await.context("Failed to list collections")?;
    if names.is_empty() {
        println!("No collections.");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

pub async fn delete_collections<E, S>(service: &VectorCollectionService<E, S>, names: &[String]) -> Result<()>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    if names.is_empty() {
        bail!("No collection names given");
    }
    for name in names {
        service
            .delete_collection(name)
            .await
            .with_context(|| format!("Failed to delete collection {}", name))?;
        println!("Deleted '{}'", name);
    }
    Ok(())
}

/// 重复执行检索，打印首条结果与平均耗时（秒，保留两位小数）
pub async fn bench<E, S>(service: &VectorCollectionService<E, S>, query: &str, k: usize, runs: usize) -> Result<()>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    let (results, average) = average_execution_time(service, query, k, runs).await?;
    if let Some(first) = results.first() {
        println!("{}", first.content.trim());
    }
    println!(
        "\nThe search took an average of {:.2} seconds to execute.",
        average.as_secs_f64()
    );
    Ok(())
}

pub async fn average_execution_time<E, S>(
    service: &VectorCollectionService<E, S>,
    query: &str,
    k: usize,
    runs: usize,
) -> Result<(Vec<SearchResult>, Duration)>
where
    E: EmbeddingClient,
    S: CollectionStore,
{
    if runs == 0 {
        bail!("runs must be at least 1");
    }

    let mut total = Duration::ZERO;
    let mut results = Vec::new();
    for _ in 0..runs {
        let start = Instant::now();
        results = service.search(query, k).await.context("Search failed")?;
        total += start.elapsed();
    }

    Ok((results, total.div_f64(runs as f64)))
}
