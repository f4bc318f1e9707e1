//! 需要本地 Postgres + pgvector，运行方式：
//! `PGVECTOR_PASSWORD=... cargo test -p pgvec-core --test pgvector_live -- --ignored`

use async_trait::async_trait;
use pgvec_core::{
    CollectionStore, DatabaseConfig, Document, EmbeddingClient, EmbeddingResult, PgVectorStore, PgvecConfig,
    VectorCollectionService,
};

/// 三维玩具嵌入：sky / cats / other
struct ToyEmbedder;

#[async_trait]
impl EmbeddingClient for ToyEmbedder {
    async fn embed(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                vec![
                    if t.contains("sky") { 1.0 } else { 0.0 },
                    if t.contains("cat") { 1.0 } else { 0.0 },
                    0.1,
                ]
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        3
    }
}

fn test_config() -> DatabaseConfig {
    let mut config = PgvecConfig::from_env().expect("config from env").database;
    config.collection_table = "pgvec_live_collection".to_string();
    config.embedding_table = "pgvec_live_embedding".to_string();
    config
}

async fn service(collection: &str) -> VectorCollectionService<ToyEmbedder, PgVectorStore> {
    let store = PgVectorStore::connect(&test_config(), 3)
        .await
        .expect("Failed to connect");
    VectorCollectionService::new(ToyEmbedder, store).with_collection(collection)
}

#[tokio::test]
#[ignore]
async fn demo_scenario_round_trip() {
    let service = service("live-demo").await;
    service
        .create_or_replace_collection(
            vec![Document::new("The sky is blue."), Document::new("Cats are mammals.")],
            "live-demo",
            true,
        )
        .await
        .unwrap();

    let results = service.search("sky color", 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "The sky is blue.");

    assert!(service.list_collections().await.unwrap().contains("live-demo"));
    service.delete_collection("live-demo").await.unwrap();
    assert!(!service.list_collections().await.unwrap().contains("live-demo"));
}

#[tokio::test]
#[ignore]
async fn overwrite_and_update_replace_contents() {
    let service = service("live-update").await;
    service
        .create_or_replace_collection(vec![Document::new("cats"), Document::new("more cats")], "live-update", true)
        .await
        .unwrap();
    service
        .update_collection(vec![Document::new("sky")], "live-update")
        .await
        .unwrap();

    let results = service.search("cats", 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "sky");

    service.delete_collection("live-update").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn missing_collection_is_benign() {
    let service = service("live-missing").await;
    service.delete_collection("live-missing").await.unwrap();
    assert!(service.search("sky", 3).await.unwrap().is_empty());
    assert!(!service.store().delete_collection("live-missing").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn first_run_without_tables_is_empty() {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let mut config = test_config();
    config.collection_table = format!("pgvec_fresh_collection_{}", &suffix[..8]);
    config.embedding_table = format!("pgvec_fresh_embedding_{}", &suffix[..8]);

    let store = PgVectorStore::connect(&config, 3).await.expect("Failed to connect");
    for table in [&config.embedding_table, &config.collection_table] {
        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{}""#, table))
            .execute(store.pool())
            .await
            .unwrap();
    }

    let service = VectorCollectionService::new(ToyEmbedder, store);
    assert!(service.list_collections().await.unwrap().is_empty());
    assert!(!service.store().delete_collection("anything").await.unwrap());
    service.delete_collection("anything").await.unwrap();
    assert!(service.search("sky", 3).await.unwrap().is_empty());
    assert!(service.search_in("anything", "sky", 3).await.unwrap().is_empty());
}
