use std::collections::BTreeSet;

use ::pgvector::Vector;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DatabaseConfig, validate_identifier};
use crate::database::{CollectionStore, NearestRow, VectorRecord};
use crate::error::{Result, StoreError, is_undefined_table};

#[derive(Debug, FromRow)]
struct NearestRowRecord {
    id: Uuid,
    document: Option<String>,
    cmetadata: Option<JsonValue>,
    distance: f64,
}

impl From<NearestRowRecord> for NearestRow {
    fn from(row: NearestRowRecord) -> Self {
        let metadata = match row.cmetadata {
            Some(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };
        NearestRow {
            id: row.id,
            content: row.document.unwrap_or_default(),
            metadata,
            distance: row.distance,
        }
    }
}

pub struct PgVectorStore {
    pool: PgPool,
    collection_table: String,
    embedding_table: String,
    dimensions: usize,
}

impl PgVectorStore {
    /// 建立连接池；表结构在第一次写入时才创建
    pub async fn connect(config: &DatabaseConfig, dimensions: usize) -> Result<Self> {
        config.validate()?;
        let url = config.connection_url()?;

        info!(
            "Connecting to postgres at {}:{}/{} (driver: {})",
            config.host, config.port, config.database, config.driver
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url.as_str())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::new(pool, config, dimensions)
    }

    pub fn new(pool: PgPool, config: &DatabaseConfig, dimensions: usize) -> Result<Self> {
        validate_identifier(&config.collection_table)?;
        validate_identifier(&config.embedding_table)?;

        Ok(Self {
            pool,
            collection_table: config.collection_table.clone(),
            embedding_table: config.embedding_table.clone(),
            dimensions,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn init_schema(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&mut **tx)
            .await?;

        let collection_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{}" (
                uuid UUID PRIMARY KEY,
                name VARCHAR NOT NULL UNIQUE,
                cmetadata JSONB DEFAULT '{{}}'::jsonb
            );"#,
            self.collection_table,
        );
        sqlx::query(&collection_sql).execute(&mut **tx).await?;

        let embedding_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{}" (
                id UUID PRIMARY KEY,
                collection_id UUID NOT NULL REFERENCES "{}" (uuid) ON DELETE CASCADE,
                embedding VECTOR({}) NOT NULL,
                document TEXT,
                cmetadata JSONB DEFAULT '{{}}'::jsonb,
                seq BIGSERIAL
            );"#,
            self.embedding_table, self.collection_table, self.dimensions,
        );
        sqlx::query(&embedding_sql).execute(&mut **tx).await?;

        Ok(())
    }

    async fn get_or_create_collection(&self, tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<Uuid> {
        sqlx::query(&format!(
            r#"INSERT INTO "{}" (uuid, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING"#,
            self.collection_table
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .execute(&mut **tx)
        .await?;

        let (uuid,): (Uuid,) = sqlx::query_as(&format!(
            r#"SELECT uuid FROM "{}" WHERE name = $1"#,
            self.collection_table
        ))
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;

        Ok(uuid)
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

#[async_trait]
impl CollectionStore for PgVectorStore {
    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let rows: std::result::Result<Vec<(String,)>, sqlx::Error> = sqlx::query_as(&format!(
            r#"SELECT name FROM "{}" ORDER BY name"#,
            self.collection_table
        ))
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => Ok(rows.into_iter().map(|(name,)| name).collect()),
            Err(e) if is_undefined_table(&e) => {
                warn!("Collection table {} does not exist yet", self.collection_table);
                Ok(BTreeSet::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_collection(&self, name: &str, records: Vec<VectorRecord>, overwrite: bool) -> Result<()> {
        for record in &records {
            self.check_dimension(record.embedding.len())?;
        }

        let mut tx = self.pool.begin().await?;
        self.init_schema(&mut tx).await?;

        if overwrite {
            let removed = sqlx::query(&format!(r#"DELETE FROM "{}" WHERE name = $1"#, self.collection_table))
                .bind(name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            debug!("Dropped {} existing collection(s) named {}", removed, name);
        }

        let collection_id = self.get_or_create_collection(&mut tx, name).await?;

        let insert_sql = format!(
            r#"INSERT INTO "{}" (id, collection_id, embedding, document, cmetadata)
               VALUES ($1, $2, $3, $4, $5)"#,
            self.embedding_table
        );
        let count = records.len();
        for record in records {
            sqlx::query(&insert_sql)
                .bind(record.id)
                .bind(collection_id)
                .bind(Vector::from(record.embedding))
                .bind(record.content)
                .bind(JsonValue::Object(record.metadata))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!("Stored {} records in collection {}", count, name);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let result = sqlx::query(&format!(r#"DELETE FROM "{}" WHERE name = $1"#, self.collection_table))
            .bind(name)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(e) if is_undefined_table(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn query_nearest(&self, collection: Option<&str>, vector: &[f32], k: usize) -> Result<Vec<NearestRow>> {
        self.check_dimension(vector.len())?;

        let sql = format!(
            r#"SELECT e.id, e.document, e.cmetadata, (e.embedding <=> $1) AS distance
               FROM "{}" e
               JOIN "{}" c ON c.uuid = e.collection_id
               WHERE ($2::varchar IS NULL OR c.name = $2)
               ORDER BY distance ASC, e.seq ASC
               LIMIT $3"#,
            self.embedding_table, self.collection_table
        );

        let rows = sqlx::query_as::<_, NearestRowRecord>(&sql)
            .bind(Vector::from(vector.to_vec()))
            .bind(collection)
            .bind(i64::try_from(k).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await;

        match rows {
            Ok(rows) => Ok(rows.into_iter().map(NearestRow::from).collect()),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
