use crate::{Fields, RecordStore};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Pool, Postgres};

/// Record store backed by the `lab_records` table (one jsonb document per key).
pub struct PostgresRecordStore {
    db: Pool<Postgres>,
}

impl PostgresRecordStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn doc_exists(&self, collection: &str, key: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM lab_records WHERE collection = $1 AND doc_key = $2)",
        )
        .bind(collection)
        .bind(key)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn doc_get(&self, collection: &str, key: &str) -> Result<Option<Fields>> {
        let row: Option<sqlx::types::Json<Fields>> = sqlx::query_scalar(
            "SELECT fields FROM lab_records WHERE collection = $1 AND doc_key = $2",
        )
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|json| json.0))
    }

    async fn doc_merge_set(&self, collection: &str, key: &str, fields: Fields) -> Result<()> {
        // jsonb `||` overwrites top-level keys present in the patch and keeps the rest.
        sqlx::query(
            r#"
            INSERT INTO lab_records (collection, doc_key, fields)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, doc_key) DO UPDATE
            SET fields = lab_records.fields || EXCLUDED.fields,
                updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(sqlx::types::Json(fields))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn doc_create_if_absent(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO lab_records (collection, doc_key, fields)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, doc_key) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(sqlx::types::Json(fields))
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
