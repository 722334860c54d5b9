//! SQLite-backed [`DocumentStore`].
//!
//! All runs share one `documents` table; each run writes under its own
//! namespace (the run id), so concurrent runs never see each other's
//! collections.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use sotaforge_core::models::Document;
use sotaforge_core::store::{document_id, DocumentStore};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn upsert(&self, collection: &str, documents: &[Document]) -> Result<Vec<String>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(documents.len());

        for doc in documents {
            let id = document_id(collection, doc);
            let payload = serde_json::to_string(doc)?;

            sqlx::query(
                r#"
                INSERT INTO documents (namespace, collection, id, title, url, source_type,
                                       parsed, payload_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(namespace, collection, id) DO UPDATE SET
                    title = excluded.title,
                    url = excluded.url,
                    source_type = excluded.source_type,
                    parsed = excluded.parsed,
                    payload_json = excluded.payload_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.namespace)
            .bind(collection)
            .bind(&id)
            .bind(doc.title())
            .bind(doc.url())
            .bind(doc.source_type().as_str())
            .bind(doc.is_parsed())
            .bind(&payload)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            ids.push(id);
        }

        tx.commit().await?;
        tracing::debug!(
            namespace = %self.namespace,
            collection,
            count = ids.len(),
            "upserted documents"
        );
        Ok(ids)
    }

    async fn fetch(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT id, payload_json FROM documents
            WHERE namespace = ? AND collection = ?
            ORDER BY rowid ASC
            LIMIT ?
            "#,
        )
        .bind(&self.namespace)
        .bind(collection)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let payload: String = row.get("payload_json");
                serde_json::from_str(&payload)
                    .with_context(|| format!("corrupt document payload for id {}", id))
            })
            .collect()
    }
}
