//! SQLite-backed vector store for vendor knowledge chunks.
//!
//! Durable mapping from `chunk_id` to (embedding, content, metadata), with
//! cosine similarity search, vendor-filtered search, and full scans for
//! aggregation. Vectors live in a BLOB column; similarity is computed in
//! Rust over candidate rows at query time.
//!
//! Failure semantics: no public method raises past the store boundary.
//! Upstream/database errors are logged and converted into an empty or
//! `false` result; callers treat empty as "no data" unless a success flag
//! says otherwise. The only cross-request state is the lazily populated
//! vendor-name cache, invalidated by [`VectorStore::reset`].

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::warn;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{KnowledgeChunk, StoreStats, VendorSpendEntry};
use crate::money;

/// One stored chunk returned by a similarity query. `distance` is
/// `1 - cosine`, so lower means more relevant.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub vendor_name: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub distance: f64,
}

/// One stored chunk returned by an unranked full retrieval.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub vendor_name: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

pub struct VectorStore {
    pool: SqlitePool,
    collection: String,
    vendor_cache: RwLock<Option<Vec<String>>>,
}

impl VectorStore {
    /// Open (or create) the store at `db_path` and run migrations.
    pub async fn open(db_path: &Path, collection: &str) -> Result<Self> {
        let pool = crate::db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            collection: collection.to_string(),
            vendor_cache: RwLock::new(None),
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Store chunks that carry a non-empty embedding; `chunk_id` is the
    /// primary key, so re-upserting overwrites. Returns `false` when no
    /// chunk has an embedding or the write fails.
    pub async fn upsert(&self, chunks: &[KnowledgeChunk]) -> bool {
        let embeddable: Vec<&KnowledgeChunk> = chunks
            .iter()
            .filter(|c| c.embedding.as_ref().is_some_and(|e| !e.is_empty()))
            .collect();

        if embeddable.is_empty() {
            warn!("no chunks with embeddings to store");
            return false;
        }

        match self.try_upsert(&embeddable).await {
            Ok(()) => {
                self.invalidate_vendor_cache().await;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to store embeddings");
                false
            }
        }
    }

    async fn try_upsert(&self, chunks: &[&KnowledgeChunk]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let embedding = match chunk.embedding.as_ref() {
                Some(e) => e,
                None => continue,
            };
            let mut metadata = chunk.metadata.clone();
            metadata.insert("chunk_id".into(), chunk.chunk_id.clone().into());
            metadata.insert("vendor_name".into(), chunk.vendor_name.clone().into());
            let metadata_json = serde_json::to_string(&metadata)?;

            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, vendor_name, content, metadata_json, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    vendor_name = excluded.vendor_name,
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.vendor_name)
            .bind(&chunk.content)
            .bind(&metadata_json)
            .bind(vec_to_blob(embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All stored chunk ids, used to compute the incremental-load delta.
    pub async fn list_ids(&self) -> HashSet<String> {
        match sqlx::query_scalar::<_, String>("SELECT chunk_id FROM chunks")
            .fetch_all(&self.pool)
            .await
        {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "failed to list chunk ids");
                HashSet::new()
            }
        }
    }

    /// Top-k chunks by ascending distance over the whole collection.
    pub async fn similarity_search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        self.search_rows(query, None, k).await
    }

    /// Top-k chunks restricted to one vendor. The metadata equality is
    /// case-sensitive; only question-text matching is case-insensitive.
    pub async fn similarity_search_filtered(
        &self,
        query: &[f32],
        vendor_name: &str,
        k: usize,
    ) -> Vec<ScoredChunk> {
        self.search_rows(query, Some(vendor_name), k).await
    }

    async fn search_rows(
        &self,
        query: &[f32],
        vendor_name: Option<&str>,
        k: usize,
    ) -> Vec<ScoredChunk> {
        let rows = match vendor_name {
            Some(vendor) => {
                sqlx::query(
                    "SELECT chunk_id, vendor_name, content, metadata_json, embedding \
                     FROM chunks WHERE vendor_name = ?",
                )
                .bind(vendor)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, vendor_name, content, metadata_json, embedding FROM chunks",
                )
                .fetch_all(&self.pool)
                .await
            }
        };

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "similarity search query failed");
                return Vec::new();
            }
        };

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let similarity = cosine_similarity(query, &vec) as f64;
                ScoredChunk {
                    chunk_id: row.get("chunk_id"),
                    vendor_name: row.get("vendor_name"),
                    content: row.get("content"),
                    metadata: parse_metadata(row.get("metadata_json")),
                    distance: 1.0 - similarity,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

    /// Every chunk for a vendor, unranked. Used by exhaustive detail views
    /// where completeness matters more than relevance.
    pub async fn get_all_by_vendor(&self, vendor_name: &str) -> Vec<StoredChunk> {
        let rows = sqlx::query(
            "SELECT chunk_id, vendor_name, content, metadata_json \
             FROM chunks WHERE vendor_name = ? ORDER BY created_at, chunk_id",
        )
        .bind(vendor_name)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .iter()
                .map(|row| StoredChunk {
                    chunk_id: row.get("chunk_id"),
                    vendor_name: row.get("vendor_name"),
                    content: row.get("content"),
                    metadata: parse_metadata(row.get("metadata_json")),
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, vendor_name, "get_all_by_vendor failed");
                Vec::new()
            }
        }
    }

    /// Full scan of all stored metadata records, in insertion order.
    pub async fn scan_all_metadata(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let rows = sqlx::query("SELECT metadata_json FROM chunks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await;

        match rows {
            Ok(rows) => rows
                .iter()
                .map(|row| parse_metadata(row.get("metadata_json")))
                .collect(),
            Err(e) => {
                warn!(error = %e, "metadata scan failed");
                Vec::new()
            }
        }
    }

    /// Aggregate invoice totals grouped by vendor, sorted by spend
    /// descending (ties keep scan order). Vendors with no qualifying
    /// invoices still appear with zero spend.
    pub async fn spend_totals(&self) -> Vec<VendorSpendEntry> {
        let records = self.scan_all_metadata().await;

        let mut order: Vec<String> = Vec::new();
        let mut totals: HashMap<String, f64> = HashMap::new();
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut all_vendors: Vec<String> = Vec::new();

        for meta in &records {
            let vendor = meta
                .get("vendor_name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !vendor.is_empty() && !all_vendors.iter().any(|v| v == vendor) {
                all_vendors.push(vendor.to_string());
            }

            if meta.get("type").and_then(|t| t.as_str()) != Some("invoice") {
                continue;
            }

            let vendor = if vendor.is_empty() { "Unknown" } else { vendor };
            let amount = money::metadata_invoice_amount(meta);

            if !totals.contains_key(vendor) {
                order.push(vendor.to_string());
            }
            *totals.entry(vendor.to_string()).or_insert(0.0) += amount;
            *counts.entry(vendor.to_string()).or_insert(0) += 1;
        }

        let mut ranking: Vec<VendorSpendEntry> = order
            .iter()
            .map(|vendor| VendorSpendEntry {
                vendor_name: vendor.clone(),
                total_spend: totals[vendor],
                invoice_count: counts[vendor],
            })
            .collect();

        for vendor in all_vendors {
            if !totals.contains_key(&vendor) {
                ranking.push(VendorSpendEntry {
                    vendor_name: vendor,
                    total_spend: 0.0,
                    invoice_count: 0,
                });
            }
        }

        // Stable sort keeps scan order for equal totals.
        ranking.sort_by(|a, b| {
            b.total_spend
                .partial_cmp(&a.total_spend)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranking
    }

    /// Distinct vendor names, cached after the first scan.
    pub async fn known_vendors(&self) -> Vec<String> {
        if let Some(cached) = self.vendor_cache.read().await.as_ref() {
            return cached.clone();
        }

        let vendors = match sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT vendor_name FROM chunks ORDER BY vendor_name",
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to list vendors");
                return Vec::new();
            }
        };

        *self.vendor_cache.write().await = Some(vendors.clone());
        vendors
    }

    /// Drop all stored chunks. Idempotent.
    pub async fn reset(&self) -> bool {
        match sqlx::query("DELETE FROM chunks").execute(&self.pool).await {
            Ok(_) => {
                self.invalidate_vendor_cache().await;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to reset store");
                false
            }
        }
    }

    pub async fn stats(&self) -> StoreStats {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to count chunks");
                0
            });

        StoreStats {
            total_chunks: total.max(0) as u64,
            collection_name: self.collection.clone(),
        }
    }

    async fn invalidate_vendor_cache(&self) {
        *self.vendor_cache.write().await = None;
    }
}

fn parse_metadata(json: String) -> serde_json::Map<String, serde_json::Value> {
    serde_json::from_str(&json).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(
        vendor: &str,
        suffix: &str,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> KnowledgeChunk {
        KnowledgeChunk {
            chunk_id: crate::loader::chunk_id_for(vendor, suffix),
            vendor_name: vendor.to_string(),
            content: format!("{} {}", vendor, suffix),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            embedding: Some(embedding),
        }
    }

    fn invoice_meta(vendor: &str, number: &str, amount: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "invoice",
            "vendor_name": vendor,
            "invoice_number": number,
            "invoice_date": "2026-03-01",
            "total_amount": amount,
            "line_items": "[]",
        })
    }

    async fn open_store(tmp: &TempDir) -> VectorStore {
        VectorStore::open(&tmp.path().join("viq.db"), "vendor_invoices")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_rejects_unembedded_chunks() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let mut c = chunk("Acme Corp", "INV-1", vec![], invoice_meta("Acme Corp", "INV-1", "100"));
        c.embedding = None;
        assert!(!store.upsert(&[c]).await);
        assert_eq!(store.stats().await.total_chunks, 0);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_chunk_id() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let c = chunk(
            "Acme Corp",
            "INV-1",
            vec![1.0, 0.0],
            invoice_meta("Acme Corp", "INV-1", "100"),
        );
        assert!(store.upsert(std::slice::from_ref(&c)).await);
        assert!(store.upsert(std::slice::from_ref(&c)).await);
        assert_eq!(store.stats().await.total_chunks, 1);
        assert_eq!(store.list_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn test_filtered_search_is_case_sensitive() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let chunks = vec![
            chunk("Acme Corp", "INV-1", vec![1.0, 0.0], invoice_meta("Acme Corp", "INV-1", "100")),
            chunk("Globex", "G-1", vec![0.0, 1.0], invoice_meta("Globex", "G-1", "200")),
        ];
        assert!(store.upsert(&chunks).await);

        let hits = store.similarity_search_filtered(&[1.0, 0.0], "Acme Corp", 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vendor_name, "Acme Corp");

        let none = store.similarity_search_filtered(&[1.0, 0.0], "acme corp", 5).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_ordering() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let chunks = vec![
            chunk("Acme Corp", "far", vec![0.0, 1.0], invoice_meta("Acme Corp", "far", "1")),
            chunk("Acme Corp", "near", vec![1.0, 0.1], invoice_meta("Acme Corp", "near", "2")),
        ];
        assert!(store.upsert(&chunks).await);

        let hits = store.similarity_search(&[1.0, 0.0], 2).await;
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("near"));
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_spend_totals_parsing_and_ranking() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let chunks = vec![
            chunk("Acme Corp", "I1", vec![1.0], invoice_meta("Acme Corp", "I1", "₹1,200.50")),
            chunk("Acme Corp", "I2", vec![1.0], invoice_meta("Acme Corp", "I2", "2000")),
            chunk("Acme Corp", "I3", vec![1.0], invoice_meta("Acme Corp", "I3", "abc")),
            chunk("Globex", "G1", vec![1.0], invoice_meta("Globex", "G1", "50")),
        ];
        assert!(store.upsert(&chunks).await);

        let totals = store.spend_totals().await;
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].vendor_name, "Acme Corp");
        assert!((totals[0].total_spend - 3200.50).abs() < 1e-9);
        assert_eq!(totals[0].invoice_count, 3);
        assert_eq!(totals[1].vendor_name, "Globex");
    }

    #[tokio::test]
    async fn test_spend_totals_line_item_fallback() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let meta = serde_json::json!({
            "type": "invoice",
            "vendor_name": "Acme Corp",
            "invoice_number": "I1",
            "total_amount": "0",
            "line_items": "[{\"amount\": \"150.00\"}, {\"amount\": \"300\"}]",
        });
        assert!(store.upsert(&[chunk("Acme Corp", "I1", vec![1.0], meta)]).await);

        let totals = store.spend_totals().await;
        assert!((totals[0].total_spend - 450.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_summary_only_vendor_has_zero_spend_entry() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let summary_meta = serde_json::json!({
            "type": "vendor_summary",
            "vendor_name": "Initech",
            "invoice_count": 0,
        });
        assert!(store.upsert(&[chunk("Initech", "summary", vec![1.0], summary_meta)]).await);

        let totals = store.spend_totals().await;
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].vendor_name, "Initech");
        assert_eq!(totals[0].total_spend, 0.0);
        assert_eq!(totals[0].invoice_count, 0);
    }

    #[tokio::test]
    async fn test_reset_completeness_and_cache_invalidation() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let chunks = vec![chunk(
            "Acme Corp",
            "I1",
            vec![1.0],
            invoice_meta("Acme Corp", "I1", "100"),
        )];
        assert!(store.upsert(&chunks).await);
        assert_eq!(store.known_vendors().await, vec!["Acme Corp".to_string()]);

        assert!(store.reset().await);
        assert_eq!(store.stats().await.total_chunks, 0);
        assert!(store.list_ids().await.is_empty());
        assert!(store.known_vendors().await.is_empty());

        // Idempotent
        assert!(store.reset().await);
    }
}
