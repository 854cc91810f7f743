//! Orchestration context tying the pipeline together.
//!
//! An [`Engine`] owns the configuration, the vector store, and the LLM
//! client, and is constructed explicitly at process start (once for the CLI,
//! once behind an `Arc` for the server). Its public operations never raise:
//! every failure is folded into a structured outcome with `success: false`
//! and a message, so callers can serialize results directly.

use tracing::{info, warn};

use crate::analytics::{self, AnalyticsReport};
use crate::answer;
use crate::config::Config;
use crate::embedding;
use crate::llm::{is_safety_blocked, LlmClient};
use crate::loader;
use crate::models::{
    AnswerOutcome, KnowledgeChunk, LoadOutcome, LoadStats, ResetOutcome, StoreStats,
};
use crate::remote::RemoteVendorLoader;
use crate::retrieval;
use crate::router::{self, QueryIntent};
use crate::store::VectorStore;

/// Where a load pulls vendor records from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// JSON files under `data.vendor_dir`.
    Local,
    /// The configured remote records API.
    Remote,
}

pub struct Engine {
    config: Config,
    store: VectorStore,
    llm: LlmClient,
}

impl Engine {
    /// Open the store and construct the LLM client. This is the only
    /// operation that raises; after construction every call degrades
    /// to structured failure instead.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = VectorStore::open(&config.db.path, &config.db.collection).await?;
        let llm = LlmClient::new(&config.llm)?;
        Ok(Self { config, store, llm })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest vendor records: load, chunk, (optionally) dedup, embed, store.
    pub async fn load(&self, incremental: bool, source: LoadSource) -> LoadOutcome {
        let mut stats = LoadStats {
            database_collection: self.store.collection_name().to_string(),
            incremental,
            ..Default::default()
        };

        let dataset = match source {
            LoadSource::Local => loader::load_vendor_dir(&self.config.data.vendor_dir),
            LoadSource::Remote => match RemoteVendorLoader::new(&self.config.data) {
                Ok(loader) => loader.load().await,
                Err(e) => Err(e),
            },
        };

        let dataset = match dataset {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "vendor load failed");
                return LoadOutcome {
                    success: false,
                    message: format!("Failed to load vendor records: {}", e),
                    stats,
                };
            }
        };

        if dataset.vendors.is_empty() {
            return LoadOutcome {
                success: false,
                message: "No vendor data found".to_string(),
                stats,
            };
        }

        stats.vendors_loaded = dataset.vendors.len();
        let chunks = loader::build_chunks(&dataset);
        stats.chunks_created = chunks.len();

        let chunks = if incremental {
            let existing = self.store.list_ids().await;
            let (new_chunks, skipped) = loader::filter_new_chunks(chunks, &existing);
            stats.skipped_existing = Some(skipped);
            new_chunks
        } else {
            chunks
        };

        // Every vendor yields at least a summary chunk, so an empty list
        // here means the incremental filter skipped everything: the corpus
        // is already up to date, which is a success.
        if chunks.is_empty() {
            return LoadOutcome {
                success: true,
                message: "No new chunks to index".to_string(),
                stats,
            };
        }

        let chunks = match self.embed_chunks(chunks).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "embedding failed during load");
                return LoadOutcome {
                    success: false,
                    message: format!("Embedding failed: {}", e),
                    stats,
                };
            }
        };
        stats.embeddings_generated = chunks.len();

        let stored = self.store.upsert(&chunks).await;
        if stored {
            stats.stored_in_db = chunks.len() as u64;
        }

        info!(
            vendors = stats.vendors_loaded,
            chunks = stats.chunks_created,
            stored = stats.stored_in_db,
            incremental,
            "load complete"
        );

        LoadOutcome {
            success: stored,
            message: if stored {
                format!("Indexed {} chunks", stats.stored_in_db)
            } else {
                "Failed to store chunks".to_string()
            },
            stats,
        }
    }

    async fn embed_chunks(
        &self,
        mut chunks: Vec<KnowledgeChunk>,
    ) -> anyhow::Result<Vec<KnowledgeChunk>> {
        for batch in chunks.chunks_mut(self.config.embedding.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = embedding::embed_batch(&self.config.embedding, &texts).await?;
            for (chunk, vector) in batch.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
            }
        }
        Ok(chunks)
    }

    /// Answer a question, routed by intent. Deterministic paths (ranking,
    /// full detail) skip retrieval and generation entirely.
    pub async fn answer(
        &self,
        question: &str,
        vendor: Option<&str>,
        k: Option<usize>,
    ) -> AnswerOutcome {
        let question = question.trim();
        if question.is_empty() {
            return AnswerOutcome {
                success: false,
                message: "Question must not be empty".to_string(),
                ..Default::default()
            };
        }

        let k = k
            .unwrap_or(self.config.retrieval.default_k)
            .clamp(1, self.config.retrieval.max_k);

        match router::classify(question, vendor) {
            QueryIntent::VendorRanking => self.answer_ranking().await,
            QueryIntent::FullDetail => self.answer_full_detail(question, vendor).await,
            QueryIntent::VendorQa => self.answer_qa(question, vendor, k).await,
        }
    }

    /// Deterministic multi-vendor spend ranking. An empty store is a
    /// failure, not an empty success.
    async fn answer_ranking(&self) -> AnswerOutcome {
        let ranking = self.store.spend_totals().await;
        if ranking.is_empty() {
            return AnswerOutcome {
                success: false,
                message: "No vendor spend data is indexed yet. Load vendor knowledge first."
                    .to_string(),
                ..Default::default()
            };
        }
        AnswerOutcome {
            success: true,
            answer: answer::render_vendor_ranking(&ranking),
            ..Default::default()
        }
    }

    async fn answer_full_detail(&self, question: &str, vendor: Option<&str>) -> AnswerOutcome {
        let known = self.store.known_vendors().await;
        match router::resolve_vendor(question, vendor, &known, &self.llm).await {
            Some(resolved) => {
                let chunks = self.store.get_all_by_vendor(&resolved).await;
                AnswerOutcome {
                    success: true,
                    answer: answer::render_full_detail(&resolved, &chunks),
                    ..Default::default()
                }
            }
            // Exhaustive detail over all vendors: the deterministic spend
            // ranking is the aggregate equivalent.
            None => self.answer_ranking().await,
        }
    }

    async fn answer_qa(&self, question: &str, vendor: Option<&str>, k: usize) -> AnswerOutcome {
        let query_vec = match embedding::embed_text(&self.config.embedding, question).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed");
                return AnswerOutcome {
                    success: false,
                    message: format!("Query embedding failed: {}", e),
                    ..Default::default()
                };
            }
        };

        let known = self.store.known_vendors().await;
        let resolved = router::resolve_vendor(question, vendor, &known, &self.llm).await;

        let sources = match &resolved {
            Some(vendor_name) => {
                retrieval::retrieve_for_vendor(&self.store, &query_vec, vendor_name, k).await
            }
            None => retrieval::retrieve_across_vendors(&self.store, &query_vec, &known, k).await,
        };

        if sources.is_empty() {
            return AnswerOutcome {
                success: false,
                message: "No relevant vendor data found. Load vendor knowledge first.".to_string(),
                ..Default::default()
            };
        }

        let context_text = retrieval::build_context(&sources);

        let answer_text = if self.llm.is_enabled() {
            let (prompt, system) = answer::build_prompt(question, &context_text);
            match self.llm.generate(&prompt, Some(&system)).await {
                Ok(text) if !is_safety_blocked(&text) => text,
                Ok(text) => {
                    // Generation withheld: substitute a factual summary built
                    // from stored metadata rather than surfacing the block.
                    warn!("generated answer was safety-blocked, substituting metadata summary");
                    let ranking = self.store.spend_totals().await;
                    let records = self.store.scan_all_metadata().await;
                    answer::screen_generated(text, &ranking, &records)
                }
                Err(e) => {
                    warn!(error = %e, "generation failed");
                    return AnswerOutcome {
                        success: false,
                        message: format!("Answer generation failed: {}", e),
                        sources,
                        context_text,
                        ..Default::default()
                    };
                }
            }
        } else {
            format!(
                "Generation is disabled; the most relevant sources are:\n\n{}",
                context_text
            )
        };

        AnswerOutcome {
            success: true,
            answer: answer_text,
            message: String::new(),
            sources,
            context_text,
        }
    }

    /// Spend analytics for a period, always with a populated summary.
    pub async fn analytics(&self, period: &str) -> AnalyticsReport {
        let records = self.store.scan_all_metadata().await;
        let ranking = self.store.spend_totals().await;
        let mut report = analytics::compute_report(&records, ranking, period);
        report.llm_summary = analytics::narrative_summary(&self.llm, &report).await;
        report
    }

    /// Drop all indexed knowledge.
    pub async fn reset(&self) -> ResetOutcome {
        let ok = self.store.reset().await;
        ResetOutcome {
            success: ok,
            message: if ok {
                "All indexed vendor knowledge deleted".to_string()
            } else {
                "Failed to reset the vector store".to_string()
            },
        }
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::loader::chunk_id_for;
    use crate::store::VectorStore;

    fn test_config(dir: &TempDir) -> Config {
        let toml_text = format!(
            "[db]\npath = \"{}\"\n\n[data]\nvendor_dir = \"{}\"\n",
            dir.path().join("test.db").display(),
            dir.path().join("vendors").display()
        );
        toml::from_str(&toml_text).unwrap()
    }

    async fn engine_in(dir: &TempDir) -> Engine {
        Engine::new(test_config(dir)).await.unwrap()
    }

    fn write_vendor(dir: &PathBuf, name: &str, json: serde_json::Value) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), serde_json::to_string(&json).unwrap()).unwrap();
    }

    fn seed_chunk(vendor: &str, suffix: &str, metadata: serde_json::Value) -> KnowledgeChunk {
        KnowledgeChunk {
            chunk_id: chunk_id_for(vendor, suffix),
            vendor_name: vendor.to_string(),
            content: format!("{} {}", vendor, suffix),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            embedding: Some(vec![1.0, 0.0]),
        }
    }

    fn seed_invoice(vendor: &str, number: &str, amount: &str) -> KnowledgeChunk {
        seed_chunk(
            vendor,
            number,
            serde_json::json!({
                "type": "invoice",
                "vendor_name": vendor,
                "invoice_number": number,
                "invoice_date": "2026-01-05",
                "total_amount": amount,
            }),
        )
    }

    #[tokio::test]
    async fn test_load_fails_cleanly_with_disabled_embeddings() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        write_vendor(
            &engine.config.data.vendor_dir.clone(),
            "acme.json",
            serde_json::json!([{
                "vendor_name": "Acme Corp",
                "invoice_number": "INV-1",
                "invoice_date": "2026-01-05",
                "total_amount": "100",
            }]),
        );

        let outcome = engine.load(false, LoadSource::Local).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("Embedding failed"));
        assert_eq!(outcome.stats.vendors_loaded, 1);
        assert_eq!(outcome.stats.chunks_created, 2);
        assert_eq!(outcome.stats.stored_in_db, 0);
    }

    #[tokio::test]
    async fn test_load_missing_dir_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let outcome = engine.load(false, LoadSource::Local).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("Failed to load vendor records"));
    }

    #[tokio::test]
    async fn test_remote_load_without_config_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let outcome = engine.load(false, LoadSource::Remote).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("remote_base_url"));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let outcome = engine.answer("   ", None, None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("empty"));
    }

    #[tokio::test]
    async fn test_ranking_on_empty_store_reports_failure() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let outcome = engine.answer("show me the top vendors", None, None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("No vendor spend data"));
    }

    #[tokio::test]
    async fn test_ranking_answer_needs_no_embeddings() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = VectorStore::open(&config.db.path, &config.db.collection)
            .await
            .unwrap();
        store
            .upsert(&[
                seed_invoice("Acme Corp", "INV-1", "900"),
                seed_invoice("Globex", "G-1", "100"),
            ])
            .await;

        let engine = Engine::new(config).await.unwrap();
        let outcome = engine.answer("show me the top vendors", None, None).await;
        assert!(outcome.success);
        assert!(outcome.answer.contains("1. Acme Corp"));
        assert!(outcome.answer.contains("2. Globex"));
    }

    #[tokio::test]
    async fn test_full_detail_all_vendors_uses_spend_ranking() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = VectorStore::open(&config.db.path, &config.db.collection)
            .await
            .unwrap();
        store
            .upsert(&[
                seed_invoice("Acme Corp", "INV-1", "900"),
                seed_invoice("Globex", "G-1", "100"),
            ])
            .await;

        // Exhaustive detail with no single vendor in scope stays
        // deterministic: no embeddings or LLM are consulted.
        let engine = Engine::new(config).await.unwrap();
        let outcome = engine
            .answer("give me all invoices with view links", Some("ALL"), None)
            .await;
        assert!(outcome.success);
        assert!(outcome.answer.contains("Vendor spend ranking"));
        assert!(outcome.answer.contains("1. Acme Corp"));
    }

    #[tokio::test]
    async fn test_load_with_no_vendor_files_fails() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;
        std::fs::create_dir_all(dir.path().join("vendors")).unwrap();

        let outcome = engine.load(false, LoadSource::Local).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("No vendor data found"));
        assert_eq!(outcome.stats.vendors_loaded, 0);
    }

    #[tokio::test]
    async fn test_incremental_load_with_everything_indexed_is_success() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        write_vendor(
            &config.data.vendor_dir.clone(),
            "acme.json",
            serde_json::json!([{
                "vendor_name": "Acme Corp",
                "invoice_number": "INV-1",
                "invoice_date": "2026-01-05",
                "total_amount": "100",
            }]),
        );

        // Pre-index both chunks the file would produce.
        let store = VectorStore::open(&config.db.path, &config.db.collection)
            .await
            .unwrap();
        store
            .upsert(&[
                seed_chunk("Acme Corp", "summary", serde_json::json!({"type": "vendor_summary"})),
                seed_invoice("Acme Corp", "INV-1", "100"),
            ])
            .await;

        let engine = Engine::new(config).await.unwrap();
        let outcome = engine.load(true, LoadSource::Local).await;
        assert!(outcome.success);
        assert!(outcome.message.contains("No new chunks to index"));
        assert_eq!(outcome.stats.skipped_existing, Some(2));
        assert_eq!(outcome.stats.stored_in_db, 0);
    }

    #[tokio::test]
    async fn test_qa_answer_degrades_when_embeddings_disabled() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let outcome = engine.answer("what did we buy in March?", None, None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("Query embedding failed"));
    }

    #[tokio::test]
    async fn test_analytics_summary_is_never_missing() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let report = engine.analytics("all").await;
        assert!(!report.llm_summary.is_empty());
        assert_eq!(report.period, "all");
        assert_eq!(report.insights.total_invoices, 0);
    }

    #[tokio::test]
    async fn test_reset_and_stats() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir).await;

        let stats = engine.stats().await;
        assert_eq!(stats.total_chunks, 0);

        let outcome = engine.reset().await;
        assert!(outcome.success);
    }
}
