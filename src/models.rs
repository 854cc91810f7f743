//! Core data models used throughout VendorIQ.
//!
//! These types represent the vendor/invoice records, knowledge chunks, and
//! structured operation results that flow through the ingestion, retrieval,
//! and analytics pipelines.

use serde::{Deserialize, Serialize};

/// A single invoice line item, as extracted upstream. All fields arrive raw
/// and unvalidated; amounts may carry currency symbols and separators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, alias = "description")]
    pub item_description: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default, alias = "price", alias = "rate")]
    pub unit_price: String,
    #[serde(default, alias = "line_total", alias = "total")]
    pub amount: String,
}

/// An invoice belonging to exactly one vendor. Immutable once created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(default)]
    pub vendor_name: String,
    #[serde(default)]
    pub invoice_number: String,
    /// ISO-ish date string; consumers parse the first 10 characters.
    #[serde(default)]
    pub invoice_date: String,
    /// Numeric-like, possibly currency-formatted ("₹1,200.50").
    #[serde(default)]
    pub total_amount: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    // Drive/file provenance, when the record came from the remote store.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub drive_file_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub web_view_link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub web_content_link: String,
}

/// Aggregate root for one dataset load. `vendor_name` is the identity key,
/// case-sensitive as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub vendor_name: String,
    pub last_updated: String,
    pub invoices: Vec<Invoice>,
}

/// Ephemeral collection of vendors produced by one load operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorDataset {
    pub vendors: Vec<Vendor>,
}

/// A unit of embeddable text plus structured metadata: either a vendor
/// summary or a single invoice. `chunk_id` is a stable content-derived hash,
/// so re-ingesting identical records is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub chunk_id: String,
    pub vendor_name: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Fixed-length vector, absent until computed. Chunks without embeddings
    /// are never stored.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// One ranked retrieval hit attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub rank: usize,
    pub chunk_id: String,
    pub vendor_name: String,
    #[serde(rename = "type")]
    pub chunk_type: String,
    pub similarity: f64,
    pub content_excerpt: String,
}

/// Derived spend aggregate for one vendor, computed on demand from stored
/// metadata — never persisted separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSpendEntry {
    pub vendor_name: String,
    pub total_spend: f64,
    pub invoice_count: u64,
}

// ============ Structured operation results ============

/// Result of a `load` operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadOutcome {
    pub success: bool,
    pub message: String,
    pub stats: LoadStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadStats {
    pub vendors_loaded: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub stored_in_db: u64,
    pub database_collection: String,
    pub incremental: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_existing: Option<usize>,
}

/// Result of an `answer` operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerOutcome {
    pub success: bool,
    pub answer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub sources: Vec<SourceRef>,
    pub context_text: String,
}

/// Vector store size summary.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_chunks: u64,
    pub collection_name: String,
}

/// Result of a `reset` operation.
#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub success: bool,
    pub message: String,
}
