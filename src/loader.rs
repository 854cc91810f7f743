//! Vendor dataset loading and knowledge chunk building.
//!
//! The local loader reads vendor JSON files from a directory; each file holds
//! either an array of invoice objects (current format) or a legacy object
//! keyed by invoice name. The chunk builder then converts a
//! [`VendorDataset`] into embeddable [`KnowledgeChunk`]s: one summary chunk
//! per vendor plus one chunk per invoice.
//!
//! Chunk ids are hex SHA-256 digests of `"{vendor}_{invoice_number}"` (or
//! `"{vendor}_summary"`), so reloading identical records produces identical
//! ids and incremental loads can skip everything already stored.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::models::{Invoice, KnowledgeChunk, Vendor, VendorDataset};
use crate::money;

/// Load all `*.json` vendor files under `dir`. Files that fail to parse are
/// skipped with a warning; a missing directory is a configuration error.
pub fn load_vendor_dir(dir: &Path) -> Result<VendorDataset> {
    let mut vendors: Vec<Vendor> = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("vendor data directory does not exist: {}", dir.display());
    }

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %entry.path().display(), error = %e, "failed to read vendor file");
                continue;
            }
        };

        match parse_vendor_json(&content) {
            Ok(vendor) => vendors.push(vendor),
            Err(e) => {
                warn!(file = %entry.path().display(), error = %e, "failed to parse vendor file");
            }
        }
    }

    Ok(VendorDataset { vendors })
}

/// Parse one vendor file. Arrays are the current format (each element an
/// invoice, vendor name taken from the first); objects are the legacy format
/// (invoice objects as values, `vendor_name`/`last_updated` at top level).
pub fn parse_vendor_json(content: &str) -> Result<Vendor> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let now = chrono::Utc::now().to_rfc3339();

    match value {
        serde_json::Value::Array(items) => {
            let vendor_name = items
                .first()
                .and_then(|v| v.get("vendor_name"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .trim()
                .to_string();

            let invoices = items
                .into_iter()
                .map(|item| parse_invoice(item, &vendor_name))
                .collect();

            Ok(Vendor {
                vendor_name,
                last_updated: now,
                invoices,
            })
        }
        serde_json::Value::Object(map) => {
            let vendor_name = map
                .get("vendor_name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            let last_updated = map
                .get("last_updated")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or(now);

            let invoices = map
                .into_iter()
                .filter(|(key, value)| {
                    key != "vendor_name" && key != "last_updated" && value.is_object()
                })
                .map(|(_, value)| parse_invoice(value, &vendor_name))
                .collect();

            Ok(Vendor {
                vendor_name,
                last_updated,
                invoices,
            })
        }
        _ => Ok(Vendor {
            vendor_name: "Unknown".to_string(),
            last_updated: now,
            invoices: Vec::new(),
        }),
    }
}

fn parse_invoice(value: serde_json::Value, fallback_vendor: &str) -> Invoice {
    let mut invoice: Invoice = serde_json::from_value(value).unwrap_or_default();
    if invoice.vendor_name.is_empty() {
        invoice.vendor_name = fallback_vendor.to_string();
    }
    invoice
}

// ============ Knowledge chunk builder ============

/// Convert a dataset into embeddable chunks: one `vendor_summary` chunk per
/// vendor, one `invoice` chunk per invoice.
pub fn build_chunks(dataset: &VendorDataset) -> Vec<KnowledgeChunk> {
    let mut chunks = Vec::new();

    for vendor in &dataset.vendors {
        chunks.push(vendor_summary_chunk(vendor));
        for invoice in &vendor.invoices {
            chunks.push(invoice_chunk(vendor, invoice));
        }
    }

    chunks
}

/// Stable content-derived chunk id: hex SHA-256 of the identity string.
pub fn chunk_id_for(vendor_name: &str, suffix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vendor_name.as_bytes());
    hasher.update(b"_");
    hasher.update(suffix.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn vendor_summary_chunk(vendor: &Vendor) -> KnowledgeChunk {
    let total: f64 = vendor.invoices.iter().map(money::invoice_amount).sum();
    let invoice_count = vendor.invoices.len();

    let content = format!(
        "Vendor: {}\nLast Updated: {}\nTotal Invoices: {}\nTotal Amount: {:.2}\n\n\
         This vendor has {} invoices with a combined value of {:.2}.",
        vendor.vendor_name, vendor.last_updated, invoice_count, total, invoice_count, total
    );

    let mut metadata = serde_json::Map::new();
    metadata.insert("type".into(), "vendor_summary".into());
    metadata.insert("vendor_name".into(), vendor.vendor_name.clone().into());
    metadata.insert("last_updated".into(), vendor.last_updated.clone().into());
    metadata.insert("invoice_count".into(), (invoice_count as u64).into());
    metadata.insert("total_amount".into(), total.into());

    KnowledgeChunk {
        chunk_id: chunk_id_for(&vendor.vendor_name, "summary"),
        vendor_name: vendor.vendor_name.clone(),
        content,
        metadata,
        embedding: None,
    }
}

fn invoice_chunk(vendor: &Vendor, invoice: &Invoice) -> KnowledgeChunk {
    let amount = money::invoice_amount(invoice);
    let amount_display = if amount > 0.0 {
        format!("{:.2}", amount)
    } else if invoice.total_amount.trim().is_empty() {
        "N/A".to_string()
    } else {
        invoice.total_amount.clone()
    };

    let mut line_items_summary = String::new();
    if !invoice.line_items.is_empty() {
        line_items_summary.push_str("\nLine Items:\n");
        for item in &invoice.line_items {
            line_items_summary.push_str(&format!(
                "- {}: {} x {} = {}\n",
                item.item_description, item.quantity, item.unit_price, item.amount
            ));
        }
    }

    let content = format!(
        "Invoice Details:\nVendor: {}\nInvoice Number: {}\nAmount: {}\nDate: {}\n{}\n\
         This is an invoice from {} for {} dated {}.",
        vendor.vendor_name,
        invoice.invoice_number,
        amount_display,
        invoice.invoice_date,
        line_items_summary,
        vendor.vendor_name,
        amount_display,
        invoice.invoice_date
    );

    // Collections are stored as JSON strings; the store only accepts scalar
    // metadata values.
    let line_items_json =
        serde_json::to_string(&invoice.line_items).unwrap_or_else(|_| "[]".to_string());

    let mut metadata = serde_json::Map::new();
    metadata.insert("type".into(), "invoice".into());
    metadata.insert("vendor_name".into(), vendor.vendor_name.clone().into());
    metadata.insert("invoice_number".into(), invoice.invoice_number.clone().into());
    metadata.insert("invoice_date".into(), invoice.invoice_date.clone().into());
    metadata.insert("total_amount".into(), invoice.total_amount.clone().into());
    metadata.insert("line_items".into(), line_items_json.into());
    if !invoice.file_name.is_empty() {
        metadata.insert("file_name".into(), invoice.file_name.clone().into());
    }
    if !invoice.web_view_link.is_empty() {
        metadata.insert("web_view_link".into(), invoice.web_view_link.clone().into());
    }

    KnowledgeChunk {
        chunk_id: chunk_id_for(&vendor.vendor_name, &invoice.invoice_number),
        vendor_name: vendor.vendor_name.clone(),
        content,
        metadata,
        embedding: None,
    }
}

/// Drop chunks whose ids are already stored. Incremental loads dedup against
/// the whole corpus, not just the vendor being reloaded.
pub fn filter_new_chunks(
    chunks: Vec<KnowledgeChunk>,
    existing_ids: &std::collections::HashSet<String>,
) -> (Vec<KnowledgeChunk>, usize) {
    let before = chunks.len();
    let new_chunks: Vec<KnowledgeChunk> = chunks
        .into_iter()
        .filter(|c| !existing_ids.contains(&c.chunk_id))
        .collect();
    let skipped = before - new_chunks.len();
    (new_chunks, skipped)
}
