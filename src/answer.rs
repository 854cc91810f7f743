//! Answer synthesis helpers: prompt construction and the deterministic
//! renderers used whenever generation must not (or cannot) be trusted.
//!
//! The full-detail and vendor-ranking paths never call the LLM: exhaustive
//! or structured answers are rendered directly from stored data so they
//! cannot be truncated or hallucinated. The same renderers double as the
//! second-line fallback when a generated answer comes back carrying the
//! safety-block marker.

use crate::llm::is_safety_blocked;
use crate::models::VendorSpendEntry;
use crate::store::StoredChunk;

const SYSTEM_PROMPT: &str = "You are VendorIQ, an assistant that answers questions about vendor \
     invoices. Answer strictly from the provided context. If the context does not contain the \
     answer, say so. Keep answers factual and concise.";

/// Build the generation prompt from the question and assembled context.
pub fn build_prompt(question: &str, context_text: &str) -> (String, String) {
    let prompt = format!(
        "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context_text, question
    );
    (prompt, SYSTEM_PROMPT.to_string())
}

/// Deterministic multi-vendor spend ranking answer.
pub fn render_vendor_ranking(ranking: &[VendorSpendEntry]) -> String {
    if ranking.is_empty() {
        return "No vendor spend data is indexed yet. Load vendor knowledge first.".to_string();
    }

    let total: f64 = ranking.iter().map(|e| e.total_spend).sum();
    let mut out = format!(
        "Vendor spend ranking ({} vendors, {:.2} total):\n",
        ranking.len(),
        total
    );
    for (i, entry) in ranking.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} — {:.2} across {} invoice{}\n",
            i + 1,
            entry.vendor_name,
            entry.total_spend,
            entry.invoice_count,
            if entry.invoice_count == 1 { "" } else { "s" }
        ));
    }
    out.trim_end().to_string()
}

/// Deterministic exhaustive detail answer for one vendor: every stored
/// invoice chunk, with provenance links when present.
pub fn render_full_detail(vendor_name: &str, chunks: &[StoredChunk]) -> String {
    let invoices: Vec<&StoredChunk> = chunks
        .iter()
        .filter(|c| c.metadata.get("type").and_then(|t| t.as_str()) == Some("invoice"))
        .collect();

    if invoices.is_empty() {
        return format!("No invoices are indexed for {}.", vendor_name);
    }

    let mut out = format!("{} — {} invoice(s) on record:\n", vendor_name, invoices.len());
    for chunk in invoices {
        let get = |key: &str| {
            chunk
                .metadata
                .get(key)
                .map(display_value)
                .unwrap_or_default()
        };
        let number = get("invoice_number");
        let date = get("invoice_date");
        let amount = get("total_amount");
        let link = get("web_view_link");

        out.push_str(&format!(
            "- Invoice {} | date {} | amount {}",
            if number.is_empty() { "(unnumbered)".to_string() } else { number },
            if date.is_empty() { "unknown".to_string() } else { date },
            if amount.is_empty() { "unknown".to_string() } else { amount },
        ));
        if !link.is_empty() {
            out.push_str(&format!(" | view: {}", link));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Final answer text for a generated completion: a completion carrying the
/// safety-block marker is replaced by the metadata-derived summary, anything
/// else passes through unchanged.
pub fn screen_generated(
    generated: String,
    ranking: &[VendorSpendEntry],
    records: &[serde_json::Map<String, serde_json::Value>],
) -> String {
    if is_safety_blocked(&generated) {
        fallback_summary(ranking, records)
    } else {
        generated
    }
}

/// Deterministic structured summary built from stored metadata. Substituted
/// at the orchestration layer when a generated answer carries the
/// safety-block marker, so the user always receives a factual, non-empty
/// answer.
pub fn fallback_summary(
    ranking: &[VendorSpendEntry],
    records: &[serde_json::Map<String, serde_json::Value>],
) -> String {
    if ranking.is_empty() {
        return "The question could not be answered by generation and no vendor data is indexed \
                yet. Load vendor knowledge and try again."
            .to_string();
    }

    let total: f64 = ranking.iter().map(|e| e.total_spend).sum();
    let invoices: u64 = ranking.iter().map(|e| e.invoice_count).sum();
    let mut out = format!(
        "Here is a factual summary of the indexed vendor data instead: {} vendors, {} invoices, \
         {:.2} total spend.\n",
        ranking.len(),
        invoices,
        total
    );

    for entry in ranking {
        out.push_str(&format!(
            "- {}: {} invoice{}, {:.2} total",
            entry.vendor_name,
            entry.invoice_count,
            if entry.invoice_count == 1 { "" } else { "s" },
            entry.total_spend
        ));
        if let Some(link) = first_view_link(records, &entry.vendor_name) {
            out.push_str(&format!(" (view: {})", link));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn first_view_link(
    records: &[serde_json::Map<String, serde_json::Value>],
    vendor_name: &str,
) -> Option<String> {
    records
        .iter()
        .filter(|m| m.get("vendor_name").and_then(|v| v.as_str()) == Some(vendor_name))
        .find_map(|m| {
            m.get("web_view_link")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
