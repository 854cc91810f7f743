//! Retrieval assembly: ranked sources and bounded context text.
//!
//! Three paths feed the answer synthesizer:
//! - **single vendor** — one filtered similarity search;
//! - **aggregate** (vendor unresolved) — a bounded per-vendor fan-out:
//!   every known vendor gets `max(1, k / vendor_count)` candidates, the
//!   merged list is re-sorted by similarity and truncated back to `k`;
//! - **full detail** — handled elsewhere, deliberately bypassing similarity
//!   ranking altogether.
//!
//! Context text is a sequence of `[Source <rank> | sim <s>]` blocks with
//! 220-character excerpts, separated by blank lines.

use crate::models::SourceRef;
use crate::store::{ScoredChunk, VectorStore};

/// Excerpt budget per source, in characters.
const EXCERPT_CHARS: usize = 220;

/// Per-vendor candidate budget for the aggregate path. Guarantees every
/// vendor can contribute at least one candidate before global re-ranking.
pub fn per_vendor_budget(k: usize, vendor_count: usize) -> usize {
    if vendor_count == 0 {
        return k.max(1);
    }
    (k / vendor_count).max(1)
}

/// Single-vendor path: top-k chunks for one vendor, ranked 1-based.
pub async fn retrieve_for_vendor(
    store: &VectorStore,
    query_vec: &[f32],
    vendor_name: &str,
    k: usize,
) -> Vec<SourceRef> {
    let hits = store.similarity_search_filtered(query_vec, vendor_name, k).await;
    rank_sources(hits)
}

/// Aggregate path: proportional fan-out over all known vendors, merged and
/// re-ranked globally. The final result never exceeds `k`.
pub async fn retrieve_across_vendors(
    store: &VectorStore,
    query_vec: &[f32],
    vendors: &[String],
    k: usize,
) -> Vec<SourceRef> {
    let budget = per_vendor_budget(k, vendors.len());

    let mut merged: Vec<ScoredChunk> = Vec::new();
    for vendor in vendors {
        let hits = store.similarity_search_filtered(query_vec, vendor, budget).await;
        merged.extend(hits);
    }

    merge_and_rank(merged, k)
}

/// Sort merged candidates by similarity descending, truncate to `k`, and
/// assign ranks 1..n after truncation.
pub fn merge_and_rank(mut hits: Vec<ScoredChunk>, k: usize) -> Vec<SourceRef> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    rank_sources(hits)
}

fn rank_sources(hits: Vec<ScoredChunk>) -> Vec<SourceRef> {
    hits.into_iter()
        .enumerate()
        .map(|(i, hit)| {
            let chunk_type = hit
                .metadata
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            SourceRef {
                rank: i + 1,
                chunk_id: hit.chunk_id,
                vendor_name: hit.vendor_name,
                chunk_type,
                similarity: 1.0 - hit.distance,
                content_excerpt: excerpt(&hit.content),
            }
        })
        .collect()
}

/// First 220 characters of the content, with an ellipsis marker when
/// truncated. Counted in characters, not bytes.
fn excerpt(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Assemble the bounded context string handed to the synthesizer.
pub fn build_context(sources: &[SourceRef]) -> String {
    sources
        .iter()
        .map(|s| {
            format!(
                "[Source {} | sim {:.3}]\n{}",
                s.rank, s.similarity, s.content_excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(vendor: &str, id: &str, distance: f64) -> ScoredChunk {
        ScoredChunk {
            chunk_id: id.to_string(),
            vendor_name: vendor.to_string(),
            content: format!("content for {}", id),
            metadata: serde_json::json!({"type": "invoice"})
                .as_object()
                .cloned()
                .unwrap(),
            distance,
        }
    }

    #[test]
    fn test_budget_allocates_at_least_one() {
        assert_eq!(per_vendor_budget(2, 10), 1);
        assert_eq!(per_vendor_budget(5, 0), 5);
        assert_eq!(per_vendor_budget(0, 3), 1);
    }

    #[test]
    fn test_budget_four_vendors_k8() {
        assert_eq!(per_vendor_budget(8, 4), 2);
    }

    #[test]
    fn test_merge_sorts_by_similarity_and_truncates() {
        let merged = vec![
            hit("Globex", "g1", 0.4),
            hit("Acme Corp", "a1", 0.1),
            hit("Initech", "i1", 0.9),
            hit("Acme Corp", "a2", 0.2),
        ];
        let ranked = merge_and_rank(merged, 3);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].chunk_id, "a1");
        assert_eq!(ranked[1].chunk_id, "a2");
        assert_eq!(ranked[2].chunk_id, "g1");
        // Ranks reassigned after truncation.
        assert_eq!(
            ranked.iter().map(|s| s.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_merge_never_exceeds_k() {
        let merged: Vec<ScoredChunk> = (0..20)
            .map(|i| hit("Acme Corp", &format!("c{}", i), i as f64 / 20.0))
            .collect();
        assert_eq!(merge_and_rank(merged, 8).len(), 8);
    }

    #[test]
    fn test_similarity_is_one_minus_distance() {
        let ranked = merge_and_rank(vec![hit("Acme Corp", "a1", 0.25)], 5);
        assert!((ranked[0].similarity - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_excerpt_truncation() {
        let long = "x".repeat(300);
        let e = excerpt(&long);
        assert!(e.ends_with("..."));
        assert_eq!(e.chars().count(), 223);

        let short = "short content";
        assert_eq!(excerpt(short), short);
    }

    #[test]
    fn test_excerpt_exact_boundary_has_no_ellipsis() {
        let exact = "y".repeat(220);
        assert_eq!(excerpt(&exact), exact);
    }

    #[test]
    fn test_context_format() {
        let mut h = hit("Acme Corp", "a1", 0.123);
        h.content = "Invoice details here".to_string();
        let sources = merge_and_rank(vec![h, hit("Globex", "g1", 0.5)], 5);
        let context = build_context(&sources);

        assert!(context.starts_with("[Source 1 | sim 0.877]\nInvoice details here"));
        assert!(context.contains("\n\n[Source 2 | sim 0.500]\n"));
    }
}
