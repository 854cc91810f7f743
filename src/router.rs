//! Query intent classification and vendor resolution.
//!
//! Intent detection is keyword-driven, not statistical: the question is
//! lower-cased and scanned against fixed phrase sets, evaluated in a fixed
//! priority order. The order is encoded as an explicit rule table rather
//! than nested conditionals:
//!
//! | Priority | Intent | Trigger | Condition |
//! |---|---|---|---|
//! | 1 | `VendorRanking` | ranking phrases | no explicit vendor, or vendor is `ALL` |
//! | 2 | `FullDetail` | full-detail phrases | — |
//! | 3 | `VendorQa` | anything else | — |

use tracing::debug;

use crate::llm::{is_safety_blocked, LlmClient};

/// Sentinel vendor value meaning "do not pin to one vendor".
pub const ALL_VENDORS: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Multi-vendor spend ranking, answered deterministically.
    VendorRanking,
    /// Exhaustive per-invoice detail, answered deterministically.
    FullDetail,
    /// Normal retrieval-augmented Q&A.
    VendorQa,
}

const RANKING_PHRASES: &[&str] = &[
    "top vendors",
    "top vendor",
    "rank vendors",
    "vendor ranking",
    "rank my vendors",
    "highest spend",
    "highest spending",
    "most spend",
    "biggest vendors",
    "compare vendors",
];

const FULL_DETAIL_PHRASES: &[&str] = &[
    "full detail",
    "full details",
    "all invoices",
    "every invoice",
    "list invoices",
    "view links",
    "complete detail",
];

struct Rule {
    intent: QueryIntent,
    phrases: &'static [&'static str],
    /// Ranking only applies when the caller has not pinned a single vendor.
    requires_unpinned: bool,
}

const RULES: &[Rule] = &[
    Rule {
        intent: QueryIntent::VendorRanking,
        phrases: RANKING_PHRASES,
        requires_unpinned: true,
    },
    Rule {
        intent: QueryIntent::FullDetail,
        phrases: FULL_DETAIL_PHRASES,
        requires_unpinned: false,
    },
];

/// Classify a question. `explicit_vendor` is the vendor the caller supplied,
/// if any; the `ALL` sentinel counts as unpinned.
pub fn classify(question: &str, explicit_vendor: Option<&str>) -> QueryIntent {
    let lowered = question.to_lowercase();
    let pinned = explicit_vendor.is_some_and(|v| !v.trim().is_empty() && v != ALL_VENDORS);

    for rule in RULES {
        if rule.requires_unpinned && pinned {
            continue;
        }
        if rule.phrases.iter().any(|p| lowered.contains(p)) {
            return rule.intent;
        }
    }

    QueryIntent::VendorQa
}

/// Resolve the vendor scope for a question.
///
/// Order: explicit caller-supplied name, then case-insensitive substring
/// match of each known vendor against the question (first match wins), then
/// LLM disambiguation. An LLM reply is accepted only when it
/// case-insensitively contains one of the known names. `None` means
/// unresolved: the caller degrades to the aggregate all-vendor path instead
/// of failing.
pub async fn resolve_vendor(
    question: &str,
    explicit_vendor: Option<&str>,
    known_vendors: &[String],
    llm: &LlmClient,
) -> Option<String> {
    if let Some(vendor) = explicit_vendor {
        let trimmed = vendor.trim();
        if !trimmed.is_empty() && trimmed != ALL_VENDORS {
            return Some(trimmed.to_string());
        }
    }

    if let Some(vendor) = substring_match(question, known_vendors) {
        return Some(vendor);
    }

    if known_vendors.is_empty() || !llm.is_enabled() {
        return None;
    }

    let prompt = format!(
        "Question: {}\n\nKnown vendors:\n{}\n\nWhich single vendor does the question refer to? \
         Reply with exactly one vendor name from the list, or None.",
        question,
        known_vendors.join("\n")
    );

    match llm
        .quick(&prompt, Some("You match questions to vendor names."))
        .await
    {
        Ok(reply) if !is_safety_blocked(&reply) => {
            let lowered = reply.to_lowercase();
            known_vendors
                .iter()
                .find(|v| lowered.contains(&v.to_lowercase()))
                .cloned()
        }
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "vendor disambiguation unavailable");
            None
        }
    }
}

/// Case-insensitive substring detection of a known vendor inside the
/// question. Metadata equality elsewhere stays case-sensitive.
fn substring_match(question: &str, known_vendors: &[String]) -> Option<String> {
    let lowered = question.to_lowercase();
    known_vendors
        .iter()
        .find(|v| !v.is_empty() && lowered.contains(&v.to_lowercase()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn known() -> Vec<String> {
        vec!["Acme Corp".to_string(), "Globex".to_string()]
    }

    #[test]
    fn test_ranking_intent_without_vendor() {
        assert_eq!(
            classify("Show me the top vendors by spend", None),
            QueryIntent::VendorRanking
        );
    }

    #[test]
    fn test_ranking_intent_with_all_sentinel() {
        assert_eq!(
            classify("rank vendors please", Some(ALL_VENDORS)),
            QueryIntent::VendorRanking
        );
    }

    #[test]
    fn test_ranking_suppressed_when_vendor_pinned() {
        // An explicit vendor pins scope, so ranking does not apply; the
        // full-detail rule is still consulted next.
        assert_eq!(
            classify("highest spend?", Some("Acme Corp")),
            QueryIntent::VendorQa
        );
    }

    #[test]
    fn test_full_detail_intent() {
        assert_eq!(
            classify("Give me all invoices with view links", Some("Acme Corp")),
            QueryIntent::FullDetail
        );
    }

    #[test]
    fn test_priority_ranking_over_full_detail() {
        assert_eq!(
            classify("top vendors with all invoices", None),
            QueryIntent::VendorRanking
        );
    }

    #[test]
    fn test_default_is_qa() {
        assert_eq!(
            classify("What did we buy in March?", None),
            QueryIntent::VendorQa
        );
    }

    #[tokio::test]
    async fn test_substring_resolution_skips_llm() {
        // Disabled LLM: resolution must still succeed via substring match.
        let llm = LlmClient::new(&LlmConfig::default()).unwrap();
        let resolved = resolve_vendor("What did Acme Corp spend?", None, &known(), &llm).await;
        assert_eq!(resolved.as_deref(), Some("Acme Corp"));
    }

    #[tokio::test]
    async fn test_substring_resolution_is_case_insensitive() {
        let llm = LlmClient::new(&LlmConfig::default()).unwrap();
        let resolved = resolve_vendor("totals for GLOBEX last month", None, &known(), &llm).await;
        assert_eq!(resolved.as_deref(), Some("Globex"));
    }

    #[tokio::test]
    async fn test_explicit_vendor_wins() {
        let llm = LlmClient::new(&LlmConfig::default()).unwrap();
        let resolved =
            resolve_vendor("What about Globex?", Some("Acme Corp"), &known(), &llm).await;
        assert_eq!(resolved.as_deref(), Some("Acme Corp"));
    }

    #[tokio::test]
    async fn test_unresolvable_returns_none() {
        let llm = LlmClient::new(&LlmConfig::default()).unwrap();
        let resolved = resolve_vendor("How much did we spend overall?", None, &known(), &llm).await;
        assert_eq!(resolved, None);
    }
}
