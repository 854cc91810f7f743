//! Spend analytics over the indexed invoice corpus.
//!
//! Everything is recomputed from a full metadata scan on each call: there is
//! no snapshot cache, so analytics stay correct under concurrent ingestion.
//! Invoices with unparseable dates are excluded from trend buckets but still
//! count toward totals. The narrative summary is LLM-generated from the
//! report JSON; on safety block or any failure a deterministic
//! sentence-template summary is substituted, so the field is never missing.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::llm::{is_safety_blocked, LlmClient};
use crate::models::VendorSpendEntry;
use crate::money;

/// Top vendor share of total spend above which the deterministic narrative
/// calls out concentration risk.
const CONCENTRATION_THRESHOLD: f64 = 0.5;

/// Quarterly trend is always capped to this many quarters.
const MAX_QUARTERS: usize = 8;

/// Spend-by-category approximation: top N vendors.
const CATEGORY_LIMIT: usize = 8;

/// One point in a trend or category series.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HighestSpend {
    pub vendor: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    #[serde(rename = "highestSpend")]
    pub highest_spend: HighestSpend,
    #[serde(rename = "averageInvoice")]
    pub average_invoice: f64,
    #[serde(rename = "totalSpend")]
    pub total_spend: f64,
    #[serde(rename = "totalInvoices")]
    pub total_invoices: u64,
    #[serde(rename = "vendorCount")]
    pub vendor_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub insights: Insights,
    #[serde(rename = "monthlyTrend")]
    pub monthly_trend: Vec<TrendPoint>,
    #[serde(rename = "topVendors")]
    pub top_vendors: Vec<VendorSpendEntry>,
    #[serde(rename = "spendByCategory")]
    pub spend_by_category: Vec<TrendPoint>,
    #[serde(rename = "quarterlyTrend")]
    pub quarterly_trend: Vec<TrendPoint>,
    pub period: String,
    #[serde(rename = "llmSummary")]
    pub llm_summary: String,
}

/// Build the full report from scanned metadata records and the spend
/// ranking. `llm_summary` is left empty; callers fill it via
/// [`narrative_summary`].
pub fn compute_report(
    records: &[serde_json::Map<String, serde_json::Value>],
    ranking: Vec<VendorSpendEntry>,
    period: &str,
) -> AnalyticsReport {
    let mut monthly: BTreeMap<String, f64> = BTreeMap::new();
    let mut total_spend = 0.0;
    let mut total_invoices: u64 = 0;

    for meta in records {
        if meta.get("type").and_then(|t| t.as_str()) != Some("invoice") {
            continue;
        }

        let amount = money::metadata_invoice_amount(meta);
        total_spend += amount;
        total_invoices += 1;

        let date = meta
            .get("invoice_date")
            .and_then(|d| d.as_str())
            .unwrap_or("");
        if let Some(key) = month_key(date) {
            *monthly.entry(key).or_insert(0.0) += amount;
        }
    }

    let all_monthly: Vec<TrendPoint> = monthly
        .iter()
        .map(|(name, value)| TrendPoint {
            name: name.clone(),
            value: *value,
        })
        .collect();

    let mut quarterly: BTreeMap<String, f64> = BTreeMap::new();
    for point in &all_monthly {
        if let Some(q) = quarter_key(&point.name) {
            *quarterly.entry(q).or_insert(0.0) += point.value;
        }
    }
    let mut quarterly_trend: Vec<TrendPoint> = quarterly
        .into_iter()
        .map(|(name, value)| TrendPoint { name, value })
        .collect();
    if quarterly_trend.len() > MAX_QUARTERS {
        quarterly_trend = quarterly_trend.split_off(quarterly_trend.len() - MAX_QUARTERS);
    }

    let monthly_trend = apply_period(all_monthly, period);

    let highest = ranking.first();
    // Treat an empty corpus as one invoice so the average stays finite.
    let average_invoice = total_spend / (total_invoices.max(1) as f64);

    let insights = Insights {
        highest_spend: HighestSpend {
            vendor: highest.map(|e| e.vendor_name.clone()).unwrap_or_default(),
            amount: highest.map(|e| e.total_spend).unwrap_or(0.0),
        },
        average_invoice,
        total_spend,
        total_invoices,
        vendor_count: ranking.len(),
    };

    let spend_by_category = ranking
        .iter()
        .take(CATEGORY_LIMIT)
        .map(|e| TrendPoint {
            name: e.vendor_name.clone(),
            value: e.total_spend,
        })
        .collect();

    AnalyticsReport {
        insights,
        monthly_trend,
        top_vendors: ranking,
        spend_by_category,
        quarterly_trend,
        period: period.to_string(),
        llm_summary: String::new(),
    }
}

/// Narrative summary for a report: LLM-generated, deterministic fallback.
pub async fn narrative_summary(llm: &LlmClient, report: &AnalyticsReport) -> String {
    if llm.is_enabled() {
        let payload = serde_json::to_string(report).unwrap_or_default();
        let prompt = format!(
            "Write a short narrative summary (3-4 sentences) of these vendor spend \
             analytics for a finance reader. Mention total spend, the highest-spend \
             vendor, and the recent trend.\n\nAnalytics JSON:\n{}",
            payload
        );
        match llm
            .quick(&prompt, Some("You summarize vendor spend analytics."))
            .await
        {
            Ok(text) if !is_safety_blocked(&text) => return text,
            Ok(_) => debug!("narrative summary withheld, using deterministic summary"),
            Err(e) => debug!(error = %e, "narrative summary unavailable"),
        }
    }

    deterministic_summary(report)
}

/// Sentence-template summary built only from report numbers.
pub fn deterministic_summary(report: &AnalyticsReport) -> String {
    let i = &report.insights;
    if i.total_invoices == 0 {
        return "No invoice data is indexed yet, so there is nothing to summarize.".to_string();
    }

    let mut out = format!(
        "Total spend is {:.2} across {} invoices from {} vendors (average invoice {:.2}).",
        i.total_spend, i.total_invoices, i.vendor_count, i.average_invoice
    );

    if !i.highest_spend.vendor.is_empty() {
        out.push_str(&format!(
            " The highest-spend vendor is {} at {:.2}.",
            i.highest_spend.vendor, i.highest_spend.amount
        ));
    }

    if let Some(direction) = trend_direction(&report.monthly_trend) {
        out.push_str(&format!(
            " Spend over the last three tracked months is {}.",
            direction
        ));
    }

    if let Some(share) = concentration_share(report) {
        if share > CONCENTRATION_THRESHOLD {
            out.push_str(&format!(
                " Note: {} accounts for {:.0}% of total spend, a significant concentration.",
                report.insights.highest_spend.vendor,
                share * 100.0
            ));
        }
    }

    out
}

/// Top vendor's share of total spend, when both are positive.
pub fn concentration_share(report: &AnalyticsReport) -> Option<f64> {
    let total = report.insights.total_spend;
    let top = report.insights.highest_spend.amount;
    if total > 0.0 && top > 0.0 {
        Some(top / total)
    } else {
        None
    }
}

/// Direction over the last up-to-3 monthly buckets.
fn trend_direction(monthly: &[TrendPoint]) -> Option<&'static str> {
    let window = &monthly[monthly.len().saturating_sub(3)..];
    if window.len() < 2 {
        return None;
    }
    let first = window[0].value;
    let last = window[window.len() - 1].value;
    Some(if last > first {
        "rising"
    } else if last < first {
        "falling"
    } else {
        "flat"
    })
}

/// `YYYY-MM` bucket key from the first 10 characters of a date string.
fn month_key(date: &str) -> Option<String> {
    let head: String = date.chars().take(10).collect();
    let parsed = NaiveDate::parse_from_str(&head, "%Y-%m-%d").ok()?;
    Some(format!("{:04}-{:02}", parsed.year(), parsed.month()))
}

/// `YYYY-Q{1..4}` key from a `YYYY-MM` month key.
fn quarter_key(month: &str) -> Option<String> {
    let (year, m) = month.split_once('-')?;
    let m: u32 = m.parse().ok()?;
    if !(1..=12).contains(&m) {
        return None;
    }
    Some(format!("{}-Q{}", year, (m - 1) / 3 + 1))
}

/// Keep the trailing window of monthly buckets for the requested period.
fn apply_period(mut monthly: Vec<TrendPoint>, period: &str) -> Vec<TrendPoint> {
    let keep = match period {
        "month" => 1,
        "quarter" => 3,
        "year" => 12,
        _ => return monthly,
    };
    if monthly.len() > keep {
        monthly.split_off(monthly.len() - keep)
    } else {
        monthly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(vendor: &str, date: &str, amount: &str) -> serde_json::Map<String, serde_json::Value>
    {
        serde_json::json!({
            "type": "invoice",
            "vendor_name": vendor,
            "invoice_date": date,
            "total_amount": amount,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn entry(vendor: &str, spend: f64, count: u64) -> VendorSpendEntry {
        VendorSpendEntry {
            vendor_name: vendor.to_string(),
            total_spend: spend,
            invoice_count: count,
        }
    }

    #[test]
    fn test_month_and_quarter_keys() {
        assert_eq!(month_key("2026-03-15"), Some("2026-03".to_string()));
        assert_eq!(month_key("2026-03-15T10:30:00Z"), Some("2026-03".to_string()));
        assert_eq!(month_key("not a date"), None);
        assert_eq!(quarter_key("2026-01"), Some("2026-Q1".to_string()));
        assert_eq!(quarter_key("2026-03"), Some("2026-Q1".to_string()));
        assert_eq!(quarter_key("2026-04"), Some("2026-Q2".to_string()));
        assert_eq!(quarter_key("2026-12"), Some("2026-Q4".to_string()));
    }

    #[test]
    fn test_unparseable_dates_count_toward_totals_not_trend() {
        let records = vec![
            invoice("Acme Corp", "2026-01-10", "100"),
            invoice("Acme Corp", "garbage", "50"),
        ];
        let report = compute_report(&records, vec![entry("Acme Corp", 150.0, 2)], "all");

        assert_eq!(report.insights.total_spend, 150.0);
        assert_eq!(report.insights.total_invoices, 2);
        assert_eq!(report.monthly_trend.len(), 1);
        assert_eq!(report.monthly_trend[0].value, 100.0);
    }

    #[test]
    fn test_period_selection_over_fourteen_months() {
        // 14 consecutive months, one invoice of 10.0 each.
        let mut records = Vec::new();
        for i in 0..14 {
            let year = 2025 + i / 12;
            let month = i % 12 + 1;
            records.push(invoice(
                "Acme Corp",
                &format!("{:04}-{:02}-05", year, month),
                "10",
            ));
        }
        let ranking = vec![entry("Acme Corp", 140.0, 14)];

        let quarter = compute_report(&records, ranking.clone(), "quarter");
        assert_eq!(quarter.monthly_trend.len(), 3);
        assert_eq!(quarter.monthly_trend[2].name, "2026-02");

        let year = compute_report(&records, ranking.clone(), "year");
        assert_eq!(year.monthly_trend.len(), 12);
        assert_eq!(year.monthly_trend[0].name, "2025-03");

        let month = compute_report(&records, ranking.clone(), "month");
        assert_eq!(month.monthly_trend.len(), 1);

        let all = compute_report(&records, ranking, "all");
        assert_eq!(all.monthly_trend.len(), 14);
    }

    #[test]
    fn test_quarterly_trend_capped_to_eight() {
        // 30 months spans 10+ quarters.
        let mut records = Vec::new();
        for i in 0..30 {
            let year = 2024 + i / 12;
            let month = i % 12 + 1;
            records.push(invoice(
                "Acme Corp",
                &format!("{:04}-{:02}-01", year, month),
                "10",
            ));
        }
        let report = compute_report(&records, vec![entry("Acme Corp", 300.0, 30)], "all");
        assert_eq!(report.quarterly_trend.len(), 8);
        // Latest quarter present, earliest quarters dropped.
        assert_eq!(report.quarterly_trend[7].name, "2026-Q2");
    }

    #[test]
    fn test_quarterly_sums_months() {
        let records = vec![
            invoice("Acme Corp", "2026-01-01", "100"),
            invoice("Acme Corp", "2026-02-01", "200"),
            invoice("Acme Corp", "2026-04-01", "50"),
        ];
        let report = compute_report(&records, vec![entry("Acme Corp", 350.0, 3)], "all");
        assert_eq!(report.quarterly_trend.len(), 2);
        assert_eq!(report.quarterly_trend[0].name, "2026-Q1");
        assert_eq!(report.quarterly_trend[0].value, 300.0);
        assert_eq!(report.quarterly_trend[1].value, 50.0);
    }

    #[test]
    fn test_insights_and_zero_guard() {
        let report = compute_report(&[], vec![], "all");
        assert_eq!(report.insights.average_invoice, 0.0);
        assert_eq!(report.insights.vendor_count, 0);
        assert!(report.insights.highest_spend.vendor.is_empty());

        let records = vec![
            invoice("Acme Corp", "2026-01-01", "₹1,200.50"),
            invoice("Globex", "2026-01-02", "100"),
        ];
        let ranking = vec![entry("Acme Corp", 1200.50, 1), entry("Globex", 100.0, 1)];
        let report = compute_report(&records, ranking, "all");

        assert_eq!(report.insights.highest_spend.vendor, "Acme Corp");
        assert_eq!(report.insights.total_invoices, 2);
        assert!((report.insights.average_invoice - 650.25).abs() < 1e-9);
        assert_eq!(report.spend_by_category[0].name, "Acme Corp");
    }

    #[test]
    fn test_spend_by_category_capped_to_top_eight() {
        let ranking: Vec<VendorSpendEntry> = (0..12)
            .map(|i| entry(&format!("Vendor {}", i), (12 - i) as f64, 1))
            .collect();
        let report = compute_report(&[], ranking, "all");
        assert_eq!(report.spend_by_category.len(), 8);
        assert_eq!(report.top_vendors.len(), 12);
    }

    #[test]
    fn test_deterministic_summary_mentions_concentration() {
        let records = vec![
            invoice("Acme Corp", "2026-01-01", "900"),
            invoice("Globex", "2026-02-01", "100"),
        ];
        let ranking = vec![entry("Acme Corp", 900.0, 1), entry("Globex", 100.0, 1)];
        let report = compute_report(&records, ranking, "all");

        let summary = deterministic_summary(&report);
        assert!(summary.contains("Total spend is 1000.00"));
        assert!(summary.contains("Acme Corp accounts for 90%"));
    }

    #[test]
    fn test_deterministic_summary_trend_direction() {
        let records = vec![
            invoice("Acme Corp", "2026-01-01", "100"),
            invoice("Acme Corp", "2026-02-01", "200"),
            invoice("Acme Corp", "2026-03-01", "300"),
        ];
        let report = compute_report(&records, vec![entry("Acme Corp", 600.0, 3)], "all");
        assert!(deterministic_summary(&report).contains("rising"));
    }

    #[test]
    fn test_deterministic_summary_empty_corpus() {
        let report = compute_report(&[], vec![], "all");
        let summary = deterministic_summary(&report);
        assert!(summary.contains("No invoice data"));
    }
}
