//! Currency-string normalization.
//!
//! Upstream extraction produces amounts in wildly inconsistent shapes:
//! `"₹1,200.50"`, `"$2000"`, `"2,000"`, plain numbers, or garbage. Every
//! consumer that sums amounts goes through [`parse_amount`] so the contract
//! is defined in exactly one place: strip the currency symbol set, strip
//! separators, keep digits and the decimal point, parse as float, and treat
//! anything unparseable as 0.0.

use crate::models::{Invoice, LineItem};

/// Parse a currency-like string into a float. Unparseable input yields 0.0.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if cleaned.is_empty() {
        return 0.0;
    }

    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// Sum the parsed amounts of a list of line items.
pub fn line_items_total(items: &[LineItem]) -> f64 {
    items.iter().map(|li| parse_amount(&li.amount)).sum()
}

/// Effective amount of an invoice: the parsed header total, falling back to
/// the summed line-item amounts when the header is zero or missing.
pub fn invoice_amount(invoice: &Invoice) -> f64 {
    let header = parse_amount(&invoice.total_amount);
    if header != 0.0 {
        return header;
    }

    let li_total = line_items_total(&invoice.line_items);
    if li_total > 0.0 {
        li_total
    } else {
        0.0
    }
}

/// Amount field pulled from stored metadata, which may hold a JSON number
/// or a currency-formatted string.
pub fn metadata_amount(value: Option<&serde_json::Value>) -> f64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => parse_amount(s),
        _ => 0.0,
    }
}

/// Sum of line-item amounts where `line_items` is stored as a JSON string.
pub fn line_items_json_total(value: Option<&serde_json::Value>) -> f64 {
    let raw = match value.and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => s,
        _ => return 0.0,
    };

    let items: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(_) => return 0.0,
    };

    items
        .iter()
        .map(|li| metadata_amount(li.get("amount")))
        .sum()
}

/// Effective invoice amount straight from a stored metadata record: header
/// total, falling back to the line-item sum when the header parses to zero.
pub fn metadata_invoice_amount(meta: &serde_json::Map<String, serde_json::Value>) -> f64 {
    let header = metadata_amount(meta.get("total_amount"));
    if header != 0.0 {
        return header;
    }
    line_items_json_total(meta.get("line_items"))
}
