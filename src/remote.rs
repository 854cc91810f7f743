//! Remote vendor record loader.
//!
//! Fetches vendor invoice records from the document-store service instead of
//! the local JSON directory: one call for the vendor list, then one call per
//! vendor for its master records. Field names coming back are inconsistent,
//! so amounts and line items are mapped through the same heuristics the
//! extraction pipeline uses upstream.

use anyhow::Result;
use std::time::Duration;
use tracing::warn;

use crate::config::DataConfig;
use crate::models::{Invoice, LineItem, Vendor, VendorDataset};

pub struct RemoteVendorLoader {
    base_url: String,
    user_id: String,
    client: reqwest::Client,
}

impl RemoteVendorLoader {
    pub fn new(config: &DataConfig) -> Result<Self> {
        let base_url = config
            .remote_base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("data.remote_base_url not configured"))?;
        let user_id = config
            .remote_user_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("data.remote_user_id not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.remote_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
            client,
        })
    }

    async fn fetch_vendor_list(&self) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/api/v1/drive/users/{}/vendors", self.base_url, self.user_id);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "vendor list request failed");
            return Ok(Vec::new());
        }
        let payload: serde_json::Value = resp.json().await?;
        Ok(payload
            .get("vendors")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_master_records(&self, vendor_id: &str) -> Result<Vec<serde_json::Value>> {
        let url = format!(
            "{}/api/v1/drive/users/{}/vendors/{}/master",
            self.base_url, self.user_id, vendor_id
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), vendor_id, "master records request failed");
            return Ok(Vec::new());
        }
        let payload: serde_json::Value = resp.json().await?;
        Ok(payload
            .get("records")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Fetch the full dataset: vendor list, then per-vendor records.
    /// Vendors without an id are skipped. Calls run sequentially; the store
    /// tolerates partially loaded data.
    pub async fn load(&self) -> Result<VendorDataset> {
        let entries = self.fetch_vendor_list().await?;
        let mut vendors = Vec::new();

        for entry in entries {
            let vendor_id = match entry.get("id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let vendor_name = entry
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown Vendor")
                .to_string();

            let records = self.fetch_master_records(&vendor_id).await?;
            let invoices = records
                .iter()
                .map(|r| map_record(r, &vendor_name))
                .collect();

            vendors.push(Vendor {
                vendor_name,
                last_updated: chrono::Utc::now().to_rfc3339(),
                invoices,
            });
        }

        Ok(VendorDataset { vendors })
    }
}

/// Map one raw master record to an [`Invoice`], trying the known key
/// variants for each field.
fn map_record(record: &serde_json::Value, vendor_name: &str) -> Invoice {
    let get_str = |keys: &[&str]| -> String {
        for key in keys {
            if let Some(v) = record.get(*key) {
                match v {
                    serde_json::Value::String(s) if !s.is_empty() => return s.clone(),
                    serde_json::Value::Number(n) => return n.to_string(),
                    _ => {}
                }
            }
        }
        String::new()
    };

    let invoice_number = get_str(&["invoice_number", "file_name", "drive_file_id"]);
    let invoice_date = get_str(&["invoice_date", "processed_at"]);

    let mut total_amount = get_str(&[
        "total_amount",
        "amount",
        "totalAmount",
        "invoice_amount",
        "grand_total",
        "net_amount",
    ]);
    if total_amount.is_empty() {
        total_amount = first_currency_like_value(record);
    }

    let line_items = record
        .get("line_items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|li| serde_json::from_value::<LineItem>(li.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    Invoice {
        vendor_name: vendor_name.to_string(),
        invoice_number,
        invoice_date,
        total_amount,
        line_items,
        drive_file_id: get_str(&["drive_file_id"]),
        file_name: get_str(&["file_name"]),
        web_view_link: get_str(&["web_view_link"]),
        web_content_link: get_str(&["web_content_link"]),
    }
}

/// Last-resort amount heuristic: the first field value that looks like a
/// currency string or a bare number.
fn first_currency_like_value(record: &serde_json::Value) -> String {
    let map = match record.as_object() {
        Some(m) => m,
        None => return String::new(),
    };

    for value in map.values() {
        match value {
            serde_json::Value::String(s)
                if s.contains('₹') || s.contains('$') || s.contains(',') =>
            {
                if crate::money::parse_amount(s) > 0.0 {
                    return s.clone();
                }
            }
            serde_json::Value::Number(n) => return n.to_string(),
            _ => {}
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_record_amount_key_fallbacks() {
        let record = serde_json::json!({
            "invoice_number": "INV-7",
            "grand_total": "₹9,500",
        });
        let invoice = map_record(&record, "Acme Corp");
        assert_eq!(invoice.total_amount, "₹9,500");
        assert_eq!(invoice.vendor_name, "Acme Corp");
    }

    #[test]
    fn test_map_record_uses_file_name_as_invoice_number() {
        let record = serde_json::json!({
            "file_name": "acme-march.pdf",
            "total_amount": "100",
        });
        let invoice = map_record(&record, "Acme Corp");
        assert_eq!(invoice.invoice_number, "acme-march.pdf");
    }

    #[test]
    fn test_currency_heuristic_skips_plain_text() {
        let record = serde_json::json!({
            "notes": "paid in full",
            "value": "₹1,250.00",
        });
        let invoice = map_record(&record, "Acme Corp");
        assert_eq!(invoice.total_amount, "₹1,250.00");
    }

    #[test]
    fn test_line_item_key_aliases() {
        let record = serde_json::json!({
            "total_amount": "0",
            "line_items": [
                {"description": "Widgets", "quantity": "2", "price": "10", "line_total": "20"}
            ],
        });
        let invoice = map_record(&record, "Acme Corp");
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].item_description, "Widgets");
        assert_eq!(invoice.line_items[0].amount, "20");
    }
}
