use crate::error::{GateError, Result};
use crate::ports::SheetPort;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Sheets values-API backed implementation of [`SheetPort`]. Only the first
/// column of a worksheet is read or written; that is all the allow-list uses.
pub struct GoogleSheets {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    values: Option<Vec<Vec<String>>>,
}

impl GoogleSheets {
    pub fn new(api_key: String, http_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Self { client, api_key })
    }

    fn range_url(&self, sheet_id: &str, range: &str, suffix: &str) -> String {
        // Worksheet names may contain spaces; the values API takes the range
        // as a path segment.
        let encoded = range.replace(' ', "%20");
        format!("{}/{}/values/{}{}", API_BASE, sheet_id, encoded, suffix)
    }
}

#[async_trait]
impl SheetPort for GoogleSheets {
    async fn read_rows(&self, sheet_id: &str, worksheet: &str) -> Result<Vec<String>> {
        let url = self.range_url(sheet_id, &format!("{}!A:A", worksheet), "");
        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(GateError::Api {
                message: format!("sheet read failed with status {}", resp.status()),
            });
        }
        let range: ValueRange = resp.json().await?;
        let rows = range
            .values
            .unwrap_or_default()
            .into_iter()
            .filter_map(|mut row| if row.is_empty() { None } else { Some(row.remove(0)) })
            .collect::<Vec<_>>();
        debug!("Read {} row(s) from worksheet '{}'", rows.len(), worksheet);
        Ok(rows)
    }

    async fn overwrite_rows(&self, sheet_id: &str, worksheet: &str, rows: &[String]) -> Result<()> {
        // Clear the column first so stale entries below the new list are gone.
        let clear_url = self.range_url(sheet_id, &format!("{}!A:A", worksheet), ":clear");
        let resp = self
            .client
            .post(&clear_url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(GateError::Api {
                message: format!("sheet clear failed with status {}", resp.status()),
            });
        }

        let values: Vec<Vec<&String>> = rows.iter().map(|r| vec![r]).collect();
        let update_url = self.range_url(sheet_id, &format!("{}!A1", worksheet), "");
        let resp = self
            .client
            .put(&update_url)
            .query(&[("key", self.api_key.as_str()), ("valueInputOption", "RAW")])
            .json(&json!({ "majorDimension": "ROWS", "values": values }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(GateError::Api {
                message: format!("sheet update failed with status {}", resp.status()),
            });
        }
        debug!("Wrote {} row(s) to worksheet '{}'", rows.len(), worksheet);
        Ok(())
    }
}
