use crate::error::Result;
use crate::store::ArtifactRecord;
use std::time::Duration;
use tracing::{debug, warn};

/// Fire-and-forget webhook notifier. A new artifact record is POSTed once;
/// failures are logged and dropped — the webhook is a courtesy signal, not
/// part of the ingestion transaction, and the call is not idempotent enough
/// to retry.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, http_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Self { client, url })
    }

    pub async fn notify(&self, record: &ArtifactRecord) {
        match self.client.post(&self.url).json(record).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Webhook notified for '{}'", record.file_name);
            }
            Ok(resp) => {
                warn!("Webhook returned status {}, ignoring", resp.status());
            }
            Err(e) => {
                warn!("Webhook call failed, ignoring: {}", e);
            }
        }
    }
}
