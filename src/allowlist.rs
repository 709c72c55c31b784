use crate::config::SheetConfig;
use crate::ports::SheetPort;
use std::sync::Arc;
use tracing::{info, warn};

/// Sender allow-list gate backed by an external spreadsheet.
///
/// Policy: when no sheet is configured the gate is disabled and every sender
/// is allowed (default-open). When a sheet *is* configured, any lookup failure
/// denies — a broken allow-list must not turn into an open door. Membership is
/// re-fetched on every check; the spreadsheet stays the single source of
/// truth and the first row is treated as a header.
pub struct AllowlistGate {
    backend: Option<(Arc<dyn SheetPort>, SheetConfig)>,
}

impl AllowlistGate {
    pub fn new(sheet: Arc<dyn SheetPort>, config: SheetConfig) -> Self {
        Self {
            backend: Some((sheet, config)),
        }
    }

    /// Gate with no sheet configured: every sender is allowed.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub async fn is_allowed(&self, identity: &str) -> bool {
        self.is_allowed_in(identity, None).await
    }

    /// Membership check against the configured worksheet, or an explicitly
    /// named one (ad-hoc download requests may target a different tab).
    pub async fn is_allowed_in(&self, identity: &str, worksheet: Option<&str>) -> bool {
        let Some((sheet, cfg)) = &self.backend else {
            return true;
        };
        let worksheet = worksheet.unwrap_or(&cfg.worksheet);

        let rows = match self.fetch_with_retry(sheet.as_ref(), &cfg.sheet_id, worksheet).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Allow-list lookup failed, denying '{}': {}", identity, e);
                return false;
            }
        };

        let wanted = identity.trim();
        let allowed = rows
            .iter()
            .skip(1) // header row
            .any(|row| row.trim().eq_ignore_ascii_case(wanted));
        if !allowed {
            info!("Sender '{}' not on allow-list '{}'", identity, worksheet);
        }
        allowed
    }

    // The read is idempotent, so one bounded retry on failure.
    async fn fetch_with_retry(
        &self,
        sheet: &dyn SheetPort,
        sheet_id: &str,
        worksheet: &str,
    ) -> crate::error::Result<Vec<String>> {
        match sheet.read_rows(sheet_id, worksheet).await {
            Ok(rows) => Ok(rows),
            Err(first) => {
                warn!("Allow-list fetch failed, retrying once: {}", first);
                sheet.read_rows(sheet_id, worksheet).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GateError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSheet {
        rows: Vec<String>,
    }

    #[async_trait]
    impl SheetPort for FixedSheet {
        async fn read_rows(&self, _sheet_id: &str, _worksheet: &str) -> Result<Vec<String>> {
            Ok(self.rows.clone())
        }
        async fn overwrite_rows(&self, _sheet_id: &str, _worksheet: &str, _rows: &[String]) -> Result<()> {
            Ok(())
        }
    }

    struct FailingSheet {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SheetPort for FailingSheet {
        async fn read_rows(&self, _sheet_id: &str, _worksheet: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GateError::Api {
                message: "sheet unreachable".to_string(),
            })
        }
        async fn overwrite_rows(&self, _sheet_id: &str, _worksheet: &str, _rows: &[String]) -> Result<()> {
            Ok(())
        }
    }

    fn sheet_config() -> SheetConfig {
        SheetConfig {
            sheet_id: "sheet-1".to_string(),
            worksheet: "Whitelist".to_string(),
            api_key: "test-key".to_string(),
        }
    }

    fn rows(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn member_is_allowed_case_insensitively() {
        let sheet = Arc::new(FixedSheet {
            rows: rows(&["username", "Alice", "bob"]),
        });
        let gate = AllowlistGate::new(sheet, sheet_config());
        assert!(gate.is_allowed("alice").await);
        assert!(gate.is_allowed("BOB").await);
        assert!(!gate.is_allowed("mallory").await);
    }

    #[tokio::test]
    async fn header_row_is_not_a_member() {
        let sheet = Arc::new(FixedSheet {
            rows: rows(&["username", "alice"]),
        });
        let gate = AllowlistGate::new(sheet, sheet_config());
        assert!(!gate.is_allowed("username").await);
    }

    #[tokio::test]
    async fn lookup_failure_denies_after_one_retry() {
        let sheet = Arc::new(FailingSheet {
            calls: AtomicUsize::new(0),
        });
        let gate = AllowlistGate::new(sheet.clone(), sheet_config());
        assert!(!gate.is_allowed("alice").await);
        assert_eq!(sheet.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unconfigured_gate_allows_everyone() {
        let gate = AllowlistGate::disabled();
        assert!(gate.is_allowed("anyone").await);
    }
}
