use crate::error::{GateError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ARTIFACT_DIR: &str = "artifacts";
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration, read from the process environment (a `.env` file is
/// loaded first when present). Credentials are required and fail startup when
/// missing; the allow-list sheet and webhook are optional and degrade to
/// "gate disabled" / "no notification" respectively.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_id: i64,
    pub app_secret: String,
    pub port: u16,
    pub artifact_dir: PathBuf,
    /// Maximum attachment size in bytes; larger attachments are never persisted.
    pub max_file_size: u64,
    pub http_timeout: Duration,
    /// Long-poll duration requested from the message stream.
    pub poll_timeout: Duration,
    pub allowlist: Option<SheetConfig>,
    pub webhook_url: Option<String>,
}

/// Coordinates of the spreadsheet backing the sender allow-list.
#[derive(Debug, Clone)]
pub struct SheetConfig {
    pub sheet_id: String,
    pub worksheet: String,
    pub api_key: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let app_id: i64 = required("APP_ID")?
            .parse()
            .map_err(|_| GateError::Config("APP_ID must be a numeric application id".to_string()))?;
        let app_secret = required("APP_SECRET")?;

        let port = parsed_or("PORT", DEFAULT_PORT)?;
        let artifact_dir =
            PathBuf::from(env::var("ARTIFACT_DIR").unwrap_or_else(|_| DEFAULT_ARTIFACT_DIR.to_string()));
        let max_file_size_mb: u64 = parsed_or("MAX_FILE_SIZE_MB", DEFAULT_MAX_FILE_SIZE_MB)?;
        let http_timeout = Duration::from_secs(parsed_or("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?);
        let poll_timeout = Duration::from_secs(parsed_or("POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT_SECS)?);

        // The gate is only configured when both the sheet id and API key are
        // present; a partial configuration is rejected rather than silently
        // running with gating half-on.
        let allowlist = match (env::var("SHEET_ID").ok(), env::var("SHEETS_API_KEY").ok()) {
            (Some(sheet_id), Some(api_key)) => Some(SheetConfig {
                sheet_id,
                worksheet: env::var("SHEET_NAME").unwrap_or_else(|_| "Whitelist".to_string()),
                api_key,
            }),
            (None, None) => None,
            _ => {
                return Err(GateError::Config(
                    "SHEET_ID and SHEETS_API_KEY must be set together (or both left unset)".to_string(),
                ))
            }
        };

        let webhook_url = env::var("WEBHOOK_URL").ok().filter(|u| !u.is_empty());

        Ok(Config {
            app_id,
            app_secret,
            port,
            artifact_dir,
            max_file_size: max_file_size_mb * 1024 * 1024,
            http_timeout,
            poll_timeout,
            allowlist,
            webhook_url,
        })
    }

    /// Transport token in the `<app_id>:<secret>` form the bot API expects.
    pub fn bot_token(&self) -> String {
        format!("{}:{}", self.app_id, self.app_secret)
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| GateError::Config(format!("Missing required environment variable '{}'", name)))
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GateError::Config(format!("Invalid value for '{}': {}", name, raw))),
        Err(_) => Ok(default),
    }
}
