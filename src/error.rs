use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Messenger API error: {message}")]
    Api { message: String },
}

pub type Result<T> = std::result::Result<T, GateError>;
