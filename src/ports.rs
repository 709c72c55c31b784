use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Delivery channel of an inbound message. Only `Private` chats qualify for
/// automatic ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

/// Descriptor of an attachment as reported by the message stream, before any
/// bytes are fetched.
#[derive(Debug, Clone)]
pub struct AttachmentRef {
    pub file_id: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    /// Size advertised by the transport; not all attachment kinds carry one.
    pub declared_size: Option<u64>,
}

/// One inbound message event.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    /// Sender identity: username when available, numeric id otherwise.
    pub sender: String,
    pub message_id: i64,
    pub text: String,
    pub attachment: Option<AttachmentRef>,
    pub received_at: DateTime<Utc>,
}

impl IncomingEvent {
    pub fn has_media(&self) -> bool {
        self.attachment.is_some()
    }
}

/// Downloaded attachment bytes plus the name and URL the transport assigned.
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub source_url: String,
}

/// Seam to the instant-messaging transport. Session, auth and wire mechanics
/// live behind this trait; the pipeline only consumes events and bytes.
#[async_trait]
pub trait MessengerPort: Send + Sync {
    /// Long-poll the next batch of inbound events, in arrival order. An empty
    /// batch is a normal poll timeout, not an error.
    async fn next_batch(&self) -> Result<Vec<IncomingEvent>>;

    /// Fetch the attachment bytes for a previously seen descriptor.
    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<FetchedAttachment>;

    /// Enumerate member identities of a chat (for allow-list maintenance).
    async fn chat_members(&self, chat_id: i64) -> Result<Vec<String>>;
}

/// Seam to the tabular store backing the allow-list.
#[async_trait]
pub trait SheetPort: Send + Sync {
    /// Read the first column of a worksheet, header row included.
    async fn read_rows(&self, sheet_id: &str, worksheet: &str) -> Result<Vec<String>>;

    /// Replace the worksheet's first column with the given rows.
    async fn overwrite_rows(&self, sheet_id: &str, worksheet: &str, rows: &[String]) -> Result<()>;
}
