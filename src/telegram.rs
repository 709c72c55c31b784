use crate::error::{GateError, Result};
use crate::ports::{AttachmentRef, ChatKind, FetchedAttachment, IncomingEvent, MessengerPort};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.telegram.org";

/// Bot-API backed implementation of [`MessengerPort`]: long-polls `getUpdates`
/// for inbound events and resolves attachment bytes via `getFile`.
pub struct TelegramMessenger {
    client: reqwest::Client,
    token: String,
    poll_timeout: Duration,
    http_timeout: Duration,
    /// Next `getUpdates` offset; advanced past every update we have consumed.
    offset: AtomicI64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUpdate {
    update_id: i64,
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    date: i64,
    chat: WireChat,
    from: Option<WireUser>,
    text: Option<String>,
    caption: Option<String>,
    document: Option<WireDocument>,
    photo: Option<Vec<WirePhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    file_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WirePhotoSize {
    file_id: String,
    file_unique_id: String,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChatMember {
    user: WireUser,
}

impl TelegramMessenger {
    pub fn new(token: String, http_timeout: Duration, poll_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Self {
            client,
            token,
            poll_timeout,
            http_timeout,
            offset: AtomicI64::new(0),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T> {
        let resp = self
            .client
            .get(self.method_url(method))
            .query(query)
            .timeout(timeout)
            .send()
            .await?;
        let body: ApiResponse<T> = resp.json().await?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(GateError::Api {
                message: body
                    .description
                    .unwrap_or_else(|| format!("{} returned no result", method)),
            }),
        }
    }

    fn map_event(msg: WireMessage) -> IncomingEvent {
        let chat_kind = match msg.chat.kind.as_str() {
            "private" => ChatKind::Private,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Group,
        };
        let sender = msg
            .from
            .as_ref()
            .map(|u| u.username.clone().unwrap_or_else(|| u.id.to_string()))
            .unwrap_or_default();
        let attachment = if let Some(doc) = msg.document {
            Some(AttachmentRef {
                file_name: doc.file_name.unwrap_or_default(),
                mime_type: doc.mime_type,
                declared_size: doc.file_size,
                file_id: doc.file_id,
            })
        } else {
            // Photos arrive as a list of renditions; the last entry is the
            // largest one.
            msg.photo.and_then(|sizes| sizes.into_iter().last()).map(|p| AttachmentRef {
                file_name: format!("photo_{}.jpg", p.file_unique_id),
                mime_type: Some("image/jpeg".to_string()),
                declared_size: p.file_size,
                file_id: p.file_id,
            })
        };
        IncomingEvent {
            chat_id: msg.chat.id,
            chat_kind,
            sender,
            message_id: msg.message_id,
            text: msg.text.or(msg.caption).unwrap_or_default(),
            attachment,
            received_at: Utc
                .timestamp_opt(msg.date, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
impl MessengerPort for TelegramMessenger {
    async fn next_batch(&self) -> Result<Vec<IncomingEvent>> {
        let offset = self.offset.load(Ordering::SeqCst);
        // The long poll holds the connection open for up to poll_timeout; give
        // the HTTP client that long plus the normal request margin.
        let updates: Vec<WireUpdate> = self
            .call(
                "getUpdates",
                &[
                    ("timeout", self.poll_timeout.as_secs().to_string()),
                    ("offset", offset.to_string()),
                    ("allowed_updates", "[\"message\"]".to_string()),
                ],
                self.poll_timeout + self.http_timeout,
            )
            .await?;

        let mut events = Vec::new();
        for update in updates {
            if update.update_id >= self.offset.load(Ordering::SeqCst) {
                self.offset.store(update.update_id + 1, Ordering::SeqCst);
            }
            if let Some(msg) = update.message {
                events.push(Self::map_event(msg));
            }
        }
        debug!("Polled {} inbound event(s)", events.len());
        Ok(events)
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<FetchedAttachment> {
        let file: WireFile = self
            .call(
                "getFile",
                &[("file_id", attachment.file_id.clone())],
                self.http_timeout,
            )
            .await?;
        let file_path = file.file_path.ok_or_else(|| GateError::Api {
            message: format!("getFile returned no path for '{}'", attachment.file_id),
        })?;

        let source_url = format!("{}/file/bot{}/{}", API_BASE, self.token, file_path);
        let resp = self.client.get(&source_url).send().await?;
        if !resp.status().is_success() {
            return Err(GateError::Api {
                message: format!("attachment fetch failed with status {}", resp.status()),
            });
        }
        let bytes = resp.bytes().await?.to_vec();

        // The transport-assigned name wins; fall back to the storage path's
        // basename for attachments that never carried one.
        let file_name = if attachment.file_name.is_empty() {
            file_path
                .rsplit('/')
                .next()
                .unwrap_or(&file_path)
                .to_string()
        } else {
            attachment.file_name.clone()
        };

        Ok(FetchedAttachment {
            bytes,
            file_name,
            source_url,
        })
    }

    async fn chat_members(&self, chat_id: i64) -> Result<Vec<String>> {
        // The bot API only enumerates administrators; full member listings are
        // not exposed to bots.
        let members: Vec<WireChatMember> = self
            .call(
                "getChatAdministrators",
                &[("chat_id", chat_id.to_string())],
                self.http_timeout,
            )
            .await?;
        Ok(members
            .into_iter()
            .map(|m| m.user.username.unwrap_or_else(|| m.user.id.to_string()))
            .collect())
    }
}
