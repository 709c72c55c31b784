use crate::allowlist::AllowlistGate;
use crate::error::Result;
use crate::ingest::notify::WebhookNotifier;
use crate::ingest::ring::MessageRing;
use crate::ports::{ChatKind, IncomingEvent, MessengerPort};
use crate::store::{ArtifactRecord, ArtifactStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Listener lifecycle. `Evaluating` is entered per event and returns to
/// `Listening`; a transport failure drops back to `Stopped` until the
/// supervisor reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Connecting,
    Listening,
    Evaluating,
}

/// Outcome of pushing one attachment through the size check and the store.
#[derive(Debug)]
pub enum IngestOutcome {
    Stored(ArtifactRecord),
    Oversized,
    NoAttachment,
}

/// The media ingestion pipeline: consumes inbound events one at a time,
/// applies the allow-list gate and the size bound, persists qualifying
/// attachments, and keeps the recent-message ring current.
pub struct Ingestor {
    messenger: Arc<dyn MessengerPort>,
    gate: Arc<AllowlistGate>,
    store: Arc<ArtifactStore>,
    ring: Arc<MessageRing>,
    notifier: Option<WebhookNotifier>,
    max_file_size: u64,
    state: Mutex<ListenerState>,
}

impl Ingestor {
    pub fn new(
        messenger: Arc<dyn MessengerPort>,
        gate: Arc<AllowlistGate>,
        store: Arc<ArtifactStore>,
        ring: Arc<MessageRing>,
        notifier: Option<WebhookNotifier>,
        max_file_size: u64,
    ) -> Self {
        Self {
            messenger,
            gate,
            store,
            ring,
            notifier,
            max_file_size,
            state: Mutex::new(ListenerState::Stopped),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: ListenerState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            debug!("Listener state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Supervises the listening loop for the lifetime of the process:
    /// reconnects after transport failures with a fixed delay, stops cleanly
    /// when the shutdown signal fires.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.set_state(ListenerState::Connecting);
            match self.listen(&mut shutdown).await {
                Ok(()) => {
                    self.set_state(ListenerState::Stopped);
                    info!("Listener stopped");
                    return;
                }
                Err(e) => {
                    self.set_state(ListenerState::Stopped);
                    error!("Message stream failed: {}; reconnecting in {:?}", e, RECONNECT_DELAY);
                }
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    // A closed channel means the sender is gone and no
                    // shutdown signal can ever arrive; stop rather than spin.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Listener stopped");
                        return;
                    }
                }
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    // One listening session. Per-event failures are logged and swallowed;
    // only a transport-level poll error propagates and ends the session.
    async fn listen(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        self.set_state(ListenerState::Listening);
        loop {
            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                    continue;
                }
                batch = self.messenger.next_batch() => batch?,
            };
            for event in batch {
                self.ring.push(event.clone());
                self.set_state(ListenerState::Evaluating);
                if let Err(e) = self.process_event(&event).await {
                    warn!(
                        "Event {} in chat {} failed, skipping: {}",
                        event.message_id, event.chat_id, e
                    );
                }
                self.set_state(ListenerState::Listening);
            }
        }
    }

    /// Per-event decision: private chat with an attachment, sender allowed,
    /// size within bounds, then persist. Policy rejections are logged no-ops.
    pub async fn process_event(&self, event: &IncomingEvent) -> Result<()> {
        if event.chat_kind != ChatKind::Private || event.attachment.is_none() {
            return Ok(());
        }
        if !self.gate.is_allowed(&event.sender).await {
            return Ok(());
        }
        match self.ingest_attachment(event).await? {
            IngestOutcome::Stored(record) => {
                debug!("Ingested '{}' from chat {}", record.file_name, event.chat_id);
            }
            IngestOutcome::Oversized | IngestOutcome::NoAttachment => {}
        }
        Ok(())
    }

    /// Size-checks, downloads and persists one event's attachment, then fires
    /// the webhook. Does not consult the allow-list; callers gate first. Also
    /// the path behind ad-hoc `POST /download` requests.
    pub async fn ingest_attachment(&self, event: &IncomingEvent) -> Result<IngestOutcome> {
        let Some(attachment) = &event.attachment else {
            return Ok(IngestOutcome::NoAttachment);
        };

        if let Some(declared) = attachment.declared_size {
            if declared > self.max_file_size {
                info!(
                    "Rejecting oversized attachment '{}' ({} > {} bytes)",
                    attachment.file_name, declared, self.max_file_size
                );
                return Ok(IngestOutcome::Oversized);
            }
        }

        let ingest_id = Uuid::new_v4();
        let fetched = self.messenger.download_attachment(attachment).await?;

        // Some attachment kinds carry no declared size; the true length is
        // only known after download and must pass the same bound.
        if fetched.bytes.len() as u64 > self.max_file_size {
            info!(
                "Discarding oversized download '{}' ({} > {} bytes)",
                fetched.file_name,
                fetched.bytes.len(),
                self.max_file_size
            );
            return Ok(IngestOutcome::Oversized);
        }

        let record = self.store.put(
            &fetched.file_name,
            &fetched.bytes,
            &fetched.source_url,
            event.chat_id,
            &event.sender,
        )?;
        info!(
            ingest_id = %ingest_id,
            "Stored artifact '{}' ({} bytes) from '{}'",
            record.file_name, record.file_size, record.sender
        );

        if let Some(notifier) = &self.notifier {
            notifier.notify(&record).await;
        }
        Ok(IngestOutcome::Stored(record))
    }

    pub fn gate(&self) -> &AllowlistGate {
        &self.gate
    }
}
