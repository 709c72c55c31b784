// Media ingestion: background listener, per-event evaluation, recent-message
// ring, and the webhook notifier.

pub mod listener;
pub mod notify;
pub mod ring;

pub use listener::{IngestOutcome, Ingestor, ListenerState};
pub use ring::{MessageRing, MessageSummary};
