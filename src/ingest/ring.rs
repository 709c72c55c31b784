use crate::ports::IncomingEvent;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded in-memory ring of recently seen messages. The bot-style transport
/// exposes no history fetch, so this ring backs both `GET /last_messages` and
/// ad-hoc `POST /download` lookups.
pub struct MessageRing {
    capacity: usize,
    inner: Mutex<VecDeque<IncomingEvent>>,
}

/// Summary shape returned by the façade.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub id: i64,
    pub text: String,
    pub has_media: bool,
}

impl MessageRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, event: IncomingEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() == self.capacity {
            inner.pop_front();
        }
        inner.push_back(event);
    }

    /// Looks up one previously seen message in a chat.
    pub fn find(&self, chat_id: i64, message_id: i64) -> Option<IncomingEvent> {
        let inner = self.inner.lock().unwrap();
        inner
            .iter()
            .rev()
            .find(|e| e.chat_id == chat_id && e.message_id == message_id)
            .cloned()
    }

    /// The most recent `limit` messages of a chat, oldest first.
    pub fn recent(&self, chat_id: i64, limit: usize) -> Vec<MessageSummary> {
        let inner = self.inner.lock().unwrap();
        let mut recent: Vec<MessageSummary> = inner
            .iter()
            .rev()
            .filter(|e| e.chat_id == chat_id)
            .take(limit)
            .map(|e| MessageSummary {
                id: e.message_id,
                text: e.text.clone(),
                has_media: e.has_media(),
            })
            .collect();
        recent.reverse();
        recent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ChatKind;
    use chrono::Utc;

    fn event(chat_id: i64, message_id: i64) -> IncomingEvent {
        IncomingEvent {
            chat_id,
            chat_kind: ChatKind::Private,
            sender: "alice".to_string(),
            message_id,
            text: format!("msg {}", message_id),
            attachment: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn ring_drops_oldest_beyond_capacity() {
        let ring = MessageRing::new(2);
        ring.push(event(1, 1));
        ring.push(event(1, 2));
        ring.push(event(1, 3));

        assert!(ring.find(1, 1).is_none());
        assert!(ring.find(1, 3).is_some());
    }

    #[test]
    fn recent_filters_by_chat_and_orders_oldest_first() {
        let ring = MessageRing::new(16);
        ring.push(event(1, 1));
        ring.push(event(2, 2));
        ring.push(event(1, 3));
        ring.push(event(1, 4));

        let summaries = ring.recent(1, 2);
        let ids: Vec<i64> = summaries.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
