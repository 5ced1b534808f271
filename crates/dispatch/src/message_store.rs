use std::sync::Mutex;
use std::time::SystemTime;

/// Severity of one stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Error,
}

/// One diagnostic record attached to a user query.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Chunk the message concerns, or -1 for query-level messages.
    pub chunk_id: i32,
    /// Numeric code (worker, session, or merge error code).
    pub code: i32,
    /// Message text.
    pub msg: String,
    /// Severity.
    pub severity: MessageSeverity,
    /// When the message was recorded.
    pub timestamp: SystemTime,
}

/// Ordered log of per-query diagnostics, surfaced to the caller when the
/// query finishes.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message.
    pub fn add(&self, chunk_id: i32, code: i32, msg: impl Into<String>, severity: MessageSeverity) {
        self.messages.lock().expect("message lock").push(StoredMessage {
            chunk_id,
            code,
            msg: msg.into(),
            severity,
            timestamp: SystemTime::now(),
        });
    }

    /// Snapshot all messages in insertion order.
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages.lock().expect("message lock").clone()
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.lock().expect("message lock").len()
    }

    /// Returns true when no messages are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let store = MessageStore::new();
        store.add(-1, 0, "starting", MessageSeverity::Info);
        store.add(12, 1105, "worker failed", MessageSeverity::Error);
        let msgs = store.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].msg, "starting");
        assert_eq!(msgs[1].chunk_id, 12);
        assert_eq!(msgs[1].severity, MessageSeverity::Error);
    }
}
