//! Session event types

use chatline_client::{ConversationSummary, Message};
use serde::{Deserialize, Serialize};

/// Events emitted as the session changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A conversation replaced the transcript
    ConversationLoaded {
        conversation_id: String,
        message_count: usize,
    },

    /// The open conversation was closed
    ConversationCleared,

    /// Optimistic user message and placeholder were appended
    SubmitStarted {
        user_message: Message,
        placeholder: Message,
    },

    /// A fragment was appended to the placeholder
    StreamDelta { message_id: String, fragment: String },

    /// The backend accepted the attachment upload
    AttachmentUploaded {
        message_id: String,
        server_path: String,
    },

    /// The placeholder completed
    MessageCompleted { message: Message },

    /// The placeholder failed
    MessageFailed { message: Message, reason: String },

    /// The transcript was replaced by the server's copy after a send
    Reconciled {
        conversation_id: String,
        message_count: usize,
    },

    /// The conversation list was refreshed
    ConversationsRefreshed {
        conversations: Vec<ConversationSummary>,
    },

    /// Error outside of a stream (e.g. a failed fetch)
    Error { message: String },
}

impl SessionEvent {
    /// Whether this event ends a send
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::MessageCompleted { .. }
                | SessionEvent::MessageFailed { .. }
                | SessionEvent::Reconciled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = SessionEvent::StreamDelta {
            message_id: "temp-1".into(),
            fragment: "Hi".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream_delta");
        assert_eq!(json["fragment"], "Hi");
    }

    #[test]
    fn test_terminal_events() {
        let placeholder = Message::assistant_placeholder();
        assert!(SessionEvent::MessageCompleted {
            message: placeholder.clone()
        }
        .is_terminal());
        assert!(SessionEvent::MessageFailed {
            message: placeholder,
            reason: "boom".into()
        }
        .is_terminal());
        assert!(!SessionEvent::ConversationCleared.is_terminal());
        assert!(!SessionEvent::Error {
            message: "x".into()
        }
        .is_terminal());
    }
}
