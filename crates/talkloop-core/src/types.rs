//! Shared data types for the conversation session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the in-memory conversation log. Append-only; cleared on reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Opaque dialog state returned by the backend and echoed back verbatim on
/// the next turn. The client never interprets its contents.
pub type DialogState = serde_json::Value;

/// A span of session time during which synthesized speech was playing and
/// the microphone capture must therefore be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedSegment {
    /// Span start, milliseconds since session start.
    pub start_ms: u64,
    /// Span end, milliseconds since session start.
    pub end_ms: u64,
    pub dropped_ms: u64,
}

/// Accumulated audio-gate bookkeeping for one session. Pure accumulator —
/// segments are appended in order and never mutated retroactively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioGateMeta {
    pub segments: Vec<DroppedSegment>,
    pub dropped_total_ms: u64,
    /// Wall-clock anchor (unix epoch ms) for the session's t=0.
    pub client_start_epoch_ms: i64,
}

/// Presentation-only voice activity signal. `level` is bounded to [0, 1];
/// `active` is a threshold on `level`. No other invariants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceActivity {
    pub level: f32,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors_set_role() {
        let user = ChatMessage::user("hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "hello");

        let assistant = ChatMessage::assistant("hi");
        assert_eq!(assistant.role, Role::Assistant);
        assert!(!assistant.id.is_empty());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn gate_meta_default_is_empty() {
        let meta = AudioGateMeta::default();
        assert!(meta.segments.is_empty());
        assert_eq!(meta.dropped_total_ms, 0);
    }
}
