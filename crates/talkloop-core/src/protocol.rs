//! Wire protocol shared with the backend chat collaborator.

use serde::{Deserialize, Serialize};

use crate::config::SessionTiming;
use crate::session::{ConversationPhase, EndReason, Session, infer_phase};
use crate::types::DialogState;

/// How the user side of a turn was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttEvent {
    /// A buffered transcript was committed after the silence interval.
    Committed,
    /// Recognition retries were exhausted without speech; the turn is an
    /// empty follow-up so the assistant can re-prompt.
    NoSpeech,
}

/// Per-request metadata attached to every backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMeta {
    pub session_id: String,
    pub profile_id: String,
    pub session_mode: String,
    pub turn_index: u32,
    pub elapsed_sec: u64,
    pub remaining_sec: u64,
    pub target_sec: u64,
    pub hard_limit_sec: u64,
    pub should_wrap_up: bool,
    pub source: String,
    pub conversation_phase: ConversationPhase,
    pub request_close: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_event: Option<SttEvent>,
}

impl TurnMeta {
    /// Build the meta payload for the current moment of a session.
    ///
    /// `remaining_sec` is clamped at zero so that
    /// `remaining_sec + elapsed_sec == target_sec` holds whenever
    /// `elapsed_sec <= target_sec`.
    pub fn build(
        session: &Session,
        timing: &SessionTiming,
        elapsed_sec: u64,
        session_mode: &str,
        source: &str,
        stt_event: Option<SttEvent>,
    ) -> Self {
        let in_soft_wrap = elapsed_sec >= timing.soft_wrap_start_sec();
        let request_close = in_soft_wrap || session.close_pending();
        let conversation_phase = if request_close {
            ConversationPhase::Closing
        } else {
            infer_phase(session.turn_index, elapsed_sec, timing)
        };

        Self {
            session_id: session.session_id.clone(),
            profile_id: session.profile_id.clone(),
            session_mode: session_mode.to_string(),
            turn_index: session.turn_index,
            elapsed_sec,
            remaining_sec: timing.target_sec.saturating_sub(elapsed_sec),
            target_sec: timing.target_sec,
            // The moment the watchdog actually force-stops the session.
            hard_limit_sec: timing.hard_cutoff_sec(),
            should_wrap_up: request_close,
            source: source.to_string(),
            conversation_phase,
            request_close,
            closing_reason: session.closing_reason.clone(),
            stt_event,
        }
    }
}

/// One backend round-trip result: the assistant reply plus opaque dialog
/// state to echo back and optional server-side directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnExchange {
    pub session_id: String,
    pub response: String,
    #[serde(default)]
    pub state: Option<DialogState>,
    #[serde(default)]
    pub meta: Option<ExchangeMeta>,
}

/// Directives the backend may attach to a reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeMeta {
    #[serde(default)]
    pub request_close: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_reason: Option<String>,
}

/// Body of the session-end notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndSessionRequest {
    pub session_id: String,
    pub end_reason: EndReason,
    pub elapsed_sec: u64,
    pub turn_count: u32,
    pub session_mode: String,
}
