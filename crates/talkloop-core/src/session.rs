//! Session model — identity, phase inference, and close bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionTiming;

/// Inferred stage of the conversation, derived from elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Opening,
    Warmup,
    Dialog,
    Closing,
}

impl ConversationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationPhase::Opening => "opening",
            ConversationPhase::Warmup => "warmup",
            ConversationPhase::Dialog => "dialog",
            ConversationPhase::Closing => "closing",
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ManualStop,
    TargetReached,
    Reset,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::ManualStop => "manual_stop",
            EndReason::TargetReached => "target_reached",
            EndReason::Reset => "reset",
        }
    }
}

/// Live state for one conversation session.
///
/// Exactly one session is active at a time; `generation` is the session
/// token — a monotonically increasing counter that invalidates deferred
/// callbacks from superseded or ended sessions.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque client-generated identity.
    pub session_id: String,
    pub profile_id: String,
    pub started_at: DateTime<Utc>,
    /// Incremented only on a committed user utterance, never on retries or
    /// no-speech follow-ups.
    pub turn_index: u32,
    pub phase: ConversationPhase,
    pub generation: u64,
    /// Set once a close has been requested, locally or by the backend.
    pub closing_reason: Option<String>,
}

impl Session {
    pub fn new(profile_id: impl Into<String>, generation: u64) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            profile_id: profile_id.into(),
            started_at: Utc::now(),
            turn_index: 0,
            phase: ConversationPhase::Opening,
            generation,
            closing_reason: None,
        }
    }

    /// A close has been requested and the session will end after the next
    /// reply is spoken.
    pub fn close_pending(&self) -> bool {
        self.closing_reason.is_some()
    }

    /// Record a close request. The first reason wins.
    pub fn request_close(&mut self, reason: impl Into<String>) {
        if self.closing_reason.is_none() {
            self.closing_reason = Some(reason.into());
        }
        self.phase = ConversationPhase::Closing;
    }
}

/// Infer the conversation phase from elapsed time.
///
/// The very first turn is always `opening`; the closing window dominates
/// the warmup boundary.
pub fn infer_phase(turn_index: u32, elapsed_sec: u64, timing: &SessionTiming) -> ConversationPhase {
    if turn_index == 0 {
        ConversationPhase::Opening
    } else if elapsed_sec >= timing.soft_wrap_start_sec() {
        ConversationPhase::Closing
    } else if elapsed_sec < timing.warmup_end_sec {
        ConversationPhase::Warmup
    } else {
        ConversationPhase::Dialog
    }
}
