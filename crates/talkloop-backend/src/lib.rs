//! Backend chat collaborator.
//!
//! The session engine depends only on the [`ChatBackend`] trait; the
//! concrete HTTP implementation lives in [`http`] so tests can substitute
//! fakes.

use async_trait::async_trait;

use talkloop_audio::SessionAudio;
use talkloop_core::protocol::{EndSessionRequest, TurnExchange, TurnMeta};
use talkloop_core::types::{AudioGateMeta, DialogState};

pub mod http;

pub use http::HttpChatBackend;

/// The turn-exchange contract consumed by the session controller.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a session and fetch the assistant's opening line.
    async fn start_session(
        &self,
        model_context: serde_json::Value,
        meta: TurnMeta,
    ) -> anyhow::Result<TurnExchange>;

    /// Exchange one turn. `transcript` is `None` for a no-speech follow-up.
    async fn send_turn(
        &self,
        transcript: Option<String>,
        model_context: serde_json::Value,
        dialog_state: Option<DialogState>,
        meta: TurnMeta,
    ) -> anyhow::Result<TurnExchange>;

    /// Notify the backend that the session ended.
    async fn end_session(&self, request: EndSessionRequest) -> anyhow::Result<()>;

    /// Upload the finalized session recording with its gate bookkeeping.
    async fn upload_session_audio(
        &self,
        session_id: &str,
        audio: SessionAudio,
        profile_id: &str,
        gate_meta: AudioGateMeta,
    ) -> anyhow::Result<()>;
}
