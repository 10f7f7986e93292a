//! HTTP implementation of the [`ChatBackend`] contract.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use talkloop_audio::SessionAudio;
use talkloop_core::protocol::{EndSessionRequest, TurnExchange, TurnMeta};
use talkloop_core::types::{AudioGateMeta, DialogState};

use crate::ChatBackend;

#[derive(Debug, Serialize)]
struct StartSessionBody {
    model_context: serde_json::Value,
    meta: TurnMeta,
}

#[derive(Debug, Serialize)]
struct SendTurnBody {
    transcript: Option<String>,
    model_context: serde_json::Value,
    dialog_state: Option<DialogState>,
    meta: TurnMeta,
}

pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChatBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn post_exchange<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<TurnExchange> {
        let url = self.url(path);
        debug!(%url, "Backend chat request");

        let resp = self
            .authorize(self.client.post(&url).json(body))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Chat API error {status}: {text}");
        }

        Ok(resp.json::<TurnExchange>().await?)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn start_session(
        &self,
        model_context: serde_json::Value,
        meta: TurnMeta,
    ) -> anyhow::Result<TurnExchange> {
        self.post_exchange(
            "api/chat/session/start",
            &StartSessionBody {
                model_context,
                meta,
            },
        )
        .await
    }

    async fn send_turn(
        &self,
        transcript: Option<String>,
        model_context: serde_json::Value,
        dialog_state: Option<DialogState>,
        meta: TurnMeta,
    ) -> anyhow::Result<TurnExchange> {
        self.post_exchange(
            "api/chat/turn",
            &SendTurnBody {
                transcript,
                model_context,
                dialog_state,
                meta,
            },
        )
        .await
    }

    async fn end_session(&self, request: EndSessionRequest) -> anyhow::Result<()> {
        let url = self.url("api/chat/session/end");
        debug!(%url, reason = request.end_reason.as_str(), "Ending chat session");

        let resp = self
            .authorize(self.client.post(&url).json(&request))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Session end error {status}: {text}");
        }
        Ok(())
    }

    async fn upload_session_audio(
        &self,
        session_id: &str,
        audio: SessionAudio,
        profile_id: &str,
        gate_meta: AudioGateMeta,
    ) -> anyhow::Result<()> {
        let url = self.url("api/chat/session/audio");
        debug!(
            %url,
            session_id,
            bytes = audio.data.len(),
            dropped_ms = gate_meta.dropped_total_ms,
            "Uploading session audio"
        );

        let extension = extension_for_mime(&audio.mime_type);
        let part = reqwest::multipart::Part::bytes(audio.data)
            .file_name(format!("session.{extension}"))
            .mime_str(&audio.mime_type)?;

        let form = reqwest::multipart::Form::new()
            .text("session_id", session_id.to_string())
            .text("profile_id", profile_id.to_string())
            .text("audio_gate_meta", serde_json::to_string(&gate_meta)?)
            .part("file", part);

        let resp = self
            .authorize(self.client.post(&url).multipart(form))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Audio upload error {status}: {text}");
        }
        Ok(())
    }
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/mp4" => "m4a",
        _ => "webm",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talkloop_core::config::SessionTiming;
    use talkloop_core::session::Session;

    #[test]
    fn url_joining_handles_slashes() {
        let backend = HttpChatBackend::new("http://localhost:8787/", None);
        assert_eq!(
            backend.url("/api/chat/turn"),
            "http://localhost:8787/api/chat/turn"
        );
        assert_eq!(
            backend.url("api/chat/session/start"),
            "http://localhost:8787/api/chat/session/start"
        );
    }

    #[test]
    fn turn_body_serializes_expected_shape() {
        let session = Session::new("profile-1", 1);
        let meta = TurnMeta::build(
            &session,
            &SessionTiming::default(),
            12,
            "talk",
            "voice_client",
            None,
        );
        let body = SendTurnBody {
            transcript: Some("안녕하세요".into()),
            model_context: serde_json::json!({"persona": "tutor"}),
            dialog_state: None,
            meta,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["transcript"], "안녕하세요");
        assert_eq!(json["meta"]["elapsed_sec"], 12);
        assert!(json["dialog_state"].is_null());
    }

    #[test]
    fn mime_extension_mapping() {
        assert_eq!(extension_for_mime("audio/wav"), "wav");
        assert_eq!(extension_for_mime("audio/webm;codecs=opus"), "webm");
    }
}
