//! One listening turn: buffer recognition results, commit on silence,
//! discard fillers, and survive engine restarts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use talkloop_core::config::CaptureTuning;
use talkloop_core::{Result, TalkloopError};

use crate::{CaptureEvent, SpeechCapturePort};

/// How one listening turn concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The silence interval elapsed with buffered speech.
    Committed(String),
    /// Recognition retries were exhausted without usable speech.
    NoSpeech,
    /// The session was cancelled while listening.
    Stopped,
}

/// Drives the capture port through one listening turn at a time.
pub struct SpeechCaptureEngine {
    port: std::sync::Arc<dyn SpeechCapturePort>,
    tuning: CaptureTuning,
}

impl SpeechCaptureEngine {
    pub fn new(port: std::sync::Arc<dyn SpeechCapturePort>, tuning: CaptureTuning) -> Self {
        Self { port, tuning }
    }

    pub fn is_supported(&self) -> bool {
        self.port.is_supported()
    }

    /// Listen for one user turn.
    ///
    /// The silence deadline is re-armed on every recognition result; when it
    /// fires, the buffered transcript is committed unless it is empty or a
    /// single filler token, in which case listening silently resumes. The
    /// stable buffer survives engine restarts within the turn, so speech
    /// already finalized before a hiccup is never lost.
    pub async fn capture_turn(&self, cancel: &CancellationToken) -> Result<CaptureOutcome> {
        let silence = Duration::from_millis(self.tuning.silence_commit_ms);
        let restart_delay = Duration::from_millis(self.tuning.restart_delay_ms);

        let mut stable = String::new();
        let mut restarts: u32 = 0;
        let mut no_speech_retries: u32 = 0;

        'cycle: loop {
            if cancel.is_cancelled() {
                return Ok(CaptureOutcome::Stopped);
            }

            let mut events = self
                .port
                .start()
                .await
                .map_err(|e| TalkloopError::Capture(e.to_string()))?;
            let mut interim = String::new();
            let mut deadline: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.port.stop().await;
                        return Ok(CaptureOutcome::Stopped);
                    }
                    _ = async {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        self.port.stop().await;
                        let transcript = join_transcript(&stable, &interim);
                        if is_filler(&transcript, &self.tuning.filler_stoplist) {
                            debug!(text = %transcript, "Discarding filler utterance");
                            stable.clear();
                            continue 'cycle;
                        }
                        debug!(chars = transcript.chars().count(), "Silence commit");
                        return Ok(CaptureOutcome::Committed(transcript));
                    }
                    event = events.recv() => match event {
                        Some(CaptureEvent::Partial(text)) => {
                            interim = text;
                            deadline = Some(tokio::time::Instant::now() + silence);
                        }
                        Some(CaptureEvent::Final(text)) => {
                            let text = text.trim();
                            if !text.is_empty() {
                                if !stable.is_empty() {
                                    stable.push(' ');
                                }
                                stable.push_str(text);
                            }
                            interim.clear();
                            deadline = Some(tokio::time::Instant::now() + silence);
                        }
                        Some(CaptureEvent::NoSpeech) => {
                            self.port.stop().await;
                            no_speech_retries += 1;
                            if no_speech_retries > self.tuning.no_speech_retry_limit {
                                debug!(retries = no_speech_retries, "No speech, giving up this turn");
                                return Ok(CaptureOutcome::NoSpeech);
                            }
                            debug!(retry = no_speech_retries, "No speech, restarting recognition");
                            tokio::time::sleep(restart_delay).await;
                            continue 'cycle;
                        }
                        Some(CaptureEvent::Error(message)) => {
                            self.port.stop().await;
                            restarts += 1;
                            if restarts > self.tuning.restart_limit {
                                return Err(TalkloopError::Capture(format!(
                                    "recognition failed after {restarts} restarts: {message}"
                                )));
                            }
                            warn!(%message, restart = restarts, "Recognition error, restarting");
                            tokio::time::sleep(restart_delay).await;
                            continue 'cycle;
                        }
                        Some(CaptureEvent::Ended) | None => {
                            self.port.stop().await;
                            restarts += 1;
                            if restarts > self.tuning.restart_limit {
                                return Err(TalkloopError::Capture(format!(
                                    "recognition ended {restarts} times within one turn"
                                )));
                            }
                            debug!(restart = restarts, "Recognition ended early, restarting");
                            tokio::time::sleep(restart_delay).await;
                            continue 'cycle;
                        }
                    }
                }
            }
        }
    }
}

fn join_transcript(stable: &str, interim: &str) -> String {
    let mut out = stable.trim().to_string();
    let interim = interim.trim();
    if !interim.is_empty() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(interim);
    }
    out
}

/// An utterance is a filler when it is empty or a single token found in the
/// stoplist (ignoring trailing punctuation).
fn is_filler(transcript: &str, stoplist: &[String]) -> bool {
    let trimmed = transcript.trim();
    if trimmed.is_empty() {
        return true;
    }
    let mut tokens = trimmed.split_whitespace();
    let first = tokens.next().unwrap_or_default();
    if tokens.next().is_some() {
        return false;
    }
    let word = first.trim_matches(|c: char| c.is_ascii_punctuation());
    stoplist.iter().any(|s| s == word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Plays back one scripted event sequence per `start` call, then keeps
    /// the stream open so silence deadlines can fire.
    struct ScriptedPort {
        scripts: Mutex<VecDeque<Vec<(u64, CaptureEvent)>>>,
        starts: Mutex<u32>,
    }

    impl ScriptedPort {
        fn new(scripts: Vec<Vec<(u64, CaptureEvent)>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                starts: Mutex::new(0),
            })
        }

        fn starts(&self) -> u32 {
            *self.starts.lock().unwrap()
        }
    }

    #[async_trait]
    impl SpeechCapturePort for ScriptedPort {
        async fn start(&self) -> anyhow::Result<mpsc::UnboundedReceiver<CaptureEvent>> {
            *self.starts.lock().unwrap() += 1;
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                for (delay_ms, event) in script {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                // Keep the stream open; the engine decides when to stop.
                std::future::pending::<()>().await;
            });
            Ok(rx)
        }

        async fn stop(&self) {}
    }

    fn engine(port: Arc<ScriptedPort>) -> SpeechCaptureEngine {
        SpeechCaptureEngine::new(port, CaptureTuning::default())
    }

    #[tokio::test(start_paused = true)]
    async fn commits_buffered_speech_after_silence() {
        let port = ScriptedPort::new(vec![vec![
            (50, CaptureEvent::Partial("오늘".into())),
            (100, CaptureEvent::Final("오늘 날씨가".into())),
            (80, CaptureEvent::Final("좋네요".into())),
        ]]);
        let outcome = engine(port)
            .capture_turn(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::Committed("오늘 날씨가 좋네요".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interim_text_joins_the_commit() {
        let port = ScriptedPort::new(vec![vec![
            (50, CaptureEvent::Final("저는".into())),
            (60, CaptureEvent::Partial("학생이에요".into())),
        ]]);
        let outcome = engine(port)
            .capture_turn(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Committed("저는 학생이에요".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn filler_utterance_resumes_listening() {
        let port = ScriptedPort::new(vec![
            vec![(50, CaptureEvent::Final("음".into()))],
            vec![(50, CaptureEvent::Final("네 좋아요".into()))],
        ]);
        let outcome = engine(port.clone())
            .capture_turn(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Committed("네 좋아요".into()));
        assert_eq!(port.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_speech_promotes_after_retry_limit() {
        // Default retry limit is 2, so the third no-speech promotes.
        let port = ScriptedPort::new(vec![
            vec![(50, CaptureEvent::NoSpeech)],
            vec![(50, CaptureEvent::NoSpeech)],
            vec![(50, CaptureEvent::NoSpeech)],
        ]);
        let outcome = engine(port.clone())
            .capture_turn(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::NoSpeech);
        assert_eq!(port.starts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stable_buffer_survives_engine_restart() {
        let port = ScriptedPort::new(vec![
            vec![
                (50, CaptureEvent::Final("처음 말한".into())),
                (60, CaptureEvent::Ended),
            ],
            vec![(50, CaptureEvent::Final("내용이에요".into()))],
        ]);
        let outcome = engine(port)
            .capture_turn(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::Committed("처음 말한 내용이에요".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_errors_exhaust_restart_limit() {
        let scripts = (0..5)
            .map(|_| vec![(10, CaptureEvent::Error("mic lost".into()))])
            .collect();
        let result = engine(ScriptedPort::new(scripts))
            .capture_turn(&CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TalkloopError::Capture(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_turn() {
        let port = ScriptedPort::new(vec![vec![]]);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });
        let outcome = engine(port).capture_turn(&cancel).await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Stopped);
    }

    #[test]
    fn filler_detection() {
        let stoplist = CaptureTuning::default().filler_stoplist;
        assert!(is_filler("", &stoplist));
        assert!(is_filler("  ", &stoplist));
        assert!(is_filler("음", &stoplist));
        assert!(is_filler("um...", &stoplist));
        assert!(!is_filler("음 그러니까요", &stoplist));
        assert!(!is_filler("안녕하세요", &stoplist));
    }
}
