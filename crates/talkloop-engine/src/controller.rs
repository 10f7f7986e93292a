//! Session controller — owns the half-duplex turn loop, the audio gate,
//! the session recorder, and the level meters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use talkloop_audio::recorder::AudioTranscoder;
use talkloop_audio::{AudioGate, MicLevelMeter, SessionRecorder, SpeakingLevelSynth};
use talkloop_backend::ChatBackend;
use talkloop_core::config::{Config, MeterTuning, PlaybackTuning, SessionTiming};
use talkloop_core::protocol::{EndSessionRequest, SttEvent, TurnMeta};
use talkloop_core::session::{EndReason, Session};
use talkloop_core::types::{ChatMessage, DialogState, VoiceActivity};
use talkloop_core::{Result, TalkloopError};

use crate::capture::{CaptureOutcome, SpeechCaptureEngine};
use crate::lifecycle::{Lifecycle, LifecycleControl};
use crate::{AudioRecorderPort, LevelSourcePort, SpeechCapturePort, SpeechPlaybackPort};

/// Spoken when the backend returns an empty reply, so the turn-taking
/// rhythm never stalls on silence.
const FALLBACK_LINE: &str = "미안해요, 잠깐 놓쳤어요. 다시 한번 말해 줄래요?";

/// Where the session currently is in the turn cycle. Half-duplex: the
/// microphone listens only in `Listening`, the voice plays only in
/// `Speaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Processing => "processing",
            TurnState::Speaking => "speaking",
        }
    }
}

/// What a finished session looked like.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub end_reason: EndReason,
    pub turn_count: u32,
    pub elapsed_sec: u64,
    pub dropped_total_ms: u64,
}

/// The platform audio surfaces the controller drives.
pub struct EnginePorts {
    pub capture: Arc<dyn SpeechCapturePort>,
    pub playback: Arc<dyn SpeechPlaybackPort>,
    pub recorder: Arc<dyn AudioRecorderPort>,
    pub level_source: Arc<dyn LevelSourcePort>,
}

/// Cloneable handle for stopping or resetting the active session from
/// outside the run loop. Safe to call at any time; requests landing after
/// the session ended are ignored.
#[derive(Clone)]
pub struct SessionHandle {
    control_slot: Arc<Mutex<Option<LifecycleControl>>>,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.request(EndReason::ManualStop);
    }

    pub fn reset(&self) {
        self.request(EndReason::Reset);
    }

    pub fn is_active(&self) -> bool {
        self.control_slot
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(LifecycleControl::is_current)
    }

    fn request(&self, reason: EndReason) {
        if let Some(control) = self.control_slot.lock().unwrap().as_ref() {
            control.request_stop(reason);
        }
    }
}

/// Runs one conversation session from opening line to upload.
pub struct SessionController {
    capture: SpeechCaptureEngine,
    playback: Arc<dyn SpeechPlaybackPort>,
    recorder_port: Arc<dyn AudioRecorderPort>,
    level_source: Arc<dyn LevelSourcePort>,
    backend: Arc<dyn ChatBackend>,
    transcoder: Option<Arc<dyn AudioTranscoder>>,

    timing: SessionTiming,
    playback_tuning: PlaybackTuning,
    meter_tuning: MeterTuning,
    recorder_timeslice_ms: u64,
    session_mode: String,
    source: String,
    model_context: serde_json::Value,
    profile_id: String,

    current_generation: Arc<AtomicU64>,
    messages: Vec<ChatMessage>,
    state_tx: watch::Sender<TurnState>,
    level_tx: watch::Sender<VoiceActivity>,
    control_slot: Arc<Mutex<Option<LifecycleControl>>>,
}

impl SessionController {
    pub fn new(
        ports: EnginePorts,
        backend: Arc<dyn ChatBackend>,
        config: &Config,
        profile_id: impl Into<String>,
    ) -> Self {
        let (state_tx, _) = watch::channel(TurnState::Idle);
        let (level_tx, _) = watch::channel(VoiceActivity::default());
        Self {
            capture: SpeechCaptureEngine::new(ports.capture, config.capture_tuning()),
            playback: ports.playback,
            recorder_port: ports.recorder,
            level_source: ports.level_source,
            backend,
            transcoder: None,
            timing: config.timing(),
            playback_tuning: config.playback_tuning(),
            meter_tuning: config.meter_tuning(),
            recorder_timeslice_ms: config.recorder_timeslice_ms(),
            session_mode: config.session_mode(),
            source: config.source(),
            model_context: serde_json::Value::Null,
            profile_id: profile_id.into(),
            current_generation: Arc::new(AtomicU64::new(0)),
            messages: Vec::new(),
            state_tx,
            level_tx,
            control_slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Context forwarded verbatim to the backend with every request
    /// (persona, scenario, learner profile).
    pub fn set_model_context(&mut self, context: serde_json::Value) {
        self.model_context = context;
    }

    pub fn set_transcoder(&mut self, transcoder: Arc<dyn AudioTranscoder>) {
        self.transcoder = Some(transcoder);
    }

    /// Watch the turn state, e.g. to drive an orb renderer.
    pub fn state_watch(&self) -> watch::Receiver<TurnState> {
        self.state_tx.subscribe()
    }

    /// Watch the presentation-level voice activity signal.
    pub fn level_watch(&self) -> watch::Receiver<VoiceActivity> {
        self.level_tx.subscribe()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            control_slot: self.control_slot.clone(),
        }
    }

    /// Conversation log of the most recent session. Cleared when a new
    /// session starts and when a session ends by reset.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn set_state(&self, state: TurnState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = previous.as_str(), to = state.as_str(), "Turn state");
        }
    }

    /// Run one full session: opening line, turn loop, then teardown with
    /// the end notification and audio upload.
    pub async fn start_session(&mut self) -> Result<SessionSummary> {
        if !self.capture.is_supported() {
            return Err(TalkloopError::Capture(
                "speech recognition is not available on this device".into(),
            ));
        }
        if self.handle().is_active() {
            return Err(TalkloopError::Session("a session is already active".into()));
        }

        let lifecycle = Lifecycle::begin(self.timing, self.current_generation.clone());
        *self.control_slot.lock().unwrap() = Some(lifecycle.control());
        let mut session = Session::new(self.profile_id.clone(), lifecycle.generation());
        self.messages.clear();
        info!(
            session_id = %session.session_id,
            generation = session.generation,
            target_sec = self.timing.target_sec,
            "Session starting"
        );

        let gate = Arc::new(Mutex::new(AudioGate::new(Utc::now().timestamp_millis())));
        let cancel = lifecycle.cancel_token();
        let watchdog = lifecycle.spawn_hard_cutoff();
        let meter_task = self.spawn_meter_task(&lifecycle);

        let recorder = Arc::new(Mutex::new(SessionRecorder::new(
            self.recorder_port.mime_type(),
        )));
        recorder.lock().unwrap().start();
        let pump = match self.recorder_port.start(self.recorder_timeslice_ms).await {
            Ok(mut chunks) => {
                let recorder = recorder.clone();
                let gate = gate.clone();
                Some(tokio::spawn(async move {
                    while let Some(chunk) = chunks.recv().await {
                        let gated = gate.lock().unwrap().is_open();
                        recorder.lock().unwrap().push_chunk(chunk, gated);
                    }
                }))
            }
            Err(err) => {
                warn!(error = %err, "Session recorder unavailable, continuing without audio");
                None
            }
        };

        let mut dialog_state: Option<DialogState> = None;
        let mut close_after_reply = false;
        let mut soft_wrap_close = false;

        self.set_state(TurnState::Processing);
        let opening_meta = TurnMeta::build(
            &session,
            &self.timing,
            lifecycle.clock().elapsed_sec(),
            &self.session_mode,
            &self.source,
            None,
        );
        let mut exchange = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.backend.start_session(self.model_context.clone(), opening_meta) => {
                match result {
                    Ok(exchange) => Some(exchange),
                    Err(err) => {
                        warn!(error = %err, "Backend session start failed");
                        lifecycle.request_stop(EndReason::ManualStop);
                        None
                    }
                }
            }
        };

        while let Some(turn) = exchange.take() {
            if let Some(state) = turn.state {
                dialog_state = Some(state);
            }
            if let Some(meta) = &turn.meta {
                if meta.request_close {
                    let reason = meta
                        .closing_reason
                        .clone()
                        .unwrap_or_else(|| "remote_request".to_string());
                    session.request_close(reason);
                }
            }
            let line = if turn.response.trim().is_empty() {
                debug!("Backend reply was empty, speaking fallback line");
                FALLBACK_LINE.to_string()
            } else {
                turn.response
            };
            self.messages.push(ChatMessage::assistant(line.clone()));

            self.speak_reply(&lifecycle, &gate, &line).await;

            if cancel.is_cancelled() || session.close_pending() || close_after_reply {
                break;
            }

            self.set_state(TurnState::Listening);
            let outcome = match self.capture.capture_turn(&cancel).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(error = %err, "Speech capture failed, ending session");
                    lifecycle.request_stop(EndReason::ManualStop);
                    break;
                }
            };

            let (transcript, stt_event) = match outcome {
                CaptureOutcome::Committed(text) => {
                    self.messages.push(ChatMessage::user(text.clone()));
                    session.turn_index += 1;
                    (Some(text), SttEvent::Committed)
                }
                CaptureOutcome::NoSpeech => (None, SttEvent::NoSpeech),
                CaptureOutcome::Stopped => break,
            };

            self.set_state(TurnState::Processing);
            let elapsed = lifecycle.clock().elapsed_sec();
            let meta = TurnMeta::build(
                &session,
                &self.timing,
                elapsed,
                &self.session_mode,
                &self.source,
                Some(stt_event),
            );
            close_after_reply = meta.request_close;
            soft_wrap_close = close_after_reply && elapsed >= self.timing.soft_wrap_start_sec();

            exchange = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.backend.send_turn(
                    transcript,
                    self.model_context.clone(),
                    dialog_state.clone(),
                    meta,
                ) => {
                    match result {
                        Ok(exchange) => Some(exchange),
                        Err(err) => {
                            warn!(error = %err, "Backend turn failed, ending session");
                            lifecycle.request_stop(EndReason::ManualStop);
                            None
                        }
                    }
                }
            };
        }

        let end_reason = lifecycle.stop_reason().unwrap_or(if soft_wrap_close {
            EndReason::TargetReached
        } else {
            EndReason::ManualStop
        });

        self.set_state(TurnState::Idle);
        // Mark this generation stale before teardown, so deferred timers
        // and handles from this session can no longer act.
        self.current_generation.fetch_add(1, Ordering::SeqCst);
        cancel.cancel();
        watchdog.abort();

        self.playback.cancel().await;
        self.recorder_port.stop().await;

        let elapsed_sec = lifecycle.clock().elapsed_sec();
        gate.lock().unwrap().close(lifecycle.clock().elapsed_ms());
        let gate_meta = gate.lock().unwrap().snapshot();

        if let Some(pump) = pump {
            // Drain trailing recorder chunks, but never hang teardown.
            let _ = tokio::time::timeout(Duration::from_millis(250), pump).await;
        }
        let audio = recorder.lock().unwrap().finish(self.transcoder.as_deref());

        let end_request = EndSessionRequest {
            session_id: session.session_id.clone(),
            end_reason,
            elapsed_sec,
            turn_count: session.turn_index,
            session_mode: self.session_mode.clone(),
        };
        if let Err(err) = self.backend.end_session(end_request).await {
            warn!(error = %err, "Session end notification failed");
        }
        if let Some(audio) = audio {
            if let Err(err) = self
                .backend
                .upload_session_audio(
                    &session.session_id,
                    audio,
                    &self.profile_id,
                    gate_meta.clone(),
                )
                .await
            {
                warn!(error = %err, "Session audio upload failed");
            }
        }

        if end_reason == EndReason::Reset {
            self.messages.clear();
        }
        let _ = meter_task.await;
        *self.control_slot.lock().unwrap() = None;

        info!(
            session_id = %session.session_id,
            reason = end_reason.as_str(),
            turns = session.turn_index,
            elapsed_sec,
            dropped_ms = gate_meta.dropped_total_ms,
            "Session ended"
        );

        Ok(SessionSummary {
            session_id: session.session_id,
            end_reason,
            turn_count: session.turn_index,
            elapsed_sec,
            dropped_total_ms: gate_meta.dropped_total_ms,
        })
    }

    /// Play one assistant reply with the audio gate held open for the whole
    /// playback span. The fail-safe timer counts as the end of playback:
    /// if the engine never reports completion, playback is cancelled and
    /// the turn continues as if it had finished.
    async fn speak_reply(&self, lifecycle: &Lifecycle, gate: &Arc<Mutex<AudioGate>>, text: &str) {
        self.set_state(TurnState::Speaking);
        let clock = lifecycle.clock();
        let token = gate.lock().unwrap().open(clock.elapsed_ms());
        self.recorder_port.pause().await;

        let cancel = lifecycle.cancel_token();
        tokio::select! {
            _ = cancel.cancelled() => {
                self.playback.cancel().await;
            }
            result = self.playback.speak(text) => {
                if let Err(err) = result {
                    warn!(error = %err, "Speech playback failed");
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(self.playback_tuning.failsafe_ms)) => {
                warn!(
                    failsafe_ms = self.playback_tuning.failsafe_ms,
                    "Playback never reported completion, fail-safe ending the span"
                );
                self.playback.cancel().await;
            }
        }

        gate.lock().unwrap().close_if(token, clock.elapsed_ms());
        self.recorder_port.resume().await;
    }

    /// One metering task per session: the microphone meter while listening,
    /// the synthesized pulse while speaking, decay otherwise.
    fn spawn_meter_task(&self, lifecycle: &Lifecycle) -> JoinHandle<()> {
        let state_rx = self.state_tx.subscribe();
        let level_tx = self.level_tx.clone();
        let level_source = self.level_source.clone();
        let meter_tuning = self.meter_tuning;
        let tick_ms = self.playback_tuning.speaking_tick_ms;
        let cancel = lifecycle.cancel_token();

        tokio::spawn(async move {
            let mut meter = MicLevelMeter::new(meter_tuning);
            let mut synth = SpeakingLevelSynth::new(tick_ms);
            let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let state = *state_rx.borrow();
                let activity = match state {
                    TurnState::Listening => {
                        synth.set_active(false);
                        synth.tick();
                        if let Some(frame) = level_source.waveform() {
                            meter.push_frame(&frame);
                        }
                        meter.activity()
                    }
                    TurnState::Speaking => {
                        meter.reset();
                        synth.set_active(true);
                        VoiceActivity {
                            level: synth.tick(),
                            active: true,
                        }
                    }
                    TurnState::Processing | TurnState::Idle => {
                        meter.reset();
                        synth.set_active(false);
                        VoiceActivity {
                            level: synth.tick(),
                            active: false,
                        }
                    }
                };
                let _ = level_tx.send(activity);
            }
            let _ = level_tx.send(VoiceActivity::default());
        })
    }
}
