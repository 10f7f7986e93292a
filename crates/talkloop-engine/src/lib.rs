//! The session engine: turn-taking state machine, speech capture loop, and
//! session lifecycle.
//!
//! Platform audio is reached only through the port traits below, so the
//! whole engine runs under test against scripted fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod capture;
pub mod controller;
pub mod lifecycle;

pub use capture::{CaptureOutcome, SpeechCaptureEngine};
pub use controller::{EnginePorts, SessionController, SessionHandle, SessionSummary, TurnState};
pub use lifecycle::{Lifecycle, LifecycleControl, SessionClock};

/// One event from a running speech-recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Interim hypothesis, replaced by the next event.
    Partial(String),
    /// Finalized result fragment, appended to the stable buffer.
    Final(String),
    /// The engine gave up without hearing speech.
    NoSpeech,
    /// Engine-level failure; the capture loop may restart.
    Error(String),
    /// The engine shut down on its own.
    Ended,
}

/// Speech-recognition engine. `start` hands back the event stream for one
/// engine run; the stream closing counts as [`CaptureEvent::Ended`].
#[async_trait]
pub trait SpeechCapturePort: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    async fn start(&self) -> anyhow::Result<mpsc::UnboundedReceiver<CaptureEvent>>;

    async fn stop(&self);
}

/// Text-to-speech playback. `speak` resolves when playback has finished,
/// not when synthesis was merely queued.
#[async_trait]
pub trait SpeechPlaybackPort: Send + Sync {
    async fn speak(&self, text: &str) -> anyhow::Result<()>;

    async fn cancel(&self);
}

/// Session-long microphone recording engine producing timesliced chunks.
#[async_trait]
pub trait AudioRecorderPort: Send + Sync {
    async fn start(&self, timeslice_ms: u64) -> anyhow::Result<mpsc::UnboundedReceiver<Vec<u8>>>;

    async fn stop(&self);

    async fn pause(&self);

    async fn resume(&self);

    fn mime_type(&self) -> &str;
}

/// Source of analyser waveform frames for the microphone level meter.
/// `None` means no frame is available right now.
pub trait LevelSourcePort: Send + Sync {
    fn waveform(&self) -> Option<Vec<f32>>;
}
