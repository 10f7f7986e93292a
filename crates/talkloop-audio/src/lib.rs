//! Audio-side building blocks: the gate that marks synthesized-voice spans,
//! session-long recording bookkeeping, and the two level meters.

pub mod gate;
pub mod meter;
pub mod recorder;
pub mod speaking;

pub use gate::AudioGate;
pub use meter::MicLevelMeter;
pub use recorder::{AudioTranscoder, SessionAudio, SessionRecorder};
pub use speaking::SpeakingLevelSynth;
