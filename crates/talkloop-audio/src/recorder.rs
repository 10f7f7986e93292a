//! Session-long microphone recording bookkeeping.
//!
//! The recorder runs once per session (not per turn). Chunks arriving while
//! the audio gate is open are suppressed here as a second line of defense on
//! top of the gate's pause/resume of the recording engine itself.

use tracing::{debug, warn};

/// The finalized session recording handed to the upload path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAudio {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Best-effort conversion of the recorded blob to a canonical container.
/// Returning `None` keeps the original container.
pub trait AudioTranscoder: Send + Sync {
    fn transcode(&self, data: &[u8], mime_type: &str) -> Option<SessionAudio>;
}

#[derive(Debug)]
pub struct SessionRecorder {
    chunks: Vec<Vec<u8>>,
    mime_type: String,
    recording: bool,
    suppressed_chunks: u32,
}

impl SessionRecorder {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            chunks: Vec::new(),
            mime_type: mime_type.into(),
            recording: false,
            suppressed_chunks: 0,
        }
    }

    pub fn start(&mut self) {
        self.chunks.clear();
        self.suppressed_chunks = 0;
        self.recording = true;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Append one timesliced chunk. Chunks received while the gate is open,
    /// or after the recorder is finished, are dropped.
    pub fn push_chunk(&mut self, data: Vec<u8>, gate_open: bool) {
        if !self.recording || data.is_empty() {
            return;
        }
        if gate_open {
            self.suppressed_chunks += 1;
            return;
        }
        self.chunks.push(data);
    }

    pub fn suppressed_chunks(&self) -> u32 {
        self.suppressed_chunks
    }

    /// Stop recording and concatenate all kept chunks into one blob,
    /// transcoding when a transcoder is available and succeeds.
    ///
    /// Returns `None` when nothing was captured.
    pub fn finish(&mut self, transcoder: Option<&dyn AudioTranscoder>) -> Option<SessionAudio> {
        self.recording = false;
        if self.chunks.is_empty() {
            debug!("Session recorder finished with no audio");
            return None;
        }

        let total: usize = self.chunks.iter().map(Vec::len).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in self.chunks.drain(..) {
            data.extend_from_slice(&chunk);
        }
        debug!(
            bytes = data.len(),
            suppressed = self.suppressed_chunks,
            "Session recording finalized"
        );

        if let Some(transcoder) = transcoder {
            if let Some(converted) = transcoder.transcode(&data, &self.mime_type) {
                return Some(converted);
            }
            warn!("Audio transcode unavailable, keeping original container");
        }

        Some(SessionAudio {
            data,
            mime_type: self.mime_type.clone(),
        })
    }
}
