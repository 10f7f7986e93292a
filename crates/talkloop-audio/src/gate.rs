//! Audio gate — marks spans of synthesized-voice playback so downstream
//! analysis can discard microphone time that may contain the device's own
//! voice.

use talkloop_core::types::{AudioGateMeta, DroppedSegment};
use tracing::debug;

/// Tracks open/closed gating state and accumulates [`DroppedSegment`]s.
///
/// The accumulator invariant holds at all times:
/// `dropped_total_ms == sum(segment.dropped_ms)`.
#[derive(Debug)]
pub struct AudioGate {
    meta: AudioGateMeta,
    open_since_ms: Option<u64>,
    /// Bumped on every open; lets a fail-safe timer close only the span it
    /// was armed for.
    open_token: u64,
}

impl AudioGate {
    pub fn new(client_start_epoch_ms: i64) -> Self {
        Self {
            meta: AudioGateMeta {
                client_start_epoch_ms,
                ..AudioGateMeta::default()
            },
            open_since_ms: None,
            open_token: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_since_ms.is_some()
    }

    /// Open the gate at `now_ms` (elapsed session time) and return a token
    /// identifying this span. When the gate is already open the existing
    /// span's token is returned unchanged.
    pub fn open(&mut self, now_ms: u64) -> u64 {
        if self.open_since_ms.is_none() {
            self.open_since_ms = Some(now_ms);
            self.open_token += 1;
            debug!(start_ms = now_ms, "Audio gate opened");
        }
        self.open_token
    }

    /// Close the gate, recording one dropped segment. Idempotent: closing an
    /// already-closed gate is a no-op and returns `None`.
    pub fn close(&mut self, now_ms: u64) -> Option<&DroppedSegment> {
        let start_ms = self.open_since_ms.take()?;
        let end_ms = now_ms.max(start_ms);
        let segment = DroppedSegment {
            start_ms,
            end_ms,
            dropped_ms: end_ms - start_ms,
        };
        debug!(
            start_ms,
            end_ms,
            dropped_ms = segment.dropped_ms,
            "Audio gate closed"
        );
        self.meta.dropped_total_ms += segment.dropped_ms;
        self.meta.segments.push(segment);
        self.meta.segments.last()
    }

    /// Close only if the gate is still open for the span identified by
    /// `token`. Used by the playback fail-safe timer.
    pub fn close_if(&mut self, token: u64, now_ms: u64) -> bool {
        if self.is_open() && self.open_token == token {
            self.close(now_ms);
            true
        } else {
            false
        }
    }

    pub fn meta(&self) -> &AudioGateMeta {
        &self.meta
    }

    /// Final snapshot handed to the upload path on session end.
    pub fn snapshot(&self) -> AudioGateMeta {
        self.meta.clone()
    }
}
