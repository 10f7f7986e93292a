//! Microphone level metering — RMS over analyser frames with a sensitivity
//! curve, silence floor, and exponential smoothing.

use talkloop_core::config::MeterTuning;
use talkloop_core::types::VoiceActivity;

/// Compute RMS energy of a waveform frame (samples in `[-1, 1]`).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|&s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Smoothed 0..1 microphone activity level.
///
/// Fed one analyser frame per animation tick while the session is
/// listening; the output drives visual feedback only.
#[derive(Debug)]
pub struct MicLevelMeter {
    tuning: MeterTuning,
    level: f32,
}

impl MicLevelMeter {
    pub fn new(tuning: MeterTuning) -> Self {
        Self { tuning, level: 0.0 }
    }

    /// Feed one waveform frame and return the updated level.
    pub fn push_frame(&mut self, samples: &[f32]) -> f32 {
        let raw = rms(samples);

        // Silence floor, then a square-root curve to lift quiet speech.
        let shaped = if raw <= self.tuning.silence_floor {
            0.0
        } else {
            (((raw - self.tuning.silence_floor) * self.tuning.sensitivity).sqrt()).min(1.0)
        };

        self.level += self.tuning.ema_alpha * (shaped - self.level);
        self.level = self.level.clamp(0.0, 1.0);
        self.level
    }

    pub fn voice_level(&self) -> f32 {
        self.level
    }

    pub fn is_voice_active(&self) -> bool {
        self.level >= self.tuning.active_threshold
    }

    pub fn activity(&self) -> VoiceActivity {
        VoiceActivity {
            level: self.level,
            active: self.is_voice_active(),
        }
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter() -> MicLevelMeter {
        MicLevelMeter::new(MeterTuning::default())
    }

    #[test]
    fn rms_of_silence_and_known_signal() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 256]), 0.0);
        let signal = [0.5f32; 256];
        assert!((rms(&signal) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn silence_stays_at_zero() {
        let mut m = meter();
        for _ in 0..10 {
            assert_eq!(m.push_frame(&[0.0; 128]), 0.0);
        }
        assert!(!m.is_voice_active());
    }

    #[test]
    fn below_floor_is_treated_as_silence() {
        let mut m = meter();
        let quiet = [0.01f32; 128]; // below the 0.02 default floor
        assert_eq!(m.push_frame(&quiet), 0.0);
    }

    #[test]
    fn loud_frames_raise_level_and_trip_threshold() {
        let mut m = meter();
        let loud = [0.6f32; 128];
        let first = m.push_frame(&loud);
        assert!(first > 0.0 && first <= 1.0);

        // EMA converges upward over repeated frames.
        let mut last = first;
        for _ in 0..20 {
            last = m.push_frame(&loud);
        }
        assert!(last > first);
        assert!(m.is_voice_active());
    }

    #[test]
    fn level_is_always_bounded() {
        let mut m = meter();
        for _ in 0..50 {
            let level = m.push_frame(&[1.0f32; 64]);
            assert!((0.0..=1.0).contains(&level));
        }
    }

    #[test]
    fn level_decays_after_speech_stops() {
        let mut m = meter();
        for _ in 0..20 {
            m.push_frame(&[0.6f32; 128]);
        }
        let peak = m.voice_level();
        for _ in 0..20 {
            m.push_frame(&[0.0f32; 128]);
        }
        assert!(m.voice_level() < peak / 2.0);
    }
}
