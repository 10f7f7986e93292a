//! Synthesized speaking-level signal.
//!
//! The synthesis engine exposes no amplitude, so while a reply plays we
//! generate a plausible 0..1 pulse from overlapping sines. The signal is
//! visual feedback only and decays to zero whenever playback is not active.

use std::f32::consts::TAU;

#[derive(Debug)]
pub struct SpeakingLevelSynth {
    tick_ms: u64,
    elapsed_ms: u64,
    level: f32,
    active: bool,
}

impl SpeakingLevelSynth {
    pub fn new(tick_ms: u64) -> Self {
        Self {
            tick_ms: tick_ms.max(1),
            elapsed_ms: 0,
            level: 0.0,
            active: false,
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Advance one tick and return the current level.
    pub fn tick(&mut self) -> f32 {
        self.elapsed_ms += self.tick_ms;

        if self.active {
            let t = self.elapsed_ms as f32 / 1000.0;
            // Two incommensurate periods avoid an obviously looping pattern.
            let pulse = 0.5 + 0.28 * (TAU * t / 0.73).sin() + 0.18 * (TAU * t / 0.31).sin();
            let target = pulse.clamp(0.0, 1.0);
            self.level += 0.5 * (target - self.level);
        } else {
            self.level *= 0.6;
            if self.level < 0.01 {
                self.level = 0.0;
            }
        }

        self.level = self.level.clamp(0.0, 1.0);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_signal_is_nonzero_and_bounded() {
        let mut synth = SpeakingLevelSynth::new(120);
        synth.set_active(true);
        let mut peak = 0.0f32;
        for _ in 0..100 {
            let level = synth.tick();
            assert!((0.0..=1.0).contains(&level));
            peak = peak.max(level);
        }
        assert!(peak > 0.2, "expected a visible pulse, got peak {peak}");
    }

    #[test]
    fn signal_varies_over_time() {
        let mut synth = SpeakingLevelSynth::new(120);
        synth.set_active(true);
        let samples: Vec<f32> = (0..40).map(|_| synth.tick()).collect();
        let min = samples.iter().cloned().fold(f32::MAX, f32::min);
        let max = samples.iter().cloned().fold(f32::MIN, f32::max);
        assert!(max - min > 0.1, "pulse should move, got range {min}..{max}");
    }

    #[test]
    fn decays_to_zero_when_inactive() {
        let mut synth = SpeakingLevelSynth::new(120);
        synth.set_active(true);
        for _ in 0..20 {
            synth.tick();
        }
        synth.set_active(false);
        for _ in 0..20 {
            synth.tick();
        }
        assert_eq!(synth.level(), 0.0);
    }
}
