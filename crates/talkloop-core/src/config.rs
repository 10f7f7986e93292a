//! Configuration loading and tunable resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Talkloop configuration (`talkloop.json5`).
///
/// Every field is optional; a missing file or missing section resolves to
/// the built-in defaults through the accessor methods below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter: Option<MeterConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorder: Option<RecorderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Total session duration budget in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_sec: Option<u64>,

    /// The hard cutoff fires this many seconds before `target_sec`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_cutoff_margin_sec: Option<u64>,

    /// Length of the soft-wrap window at the end of the session, during
    /// which every turn requests a close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_wrap_window_sec: Option<u64>,

    /// Elapsed seconds below which the conversation phase is `warmup`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_end_sec: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_mode: Option<String>,

    /// `source` tag attached to every turn meta payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Quiet interval after the last recognition result before the buffered
    /// transcript is committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_commit_ms: Option<u64>,

    /// Local retries on a `no-speech` result before promoting to an
    /// empty-turn follow-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_speech_retry_limit: Option<u32>,

    /// Consecutive engine restarts tolerated within one listening turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_limit: Option<u32>,

    /// Delay before re-engaging the engine after a no-speech retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_delay_ms: Option<u64>,

    /// Single-token utterances discarded as fillers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filler_stoplist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Fail-safe: close the audio gate after this long even if the engine
    /// never reports the end of playback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failsafe_ms: Option<u64>,

    /// Sampling interval for the synthesized speaking-level signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaking_tick_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_floor: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema_alpha: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeslice_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl BackendConfig {
    /// Resolve the API key: check `api_key` first, then `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Resolved session timing tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub target_sec: u64,
    pub hard_cutoff_margin_sec: u64,
    pub soft_wrap_window_sec: u64,
    pub warmup_end_sec: u64,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            target_sec: 300,
            hard_cutoff_margin_sec: 8,
            soft_wrap_window_sec: 60,
            warmup_end_sec: 45,
        }
    }
}

impl SessionTiming {
    /// Elapsed seconds at which the soft-wrap window begins.
    pub fn soft_wrap_start_sec(&self) -> u64 {
        self.target_sec.saturating_sub(self.soft_wrap_window_sec)
    }

    /// Elapsed seconds at which the hard cutoff fires.
    pub fn hard_cutoff_sec(&self) -> u64 {
        self.target_sec.saturating_sub(self.hard_cutoff_margin_sec)
    }
}

/// Resolved speech-capture tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTuning {
    pub silence_commit_ms: u64,
    pub no_speech_retry_limit: u32,
    pub restart_limit: u32,
    pub restart_delay_ms: u64,
    pub filler_stoplist: Vec<String>,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            silence_commit_ms: 1300,
            no_speech_retry_limit: 2,
            restart_limit: 3,
            restart_delay_ms: 250,
            filler_stoplist: default_filler_stoplist(),
        }
    }
}

fn default_filler_stoplist() -> Vec<String> {
    ["음", "어", "그", "아", "uh", "um", "hmm", "mm"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Resolved playback tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTuning {
    pub failsafe_ms: u64,
    pub speaking_tick_ms: u64,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            failsafe_ms: 30_000,
            speaking_tick_ms: 120,
        }
    }
}

/// Resolved mic-meter tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterTuning {
    pub sensitivity: f32,
    pub silence_floor: f32,
    pub ema_alpha: f32,
    pub active_threshold: f32,
}

impl Default for MeterTuning {
    fn default() -> Self {
        Self {
            sensitivity: 1.6,
            silence_floor: 0.02,
            ema_alpha: 0.25,
            active_threshold: 0.12,
        }
    }
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::TalkloopError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::TalkloopError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("talkloop.json5")
    }

    pub fn timing(&self) -> SessionTiming {
        let defaults = SessionTiming::default();
        let s = self.session.as_ref();
        SessionTiming {
            target_sec: s.and_then(|s| s.target_sec).unwrap_or(defaults.target_sec),
            hard_cutoff_margin_sec: s
                .and_then(|s| s.hard_cutoff_margin_sec)
                .unwrap_or(defaults.hard_cutoff_margin_sec),
            soft_wrap_window_sec: s
                .and_then(|s| s.soft_wrap_window_sec)
                .unwrap_or(defaults.soft_wrap_window_sec),
            warmup_end_sec: s
                .and_then(|s| s.warmup_end_sec)
                .unwrap_or(defaults.warmup_end_sec),
        }
    }

    pub fn capture_tuning(&self) -> CaptureTuning {
        let defaults = CaptureTuning::default();
        let c = self.capture.as_ref();
        CaptureTuning {
            silence_commit_ms: c
                .and_then(|c| c.silence_commit_ms)
                .unwrap_or(defaults.silence_commit_ms),
            no_speech_retry_limit: c
                .and_then(|c| c.no_speech_retry_limit)
                .unwrap_or(defaults.no_speech_retry_limit),
            restart_limit: c
                .and_then(|c| c.restart_limit)
                .unwrap_or(defaults.restart_limit),
            restart_delay_ms: c
                .and_then(|c| c.restart_delay_ms)
                .unwrap_or(defaults.restart_delay_ms),
            filler_stoplist: c
                .and_then(|c| c.filler_stoplist.clone())
                .unwrap_or_else(default_filler_stoplist),
        }
    }

    pub fn playback_tuning(&self) -> PlaybackTuning {
        let defaults = PlaybackTuning::default();
        let p = self.playback.as_ref();
        PlaybackTuning {
            failsafe_ms: p.and_then(|p| p.failsafe_ms).unwrap_or(defaults.failsafe_ms),
            speaking_tick_ms: p
                .and_then(|p| p.speaking_tick_ms)
                .unwrap_or(defaults.speaking_tick_ms),
        }
    }

    pub fn meter_tuning(&self) -> MeterTuning {
        let defaults = MeterTuning::default();
        let m = self.meter.as_ref();
        MeterTuning {
            sensitivity: m.and_then(|m| m.sensitivity).unwrap_or(defaults.sensitivity),
            silence_floor: m
                .and_then(|m| m.silence_floor)
                .unwrap_or(defaults.silence_floor),
            ema_alpha: m.and_then(|m| m.ema_alpha).unwrap_or(defaults.ema_alpha),
            active_threshold: m
                .and_then(|m| m.active_threshold)
                .unwrap_or(defaults.active_threshold),
        }
    }

    pub fn recorder_timeslice_ms(&self) -> u64 {
        self.recorder
            .as_ref()
            .and_then(|r| r.timeslice_ms)
            .unwrap_or(1000)
    }

    pub fn backend_base_url(&self) -> String {
        self.backend
            .as_ref()
            .and_then(|b| b.base_url.clone())
            .unwrap_or_else(|| "http://localhost:8787".to_string())
    }

    pub fn session_mode(&self) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.session_mode.clone())
            .unwrap_or_else(|| "talk".to_string())
    }

    pub fn source(&self) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.source.clone())
            .unwrap_or_else(|| "voice_client".to_string())
    }
}

/// Talkloop data directory (`~/.local/share/talkloop` or platform equivalent).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("talkloop")
}

/// Load the per-device profile id, creating and persisting one on first use.
pub fn load_or_create_profile_id(dir: &Path) -> crate::error::Result<String> {
    let path = dir.join("profile_id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    std::fs::create_dir_all(dir).map_err(crate::error::TalkloopError::Io)?;
    std::fs::write(&path, &id).map_err(crate::error::TalkloopError::Io)?;
    tracing::info!(profile_id = %id, "Created new device profile id");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/talkloop.json5")).unwrap();
        assert_eq!(config.timing().target_sec, 300);
        assert_eq!(config.capture_tuning().silence_commit_ms, 1300);
        assert_eq!(config.recorder_timeslice_ms(), 1000);
    }

    #[test]
    fn json5_sections_override_defaults() {
        let json_str = r#"{
            session: { target_sec: 120, soft_wrap_window_sec: 30 },
            capture: { no_speech_retry_limit: 1, filler_stoplist: ["음"] },
        }"#;
        let config: Config = json5::from_str(json_str).unwrap();

        let timing = config.timing();
        assert_eq!(timing.target_sec, 120);
        assert_eq!(timing.soft_wrap_start_sec(), 90);
        // Untouched sections keep defaults.
        assert_eq!(timing.hard_cutoff_margin_sec, 8);

        let capture = config.capture_tuning();
        assert_eq!(capture.no_speech_retry_limit, 1);
        assert_eq!(capture.filler_stoplist, vec!["음".to_string()]);
        assert_eq!(capture.silence_commit_ms, 1300);
    }

    #[test]
    fn env_vars_are_substituted() {
        unsafe { std::env::set_var("TALKLOOP_TEST_URL", "https://api.example.com") };
        let substituted = substitute_env_vars(r#"{ backend: { base_url: "${TALKLOOP_TEST_URL}" } }"#);
        let config: Config = json5::from_str(&substituted).unwrap();
        assert_eq!(config.backend_base_url(), "https://api.example.com");
    }

    #[test]
    fn soft_wrap_precedes_hard_cutoff_by_default() {
        let timing = SessionTiming::default();
        assert!(timing.soft_wrap_start_sec() < timing.hard_cutoff_sec());
        assert!(timing.hard_cutoff_sec() < timing.target_sec);
    }

    #[test]
    fn profile_id_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_profile_id(dir.path()).unwrap();
        let second = load_or_create_profile_id(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
