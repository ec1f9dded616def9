use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::output::OutputMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub hotkey: HotkeyConfig,
    pub audio: AudioConfig,
    pub model: ModelConfig,
    pub output: OutputConfig,
    /// Ordered replacement rules; array order is application order.
    #[serde(default)]
    pub replacements: Vec<ReplacementRule>,
    pub recordings: RecordingConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HotkeyConfig {
    /// Chord spec, e.g. "ctrl+shift+d"
    pub chord: String,
    pub activation: Activation,
}

/// How chord events map onto the recording session.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Chord satisfied starts recording, chord released stops it.
    Hold,
    /// Each chord activation flips recording on/off.
    Toggle,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    /// Target sample rate handed to the speech engine (Hz)
    pub sample_rate: u32,
    /// Ring buffer capacity in seconds of audio
    pub max_seconds: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub path: String,
    pub preload: bool,
    pub language: Option<String>,
    pub threads: usize,
    pub beam_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub mode: OutputMode,
    /// Per-keystroke delay passed to the typing tool (ms)
    pub type_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ReplacementRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub retention_days: u32,
    pub max_count: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_path: String,
}

impl Config {
    /// Load config from ~/.whisper-dictate.toml
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(config)
    }

    /// Reload only the replacement rules.
    ///
    /// The replacement engine re-reads its rules once per transcription, so
    /// edits to the config file apply to the next dictation without a
    /// restart.
    pub fn load_replacements() -> Result<Vec<ReplacementRule>> {
        Ok(Self::load()?.replacements)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".whisper-dictate.toml"))
    }

    fn create_default(path: &PathBuf) -> Result<()> {
        let default_config = r#"[hotkey]
chord = "ctrl+shift+d"
activation = "toggle"

[audio]
sample_rate = 16000
max_seconds = 30

[model]
name = "base"
path = "~/.whisper-dictate/models/ggml-base.bin"
preload = false
language = "en"
threads = 4
beam_size = 5

[output]
mode = "type"
type_delay_ms = 12

[recordings]
enabled = false
retention_days = 7
max_count = 50

[telemetry]
enabled = false
log_path = "~/.whisper-dictate/whisper-dictate.log"

[[replacements]]
pattern = " dot "
replacement = "."

[[replacements]]
pattern = "period"
replacement = "."

[[replacements]]
pattern = "new line"
replacement = "\n"
"#;
        fs::write(path, default_config).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
