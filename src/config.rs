use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::cleanup::CleanupMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub hotkey: HotkeyConfig,
    pub audio: AudioConfig,
    pub model: ModelConfig,
    pub cleanup: CleanupConfig,
    pub generation: GenerationConfig,
    pub insertion: InsertionConfig,
    #[serde(default)]
    pub snippets: SnippetsConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HotkeyConfig {
    pub modifiers: Vec<String>,
    pub key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Dump each recording to a WAV file for debugging
    #[serde(default)]
    pub debug_dump: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_dumps")]
    pub max_dumps: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub path: String,
    pub preload: bool,
    pub threads: usize,
    pub beam_size: usize,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    pub mode: CleanupMode,
    pub model_assisted: bool,
    #[serde(default = "default_true")]
    pub trim: bool,
    #[serde(default = "default_true")]
    pub capitalize_first: bool,
    #[serde(default)]
    pub ensure_terminal_punctuation: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SnippetsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_snippet_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub entries: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InsertionConfig {
    pub preserve_clipboard: bool,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_restore_delay_ms")]
    pub restore_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_path: String,
}

const fn default_true() -> bool {
    true
}

const fn default_retention_days() -> u32 {
    7
}

const fn default_max_dumps() -> usize {
    20
}

const fn default_generation_timeout() -> u64 {
    10
}

const fn default_snippet_threshold() -> f64 {
    0.85
}

const fn default_settle_delay_ms() -> u64 {
    50
}

const fn default_restore_delay_ms() -> u64 {
    800
}

impl Config {
    /// Load config from ~/.dictate-hotkey.toml
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or if a default
    /// config cannot be written on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;

        let config: Self = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".dictate-hotkey.toml"))
    }

    fn create_default(path: &PathBuf) -> Result<()> {
        let default_config = r#"[hotkey]
modifiers = ["Command", "Shift"]
key = "D"

[audio]
sample_rate = 16000
debug_dump = false
retention_days = 7
max_dumps = 20

[model]
name = "small"
path = "~/.dictate-hotkey/models/ggml-small.bin"
preload = true
threads = 4
beam_size = 5

[cleanup]
# basic | standard | thorough
mode = "standard"
model_assisted = false
trim = true
capitalize_first = true
ensure_terminal_punctuation = false

[generation]
endpoint = "http://127.0.0.1:11434/api/generate"
model = "llama3.2"
timeout_secs = 10

[insertion]
preserve_clipboard = true
settle_delay_ms = 50
restore_delay_ms = 800

[snippets]
enabled = false
threshold = 0.85

[snippets.entries]
# "sign off" = "Best regards,\nYour Name"

[telemetry]
enabled = true
log_path = "~/.dictate-hotkey/dictate.log"
"#;
        fs::write(path, default_config).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if HOME is not set and the path starts with `~/`
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
