//! Worker configuration.
//!
//! Loaded from a YAML file named on the CLI; every field has a sensible default so a
//! minimal config only needs to list `streamers`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::MediaType;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub buffer_size_seconds: u32,
    pub seconds_between_channel_retry: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8080".to_owned(),
            api_key: String::new(),
            buffer_size_seconds: 6,
            seconds_between_channel_retry: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub model: String,
    pub device: String,
    pub compute_type: String,
    /// Path to a whisper.cpp VAD model. Not part of the distilled configuration schema;
    /// added because the ASR engine's VAD pre-filter requires a model file. When unset,
    /// VAD is skipped and a one-time warning is logged.
    pub vad_model: Option<PathBuf>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "base".to_owned(),
            device: "cpu".to_owned(),
            compute_type: "int8".to_owned(),
            vad_model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamerConfig {
    pub key: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_media_type")]
    pub media_type: MediaType,
}

fn default_media_type() -> MediaType {
    MediaType::None
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub transcription: TranscriptionConfig,
    pub streamers: Vec<StreamerConfig>,
    pub id_blacklist: Vec<String>,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            transcription: TranscriptionConfig::default(),
            streamers: Vec::new(),
            id_blacklist: Vec::new(),
            data_dir: PathBuf::from("tmp"),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file. Any parse or I/O failure is fatal; the caller
    /// is expected to bail out before spawning any task.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn active_streamers(&self) -> impl Iterator<Item = &StreamerConfig> {
        self.streamers.iter().filter(|s| s.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert!(!config.server.enabled);
        assert_eq!(config.server.buffer_size_seconds, 6);
        assert_eq!(config.server.seconds_between_channel_retry, 20);
        assert_eq!(config.transcription.model, "base");
        assert_eq!(config.data_dir, PathBuf::from("tmp"));
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
streamers:
  - key: example
    urls:
      - "https://twitch.tv/example"
    active: true
    media_type: audio
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.streamers.len(), 1);
        assert_eq!(config.streamers[0].key, "example");
        assert!(config.streamers[0].active);
        assert!(!config.server.enabled);
    }

    #[test]
    fn active_streamers_filters_inactive() {
        let yaml = r#"
streamers:
  - key: a
    urls: ["https://example.com/a"]
    active: true
  - key: b
    urls: ["https://example.com/b"]
    active: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let active: Vec<_> = config.active_streamers().map(|s| s.key.as_str()).collect();
        assert_eq!(active, vec!["a"]);
    }
}
