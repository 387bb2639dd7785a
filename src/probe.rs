//! Stream metadata probe: an external collaborator contract wrapping `yt-dlp -j`.
//!
//! Grounded on the original implementation's `StreamHelper.get_stream_stats`: a JSON
//! metadata dump, Twitch-specific title/start-time overrides, and "anything that fails to
//! parse is not-live" semantics.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::text::strip_date;
use crate::types::StreamInfo;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A probe result before the watcher decorates it with `key`/`media_type`.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub is_live: bool,
    pub stream_id: String,
    pub stream_title: String,
    pub start_time: String,
}

impl ProbeResult {
    fn not_live() -> Self {
        Self {
            is_live: false,
            stream_id: String::new(),
            stream_title: String::new(),
            start_time: String::new(),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

#[derive(Debug, Deserialize)]
struct YtDlpMetadata {
    #[serde(default)]
    is_live: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    display_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    release_timestamp: Option<f64>,
    #[serde(default)]
    timestamp: Option<f64>,
}

/// Real probe: spawns `yt-dlp -j <url>` and parses its JSON stdout.
pub struct YtDlpProbe {
    ytdlp_path: String,
}

impl YtDlpProbe {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }
}

#[async_trait]
impl Probe for YtDlpProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        match self.run(url).await {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(url, %err, "stream probe failed, treating as not-live");
                ProbeResult::not_live()
            }
        }
    }
}

impl YtDlpProbe {
    async fn run(&self, url: &str) -> Result<ProbeResult> {
        let output = timeout(
            PROBE_TIMEOUT,
            Command::new(&self.ytdlp_path).arg("-j").arg(url).output(),
        )
        .await
        .context("yt-dlp metadata fetch timed out")?
        .context("failed to spawn yt-dlp")?;

        if !output.status.success() {
            anyhow::bail!(
                "yt-dlp exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let metadata: YtDlpMetadata =
            serde_json::from_slice(&output.stdout).context("failed to parse yt-dlp JSON")?;

        if !metadata.is_live {
            return Ok(ProbeResult::not_live());
        }

        let is_twitch = url.to_lowercase().contains("twitch.tv");

        let stream_title = if is_twitch {
            format!(
                "{} - {}",
                metadata.display_id.as_deref().unwrap_or("Unknown Channel"),
                metadata.description.as_deref().unwrap_or("Unknown Title")
            )
        } else {
            strip_date(metadata.title.as_deref().unwrap_or("Unknown Title"))
        };

        let mut start_time = if is_twitch {
            metadata.timestamp.unwrap_or(0.0)
        } else {
            metadata.release_timestamp.unwrap_or(0.0)
        };
        if start_time == 0.0 {
            start_time = metadata.timestamp.unwrap_or(0.0);
        }

        Ok(ProbeResult {
            is_live: true,
            stream_id: metadata.id.unwrap_or_else(|| "Unknown ID".to_owned()),
            stream_title,
            start_time: format!("{start_time}"),
        })
    }
}

/// In-memory fake for tests: returns a scripted sequence of results, repeating the last one.
pub struct FakeProbe {
    results: std::sync::Mutex<Vec<ProbeResult>>,
}

impl FakeProbe {
    pub fn new(results: Vec<ProbeResult>) -> Self {
        Self {
            results: std::sync::Mutex::new(results),
        }
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn probe(&self, _url: &str) -> ProbeResult {
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.remove(0)
        } else {
            results.first().cloned().unwrap_or_else(ProbeResult::not_live)
        }
    }
}

/// Decorate a raw probe result with the watcher-known `key` and effective media type.
pub fn into_stream_info(
    url: &str,
    result: ProbeResult,
    key: &str,
    media_type: crate::types::MediaType,
) -> StreamInfo {
    StreamInfo {
        url: url.to_owned(),
        is_live: result.is_live,
        stream_id: result.stream_id,
        stream_title: result.stream_title,
        start_time: result.start_time,
        key: key.to_owned(),
        media_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_probe_returns_scripted_results_then_repeats_last() {
        let probe = FakeProbe::new(vec![
            ProbeResult {
                is_live: true,
                stream_id: "X".into(),
                stream_title: "A".into(),
                start_time: "1".into(),
            },
            ProbeResult::not_live(),
        ]);

        let first = probe.probe("u").await;
        assert!(first.is_live);
        let second = probe.probe("u").await;
        assert!(!second.is_live);
        let third = probe.probe("u").await;
        assert!(!third.is_live);
    }
}
