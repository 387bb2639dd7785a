//! The fragment/byte-stream downloader: an external collaborator contract wrapping `yt-dlp`.
//!
//! Grounded on `worker_fixedbitrate.py::create_process` / `worker_buffered.py::create_process`
//! (continuous stdout stream) and `worker_dash.py::create_process` (fragment files written to
//! a directory). Both are `yt-dlp` invocations; only the flags and output mode differ.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::types::MediaType;

/// A running download: either a byte stream (stdout) or fragment files written to a directory.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Spawn a downloader that writes a continuous MPEG-TS byte stream to stdout.
    async fn spawn_stream(&self, url: &str) -> Result<Child>;

    /// Spawn a downloader that writes numbered fragment files into `fragment_dir`.
    async fn spawn_fragments(
        &self,
        url: &str,
        stream_id: &str,
        fragment_dir: &Path,
        media_type: MediaType,
    ) -> Result<Child>;
}

pub struct YtDlpDownloader {
    ytdlp_path: String,
}

impl YtDlpDownloader {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn spawn_stream(&self, url: &str) -> Result<Child> {
        Command::new(&self.ytdlp_path)
            .args(["--quiet", "--no-warnings", "--match-filter", "is_live"])
            .args(["-f", "ba", "-o", "-"])
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn yt-dlp stream downloader")
    }

    async fn spawn_fragments(
        &self,
        url: &str,
        _stream_id: &str,
        fragment_dir: &Path,
        media_type: MediaType,
    ) -> Result<Child> {
        let fmt_selector = match media_type {
            MediaType::Video => "bestvideo[vcodec^=avc]+bestaudio[acodec^=mp4a]/best[vcodec^=avc]/best",
            _ => "bestaudio/best",
        };

        let output_template = format!("{}/%(id)s.%(format_id)s", fragment_dir.display());

        Command::new(&self.ytdlp_path)
            .args([
                "--quiet",
                "--no-warnings",
                "--live-from-start",
                "--keep-fragments",
                "--match-filter",
                "is_live",
            ])
            .args(["-f", fmt_selector])
            .args(["-o", &output_template])
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn yt-dlp fragment downloader")
    }
}
