//! Fragment muxer: an external collaborator contract wrapping `ffmpeg -c copy -f mpegts`.
//!
//! Grounded on `worker_dash.py::_merge_fragments`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;

#[async_trait]
pub trait Muxer: Send + Sync {
    /// Stream-copy `inputs` into a single MPEG-TS file at `output`.
    async fn mux(&self, inputs: &[std::path::PathBuf], output: &Path) -> Result<()>;
}

pub struct FfmpegMuxer {
    ffmpeg_path: String,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, inputs: &[std::path::PathBuf], output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-y");
        for input in inputs {
            cmd.arg("-i").arg(input);
        }
        cmd.args(["-c", "copy", "-f", "mpegts"]).arg(output);

        let status = cmd
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .context("failed to spawn ffmpeg")?;

        if !status.success() {
            bail!("ffmpeg exited with {status}");
        }
        Ok(())
    }
}

/// In-memory fake for tests: concatenates input file contents into `output`.
pub struct FakeMuxer;

#[async_trait]
impl Muxer for FakeMuxer {
    async fn mux(&self, inputs: &[std::path::PathBuf], output: &Path) -> Result<()> {
        let mut data = Vec::new();
        for input in inputs {
            data.extend(tokio::fs::read(input).await.context("reading fake muxer input")?);
        }
        tokio::fs::write(output, data)
            .await
            .context("writing fake muxer output")?;
        Ok(())
    }
}
