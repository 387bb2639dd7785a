//! Byte-count slicing chunker.
//!
//! Grounded on `worker_fixedbitrate.py::MPEGFixedBitrateWorker.start`: reads 4 KiB at a time
//! from the downloader's stdout, cuts a Chunk once the buffer reaches
//! `buffer_size_seconds * byte_rate`, and flushes a trailing >= 4 KiB remainder on EOF.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::downloader::Downloader;
use crate::shutdown::ShutdownSignal;
use crate::types::{Chunk, MediaType, StreamInfo};

use super::{Chunker, now_seconds, rates};

const READ_SIZE: usize = 4096;
const FINAL_FLUSH_THRESHOLD: usize = 4096;

pub struct FixedBitrateChunker {
    downloader: Arc<dyn Downloader>,
    buffer_size_seconds: u32,
}

impl FixedBitrateChunker {
    pub fn new(downloader: Arc<dyn Downloader>, buffer_size_seconds: u32) -> Self {
        Self {
            downloader,
            buffer_size_seconds,
        }
    }
}

#[async_trait]
impl Chunker for FixedBitrateChunker {
    async fn run(
        &self,
        info: &StreamInfo,
        tx: &UnboundedSender<Chunk>,
        stop: &mut ShutdownSignal,
    ) -> Result<()> {
        let mut child = self.downloader.spawn_stream(&info.url).await?;
        let mut stdout = child.stdout.take().context("downloader stdout not piped")?;

        let byte_rate = rates::sample_rate_for_url(&info.url);
        let chunk_size = self.buffer_size_seconds as u64 * byte_rate;

        let mut buffer: Vec<u8> = Vec::new();
        let mut audio_start_time = now_seconds() - super::LIVE_LATENCY_SECONDS;
        let mut read_buf = [0u8; READ_SIZE];

        loop {
            if stop.is_set() {
                break;
            }

            let read_result = tokio::select! {
                result = stdout.read(&mut read_buf) => result,
                _ = stop.cancelled() => break,
            };

            let next_start_time = now_seconds() - super::LIVE_LATENCY_SECONDS;

            let n = match read_result {
                Ok(0) => {
                    info!(key = %info.key, "downloader stream ended");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    warn!(key = %info.key, %err, "error reading from downloader stdout");
                    break;
                }
            };

            buffer.extend_from_slice(&read_buf[..n]);

            if buffer.len() as u64 >= chunk_size {
                debug!(key = %info.key, bytes = buffer.len(), "emitting fixed-bitrate chunk");
                let raw = std::mem::take(&mut buffer);
                if tx
                    .send(Chunk {
                        raw,
                        audio_start_time,
                        key: info.key.clone(),
                        media_type: info.media_type,
                    })
                    .is_err()
                {
                    break;
                }
                audio_start_time = next_start_time;
            }
        }

        if buffer.len() >= FINAL_FLUSH_THRESHOLD {
            let _ = tx.send(Chunk {
                raw: buffer,
                audio_start_time,
                key: info.key.clone(),
                media_type: info.media_type,
            });
        }

        let _ = child.start_kill();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use std::process::Stdio;
    use tokio::process::Command;

    struct ShellDownloader {
        script: String,
    }

    #[async_trait]
    impl Downloader for ShellDownloader {
        async fn spawn_stream(&self, _url: &str) -> Result<tokio::process::Child> {
            Command::new("sh")
                .arg("-c")
                .arg(&self.script)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .context("spawn sh")
        }

        async fn spawn_fragments(
            &self,
            _url: &str,
            _stream_id: &str,
            _fragment_dir: &std::path::Path,
            _media_type: MediaType,
        ) -> Result<tokio::process::Child> {
            unreachable!("not used by this chunker")
        }
    }

    #[tokio::test]
    async fn emits_whole_overshot_buffer_then_flushes_remainder() {
        // bufferSizeSeconds=1, Twitch rate=25540 B/s -> chunk_size=25540.
        // Produce chunk_size + 3000 bytes then EOF. Reads happen in 4096-byte increments, so
        // the buffer crosses chunk_size mid-read and the whole accumulated buffer (not a
        // chunk_size-sized slice of it) is emitted as one Chunk -- the exact byte count where
        // that crossing happens depends on pipe scheduling, so assert the invariants instead
        // of a specific split.
        let chunk_size = rates::TWITCH_AUDIO_BYTES_PER_SEC as usize;
        let total = chunk_size + 3000;
        let script = format!("head -c {total} /dev/zero");

        let downloader = Arc::new(ShellDownloader { script });
        let chunker = FixedBitrateChunker::new(downloader, 1);

        let info = StreamInfo {
            url: "https://twitch.tv/someone".into(),
            is_live: true,
            stream_id: "X".into(),
            stream_title: "T".into(),
            start_time: "0".into(),
            key: "k".into(),
            media_type: MediaType::Audio,
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (_shutdown, mut signal) = Shutdown::new();

        chunker.run(&info, &tx, &mut signal).await.unwrap();
        drop(tx);

        let mut sizes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sizes.push(chunk.raw.len());
        }

        assert!(!sizes.is_empty(), "expected at least one chunk");

        let (last, leading) = sizes.split_last().expect("non-empty");
        for &size in leading {
            assert!(
                size >= chunk_size,
                "non-final chunk {size} should have crossed chunk_size {chunk_size}"
            );
        }

        let emitted: usize = sizes.iter().sum();
        let dropped = total - emitted;
        assert!(
            dropped < FINAL_FLUSH_THRESHOLD,
            "only a sub-threshold remainder should go unflushed, got {dropped} bytes dropped"
        );
        assert!(*last > 0, "final chunk should be non-empty");
    }
}
