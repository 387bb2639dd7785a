//! Time-based slicing chunker.
//!
//! Grounded on `worker_buffered.py::MPEGBufferedWorker`: a downloader task appends to a
//! shared byte buffer; a slicer polls roughly every second and cuts a Chunk once the buffer
//! both exceeds a minimum size and represents at least `buffer_size_seconds` of media,
//! measured by probing the container duration of a snapshot of the buffer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::downloader::Downloader;
use crate::shutdown::ShutdownSignal;
use crate::types::{Chunk, StreamInfo};

use super::{Chunker, now_seconds};

const MIN_BUFFER_SIZE: usize = 8192;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct BufferedChunker {
    downloader: Arc<dyn Downloader>,
    buffer_size_seconds: u32,
}

impl BufferedChunker {
    pub fn new(downloader: Arc<dyn Downloader>, buffer_size_seconds: u32) -> Self {
        Self {
            downloader,
            buffer_size_seconds,
        }
    }
}

#[async_trait]
impl Chunker for BufferedChunker {
    async fn run(
        &self,
        info: &StreamInfo,
        tx: &UnboundedSender<Chunk>,
        stop: &mut ShutdownSignal,
    ) -> Result<()> {
        let mut child = self.downloader.spawn_stream(&info.url).await?;
        let mut stdout = child.stdout.take().context("downloader stdout not piped")?;

        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        let downloader_done = Arc::new(tokio::sync::Notify::new());

        let reader_buffer = buffer.clone();
        let reader_done = downloader_done.clone();
        let key_for_reader = info.key.clone();
        let mut reader_stop = stop.clone();
        let reader = tokio::spawn(async move {
            let mut read_buf = [0u8; 4096];
            loop {
                let read_result = tokio::select! {
                    result = stdout.read(&mut read_buf) => result,
                    _ = reader_stop.cancelled() => break,
                };
                match read_result {
                    Ok(0) => {
                        info!(key = %key_for_reader, "downloader stream ended");
                        break;
                    }
                    Ok(n) => {
                        reader_buffer.lock().await.extend_from_slice(&read_buf[..n]);
                    }
                    Err(err) => {
                        warn!(key = %key_for_reader, %err, "error reading from downloader stdout");
                        break;
                    }
                }
            }
            reader_done.notify_one();
        });

        let mut audio_start_time = now_seconds() - super::LIVE_LATENCY_SECONDS;
        let mut reader_finished = false;

        while !reader_finished {
            if stop.is_set() {
                break;
            }

            tokio::select! {
                _ = downloader_done.notified() => reader_finished = true,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = stop.cancelled() => break,
            }

            let next_start_time = now_seconds() - super::LIVE_LATENCY_SECONDS;
            let mut guard = buffer.lock().await;
            if guard.is_empty() {
                continue;
            }

            let snapshot = guard.clone();
            if snapshot.len() < MIN_BUFFER_SIZE {
                continue;
            }

            let duration = crate::audio::probe_duration_seconds(&snapshot, None).unwrap_or(0.0);
            if duration < self.buffer_size_seconds as f64 {
                continue;
            }

            debug!(key = %info.key, bytes = snapshot.len(), duration, "emitting buffered chunk");
            guard.clear();
            drop(guard);

            if tx
                .send(Chunk {
                    raw: snapshot,
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

        let remainder = {
            let mut guard = buffer.lock().await;
            std::mem::take(&mut *guard)
        };
        if remainder.len() >= MIN_BUFFER_SIZE {
            let _ = tx.send(Chunk {
                raw: remainder,
                audio_start_time,
                key: info.key.clone(),
                media_type: info.media_type,
            });
        }

        let _ = reader.await;
        let _ = child.start_kill();
        Ok(())
    }
}
