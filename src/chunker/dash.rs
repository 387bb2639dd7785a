//! Fragment-assembled slicing chunker.
//!
//! Grounded on `worker_dash.py::DASHWorker`: the downloader writes numbered fragment files
//! (`<streamId>.<formatId>.Frag<N>`) to a directory; a monitor task groups them by sequence,
//! waits for each sequence to be "ready" (enough tracks present), muxes ready sequences into
//! MPEG-TS via the external muxer, and accumulates duration until a Chunk-worth is ready.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::downloader::Downloader;
use crate::muxer::Muxer;
use crate::shutdown::ShutdownSignal;
use crate::types::{Chunk, DashState, MediaType, StreamInfo};

use super::Chunker;

const SCAN_INTERVAL: Duration = Duration::from_secs(1);

pub struct DashChunker {
    downloader: Arc<dyn Downloader>,
    muxer: Arc<dyn Muxer>,
    buffer_size_seconds: f64,
    fragment_dir: PathBuf,
    state_file: PathBuf,
}

impl DashChunker {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        muxer: Arc<dyn Muxer>,
        buffer_size_seconds: u32,
        fragment_dir: PathBuf,
        state_file: PathBuf,
    ) -> Self {
        Self {
            downloader,
            muxer,
            buffer_size_seconds: buffer_size_seconds as f64,
            fragment_dir,
            state_file,
        }
    }

    async fn load_state(&self, stream_id: &str, default_start_time: f64) -> (i64, f64) {
        let Ok(bytes) = tokio::fs::read(&self.state_file).await else {
            return (0, default_start_time);
        };
        let Ok(state) = serde_json::from_slice::<DashState>(&bytes) else {
            return (0, default_start_time);
        };
        if state.stream_id == stream_id {
            (state.last_sequence, state.current_stream_time)
        } else {
            (0, default_start_time)
        }
    }

    async fn save_state(&self, stream_id: &str, last_sequence: i64, current_stream_time: f64) {
        let state = DashState {
            stream_id: stream_id.to_owned(),
            last_sequence,
            current_stream_time,
        };
        if let Ok(bytes) = serde_json::to_vec(&state) {
            if let Err(err) = tokio::fs::write(&self.state_file, bytes).await {
                warn!(%err, "failed to persist DASH resume state");
            }
        }
    }
}

#[async_trait]
impl Chunker for DashChunker {
    async fn run(
        &self,
        info: &StreamInfo,
        tx: &UnboundedSender<Chunk>,
        stop: &mut ShutdownSignal,
    ) -> Result<()> {
        let default_start_time = info.start_time.parse().unwrap_or_else(|_| super::now_seconds());
        let (mut last_seq, mut current_stream_time) =
            self.load_state(&info.stream_id, default_start_time).await;

        let is_fresh = last_seq == 0 && current_stream_time == default_start_time;
        if is_fresh && tokio::fs::try_exists(&self.fragment_dir).await.unwrap_or(false) {
            let _ = tokio::fs::remove_dir_all(&self.fragment_dir).await;
        }
        tokio::fs::create_dir_all(&self.fragment_dir).await?;

        let mut child = self
            .downloader
            .spawn_fragments(&info.url, &info.stream_id, &self.fragment_dir, info.media_type)
            .await?;

        let is_video_mode = info.media_type == MediaType::Video;
        let frag_re = Regex::new(r"Frag(\d+)").expect("static regex is valid");

        let mut buffer: Vec<u8> = Vec::new();
        let mut buffer_duration = 0.0f64;

        loop {
            if stop.is_set() {
                break;
            }
            if let Ok(Some(_)) = child.try_wait() {
                info!(key = %info.key, "DASH downloader process ended");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(SCAN_INTERVAL) => {}
                _ = stop.cancelled() => break,
            }

            let pending = scan_pending_fragments(&self.fragment_dir, &frag_re, last_seq).await;
            if pending.is_empty() {
                continue;
            }

            for (seq, files) in pending {
                let ready = if is_video_mode {
                    if files.len() >= 2 {
                        true
                    } else if let [only] = files.as_slice() {
                        is_single_file_complete_av(only).await
                    } else {
                        false
                    }
                } else {
                    !files.is_empty()
                };

                if !ready {
                    break;
                }

                let merged_path = self.fragment_dir.join(format!("merged_{seq}.ts"));
                if let Err(err) = self.muxer.mux(&files, &merged_path).await {
                    error!(key = %info.key, seq, %err, "failed to mux DASH fragments");
                    break;
                }

                let data = match tokio::fs::read(&merged_path).await {
                    Ok(d) => d,
                    Err(err) => {
                        error!(key = %info.key, seq, %err, "failed to read muxed DASH fragment");
                        break;
                    }
                };
                let duration =
                    crate::audio::precise_duration_seconds(&data, Some("ts")).unwrap_or(0.0);
                let _ = tokio::fs::remove_file(&merged_path).await;

                if duration > 0.0 {
                    buffer.extend_from_slice(&data);
                    buffer_duration += duration;
                }
                last_seq = seq;

                if buffer_duration >= self.buffer_size_seconds - 0.2 {
                    debug!(key = %info.key, seq, buffer_duration, "emitting DASH chunk");
                    let raw = std::mem::take(&mut buffer);
                    if tx
                        .send(Chunk {
                            raw,
                            audio_start_time: current_stream_time,
                            key: info.key.clone(),
                            media_type: info.media_type,
                        })
                        .is_err()
                    {
                        return Ok(());
                    }
                    current_stream_time += buffer_duration;
                    buffer_duration = 0.0;
                    self.save_state(&info.stream_id, last_seq, current_stream_time).await;
                }
            }
        }

        if !buffer.is_empty() {
            let _ = tx.send(Chunk {
                raw: buffer,
                audio_start_time: current_stream_time,
                key: info.key.clone(),
                media_type: info.media_type,
            });
        }

        let _ = child.start_kill();
        Ok(())
    }
}

/// A lone fragment is ready on its own when it already muxes both an audio and a video
/// stream, so a YouTube stream that writes one combined AV fragment per sequence (instead
/// of separate audio/video files) doesn't stall waiting for a second file.
async fn is_single_file_complete_av(path: &Path) -> bool {
    match tokio::fs::read(path).await {
        Ok(data) => crate::audio::is_complete_av(&data, None),
        Err(_) => false,
    }
}

/// Group valid fragment files (`Frag<seq>`, not `.part`/`.ytdl`, size > 0) by sequence
/// number, keeping only sequences greater than `last_seq`, sorted ascending.
async fn scan_pending_fragments(
    dir: &Path,
    frag_re: &Regex,
    last_seq: i64,
) -> Vec<(i64, Vec<PathBuf>)> {
    let mut grouped: BTreeMap<i64, Vec<PathBuf>> = BTreeMap::new();

    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        let Some(caps) = frag_re.captures(name) else {
            continue;
        };
        let Ok(seq) = caps[1].parse::<i64>() else {
            continue;
        };
        if seq <= last_seq {
            continue;
        }

        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            continue;
        }

        grouped.entry(seq).or_default().push(path);
    }

    grouped.into_iter().collect()
}
