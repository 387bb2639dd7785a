//! Per-key watcher: probes liveness, selects a chunker by URL host, and drives
//! activate → chunk → deactivate.
//!
//! Grounded on `stream_watcher.py::StreamWatcher.watcher`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::chunker::buffered::BufferedChunker;
use crate::chunker::dash::DashChunker;
use crate::chunker::fixed_bitrate::FixedBitrateChunker;
use crate::chunker::Chunker;
use crate::downloader::Downloader;
use crate::muxer::Muxer;
use crate::probe::{into_stream_info, Probe};
use crate::shutdown::ShutdownSignal;
use crate::store::Store;
use crate::types::{Chunk, MediaType};

pub struct Watcher {
    pub key: String,
    pub urls: Vec<String>,
    pub configured_media_type: MediaType,
    pub probe: Arc<dyn Probe>,
    pub downloader: Arc<dyn Downloader>,
    pub muxer: Arc<dyn Muxer>,
    pub store: Arc<Store>,
    pub chunk_tx: UnboundedSender<Chunk>,
    pub buffer_size_seconds: u32,
    pub seconds_between_channel_retry: u64,
    pub data_dir: PathBuf,
    pub id_blacklist: Vec<String>,
}

impl Watcher {
    pub async fn run(&self, mut stop: ShutdownSignal) {
        info!(key = %self.key, "watcher starting");
        let mut last_stream_id = String::new();

        while !stop.is_set() {
            for url in &self.urls {
                let result = self.probe.probe(url).await;
                if self.id_blacklist.contains(&result.stream_id) {
                    continue;
                }

                let media_type = effective_media_type(url, self.configured_media_type);
                let info = into_stream_info(url, result, &self.key, media_type);

                if info.is_live {
                    info!(
                        key = %self.key,
                        stream_id = %info.stream_id,
                        title = %info.stream_title,
                        "stream is live"
                    );
                    self.store.activate(&info).await;
                    last_stream_id = info.stream_id.clone();

                    let chunker = self.select_chunker(url);
                    let mut chunker_stop = stop.clone();
                    if let Err(err) = chunker.run(&info, &self.chunk_tx, &mut chunker_stop).await {
                        tracing::warn!(key = %self.key, %err, "chunker exited with an error");
                    }

                    self.store.deactivate(&self.key, &info.stream_id).await;
                }

                if stop.is_set() {
                    self.store.deactivate(&self.key, &info.stream_id).await;
                    info!(key = %self.key, "watcher stopping");
                    return;
                }
            }

            let jitter = rand::thread_rng().gen_range(-5i64..=10i64);
            let sleep_secs = (self.seconds_between_channel_retry as i64 + jitter).max(1) as u64;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
                _ = stop.cancelled() => break,
            }
        }

        info!(key = %self.key, "watcher out of loop, deactivating last known stream");
        self.store.deactivate(&self.key, &last_stream_id).await;
    }

    fn select_chunker(&self, url: &str) -> Box<dyn Chunker> {
        let lower = url.to_lowercase();
        if lower.contains("twitch.tv") {
            Box::new(FixedBitrateChunker::new(
                self.downloader.clone(),
                self.buffer_size_seconds,
            ))
        } else if lower.contains("youtube.com") || lower.contains("youtu.be") {
            let key_dir = self.data_dir.join(&self.key);
            Box::new(DashChunker::new(
                self.downloader.clone(),
                self.muxer.clone(),
                self.buffer_size_seconds,
                key_dir.join("fragments"),
                key_dir.join("dash_state.json"),
            ))
        } else {
            Box::new(BufferedChunker::new(
                self.downloader.clone(),
                self.buffer_size_seconds,
            ))
        }
    }
}

/// Twitch never gets video: it already clips video client-side, and a video download there
/// would duplicate work for no transcript benefit.
fn effective_media_type(url: &str, configured: MediaType) -> MediaType {
    if url.to_lowercase().contains("twitch.tv") && configured == MediaType::Video {
        MediaType::Audio
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twitch_video_is_downgraded_to_audio() {
        assert_eq!(
            effective_media_type("https://twitch.tv/x", MediaType::Video),
            MediaType::Audio
        );
    }

    #[test]
    fn non_twitch_media_type_is_unchanged() {
        assert_eq!(
            effective_media_type("https://youtube.com/watch?v=1", MediaType::Video),
            MediaType::Video
        );
    }
}
