//! Wires the store, upload queue, transcriber, per-key watchers, and status reporter
//! together and runs them until told to stop.
//!
//! Grounded on `stream_watcher.py::StreamWatcher.start`/`stop` (task stagger, 30 s hard
//! transcriber-join deadline) combined with this codebase's `shutdown_signal` convention.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::asr::WhisperAsr;
use crate::config::Config;
use crate::downloader::{Downloader, YtDlpDownloader};
use crate::muxer::{FfmpegMuxer, Muxer};
use crate::probe::{Probe, YtDlpProbe};
use crate::relay::RelayClient;
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::status;
use crate::store::Store;
use crate::transcriber::Transcriber;
use crate::types::Chunk;
use crate::upload_queue::UploadQueue;
use crate::watcher::Watcher;

const STAGGER_BETWEEN_WATCHERS: Duration = Duration::from_millis(1200);
const TRANSCRIBER_JOIN_DEADLINE: Duration = Duration::from_secs(30);
const UPLOAD_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Supervisor {
    config: Config,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bootstrap every service and run until `stop` fires, then drain gracefully.
    pub async fn run(&self, stop: Shutdown, stop_signal: ShutdownSignal) -> anyhow::Result<()> {
        let relay = if self.config.server.enabled {
            Some(RelayClient::new(
                self.config.server.url.clone(),
                self.config.server.api_key.clone(),
            ))
        } else {
            None
        };

        let keys: Vec<String> = self
            .config
            .active_streamers()
            .map(|s| s.key.clone())
            .collect();

        let upload_queue = Arc::new(UploadQueue::new(
            self.config.data_dir.clone(),
            keys.clone(),
            relay.clone().map(Arc::new),
        ));
        let store = Arc::new(Store::new(
            self.config.data_dir.clone(),
            relay.clone(),
            upload_queue.clone(),
        ));

        for key in &keys {
            store.create_paths(key).await?;
        }

        let asr = Arc::new(WhisperAsr::new(
            PathBuf::from(&self.config.transcription.model),
            self.config.transcription.vad_model.clone(),
        ));
        if self.config.transcription.vad_model.is_none() {
            warn!("no transcription.vad_model configured; running without a VAD pre-filter");
        }

        let (chunk_tx, chunk_rx) = tokio::sync::mpsc::unbounded_channel::<Chunk>();

        let transcriber = Transcriber::new(asr, store.clone());
        let transcriber_stop = stop_signal.clone();
        let transcriber_handle: JoinHandle<()> =
            tokio::spawn(async move { transcriber.run(chunk_rx, transcriber_stop).await });

        let upload_worker_stop = stop_signal.clone();
        let upload_worker_queue = upload_queue.clone();
        let upload_worker_handle = tokio::spawn(async move {
            upload_worker_queue.run_worker(upload_worker_stop).await;
        });

        let downloader: Arc<dyn Downloader> = Arc::new(YtDlpDownloader::new("yt-dlp"));
        let muxer: Arc<dyn Muxer> = Arc::new(FfmpegMuxer::new("ffmpeg"));
        let probe: Arc<dyn Probe> = Arc::new(YtDlpProbe::new("yt-dlp"));

        let mut watcher_handles = Vec::new();
        for streamer in self.config.active_streamers() {
            let watcher = Watcher {
                key: streamer.key.clone(),
                urls: streamer.urls.clone(),
                configured_media_type: streamer.media_type,
                probe: probe.clone(),
                downloader: downloader.clone(),
                muxer: muxer.clone(),
                store: store.clone(),
                chunk_tx: chunk_tx.clone(),
                buffer_size_seconds: self.config.server.buffer_size_seconds,
                seconds_between_channel_retry: self.config.server.seconds_between_channel_retry,
                data_dir: self.config.data_dir.clone(),
                id_blacklist: self.config.id_blacklist.clone(),
            };
            let watcher_stop = stop_signal.clone();
            watcher_handles.push(tokio::spawn(async move { watcher.run(watcher_stop).await }));
            tokio::time::sleep(STAGGER_BETWEEN_WATCHERS).await;
        }

        let status_handle = relay.clone().map(|relay| {
            let keys = keys.clone();
            let status_stop = stop_signal.clone();
            tokio::spawn(async move {
                status::run(
                    &relay,
                    env!("CARGO_PKG_VERSION").to_owned(),
                    std::env::var("BUILD_DATE").unwrap_or_else(|_| "unknown".to_owned()),
                    keys,
                    status_stop,
                )
                .await;
            })
        });

        drop(chunk_tx);

        let mut signal = stop_signal;
        signal.cancelled().await;
        info!("shutdown requested, draining");
        stop.trigger();

        for handle in watcher_handles {
            let _ = handle.await;
        }

        if tokio::time::timeout(TRANSCRIBER_JOIN_DEADLINE, transcriber_handle)
            .await
            .is_err()
        {
            warn!("transcriber did not finish within the shutdown deadline");
        }

        upload_queue.wait_for_uploads(UPLOAD_DRAIN_TIMEOUT).await;
        let _ = upload_worker_handle.await;

        if let Some(handle) = status_handle {
            let _ = handle.await;
        }

        info!("shutdown complete");
        Ok(())
    }
}
