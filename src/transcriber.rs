//! Single global consumer of the shared Chunk queue.
//!
//! Grounded on `process_audio.py::ProcessAudio.process_audio`/`transcribe`: decode, gate on
//! a minimum speech duration, decensor each segment, and hand the assembled line (plus raw
//! media) to the Store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::asr::WhisperAsr;
use crate::shutdown::ShutdownSignal;
use crate::store::Store;
use crate::text::decensor;
use crate::types::{Chunk, MediaType, TranscriptLine, TranscriptSegment};

/// Chunks shorter than this after VAD/decode are dropped (ad break / silence artifact).
const MIN_CHUNK_DURATION_SECONDS: f64 = 0.5;

/// Queue length at which a back-pressure warning is logged.
const QUEUE_WARN_THRESHOLD: usize = 10;

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub struct Transcriber {
    asr: Arc<WhisperAsr>,
    store: Arc<Store>,
}

impl Transcriber {
    pub fn new(asr: Arc<WhisperAsr>, store: Arc<Store>) -> Self {
        Self { asr, store }
    }

    /// Drain `rx` until `stop` fires and the queue is empty.
    pub async fn run(&self, mut rx: UnboundedReceiver<Chunk>, mut stop: ShutdownSignal) {
        info!("transcriber starting");
        loop {
            let chunk = tokio::select! {
                chunk = rx.recv() => chunk,
                _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                    self.asr.unload_if_idle().await;
                    continue;
                }
            };

            let Some(chunk) = chunk else {
                break;
            };

            if rx.len() >= QUEUE_WARN_THRESHOLD {
                warn!(queue_len = rx.len(), "transcriber queue size is getting large");
            }

            self.process(chunk).await;

            if stop.is_set() && rx.is_empty() {
                break;
            }
        }
        info!("transcriber finished");
    }

    async fn process(&self, chunk: Chunk) {
        if chunk.raw.is_empty() {
            return;
        }

        let (mut samples, _) = match crate::audio::decode_to_mono16k(&chunk.raw, None) {
            Ok(result) => result,
            Err(err) => {
                warn!(key = %chunk.key, %err, "failed to decode chunk, dropping");
                return;
            }
        };

        let duration = samples.len() as f64 / crate::audio::TARGET_SAMPLE_RATE_HZ as f64;
        if duration < MIN_CHUNK_DURATION_SECONDS {
            debug!(key = %chunk.key, duration, "dropping chunk below minimum duration");
            return;
        }

        let segments = match self.asr.transcribe(&mut samples).await {
            Ok(segments) => segments,
            Err(err) => {
                warn!(key = %chunk.key, %err, "ASR engine failed, treating as empty transcript");
                Vec::new()
            }
        };

        let line_segments: Vec<TranscriptSegment> = segments
            .into_iter()
            .map(|seg| TranscriptSegment {
                timestamp: (chunk.audio_start_time + seg.start_seconds as f64).floor() as i64,
                text: decensor(seg.text.trim()),
            })
            .collect();

        let line = TranscriptLine::new(chunk.audio_start_time.floor() as i64, line_segments);

        let raw = if chunk.media_type == MediaType::None {
            None
        } else {
            Some(chunk.raw)
        };

        self.store.add_new_line(&chunk.key, line, raw).await;
    }
}
