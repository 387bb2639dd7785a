//! Whisper-backed transcription with lazy load / idle unload.
//!
//! Unlike the one-shot command-line tool this is adapted from, the watcher holds a model
//! in memory for as long as any key is actively streaming and releases it after a period
//! of inactivity, since a live-stream worker may sit idle for long stretches between
//! segments.

pub mod ctx;
pub mod logging;
pub mod segments;
pub mod vad;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info};
use whisper_rs::{WhisperContext, WhisperVadContext, WhisperVadContextParams};

pub use segments::Segment;

/// How long the model may sit unused before [`WhisperAsr::unload_if_idle`] drops it.
pub const IDLE_UNLOAD_AFTER: Duration = Duration::from_secs(10 * 60);

struct Loaded {
    ctx: WhisperContext,
    vad: Option<WhisperVadContext>,
    last_used: Instant,
}

/// Lazily-loaded Whisper model plus an optional VAD pre-filter.
pub struct WhisperAsr {
    model_path: PathBuf,
    vad_model_path: Option<PathBuf>,
    state: Mutex<Option<Loaded>>,
}

impl WhisperAsr {
    pub fn new(model_path: PathBuf, vad_model_path: Option<PathBuf>) -> Self {
        Self {
            model_path,
            vad_model_path,
            state: Mutex::new(None),
        }
    }

    /// Run transcription on mono 16 kHz `samples`. Loads the model on first use.
    ///
    /// Segments shorter than the caller's own duration gate are the caller's concern; this
    /// always transcribes whatever it's handed.
    pub async fn transcribe(&self, samples: &mut Vec<f32>) -> Result<Vec<Segment>> {
        let mut guard = self.state.lock().await;
        self.ensure_loaded(&mut guard)?;

        let loaded = guard.as_mut().expect("ensure_loaded populates state");
        loaded.last_used = Instant::now();

        if let Some(vad) = loaded.vad.as_mut() {
            match vad::to_speech_only(vad, crate::audio::TARGET_SAMPLE_RATE_HZ, samples) {
                Ok(true) => {}
                Ok(false) => return Ok(Vec::new()),
                Err(err) => {
                    debug!(%err, "VAD pre-filter failed, transcribing full buffer");
                }
            }
        }

        segments::get_segments(&loaded.ctx, samples)
    }

    fn ensure_loaded(&self, guard: &mut Option<Loaded>) -> Result<()> {
        if guard.is_some() {
            return Ok(());
        }

        let model_path = self
            .model_path
            .to_str()
            .context("model path is not valid UTF-8")?;
        let whisper_ctx = ctx::get_context(model_path)?;

        let vad = match &self.vad_model_path {
            Some(path) => {
                let path = path.to_str().context("VAD model path is not valid UTF-8")?;
                match WhisperVadContext::new(path, WhisperVadContextParams::default()) {
                    Ok(vad) => Some(vad),
                    Err(err) => {
                        tracing::warn!(%err, "failed to load VAD model, continuing without it");
                        None
                    }
                }
            }
            None => None,
        };

        info!(model = model_path, "whisper model loaded");
        *guard = Some(Loaded {
            ctx: whisper_ctx,
            vad,
            last_used: Instant::now(),
        });
        Ok(())
    }

    /// Drop the loaded model if it has been idle for at least [`IDLE_UNLOAD_AFTER`].
    pub async fn unload_if_idle(&self) {
        let mut guard = self.state.lock().await;
        let Some(loaded) = guard.as_ref() else {
            return;
        };

        if loaded.last_used.elapsed() >= IDLE_UNLOAD_AFTER {
            *guard = None;
            info!("whisper model unloaded after idle timeout");
        }
    }

    #[cfg(test)]
    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unload_if_idle_is_noop_when_nothing_loaded() {
        let asr = WhisperAsr::new(PathBuf::from("/nonexistent/model.bin"), None);
        asr.unload_if_idle().await;
        assert!(!asr.is_loaded().await);
    }
}
