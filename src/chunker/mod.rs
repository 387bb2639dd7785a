//! The three interchangeable chunking strategies, behind one small capability trait.
//!
//! Grounded on `worker.py::Worker.start`'s dispatch and the shared `AbstractWorker` base: the
//! concrete workers barely share state, so rather than an inheritance hierarchy each strategy
//! is its own type implementing [`Chunker`], and the watcher picks one per stream by URL host.

pub mod buffered;
pub mod dash;
pub mod fixed_bitrate;
pub mod rates;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::shutdown::ShutdownSignal;
use crate::types::{Chunk, StreamInfo};

/// Wall-clock seconds subtracted from "now" to get the first chunk's `audio_start_time`,
/// compensating for downloader/network latency between "stream went live" and "first byte
/// reaches us".
pub const LIVE_LATENCY_SECONDS: f64 = 1.0;

#[async_trait]
pub trait Chunker: Send + Sync {
    /// Spawn the downloader, emit `Chunk`s for `info.key` onto `tx` in FIFO order, and return
    /// once the downloader exits, `stop` fires, or an unrecoverable error occurs.
    async fn run(
        &self,
        info: &StreamInfo,
        tx: &UnboundedSender<Chunk>,
        stop: &mut ShutdownSignal,
    ) -> Result<()>;
}

pub(crate) fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
