//! `relaywatcher` — a live-stream watch/ingest/transcribe/relay worker.
//!
//! This crate watches a configured set of streaming channels, downloads whatever is live,
//! slices the incoming media into fixed-duration chunks, transcribes each chunk with a local
//! Whisper model, and relays the resulting transcript lines (and, where configured, the
//! underlying media) to an upstream server.

pub mod asr;
pub mod audio;
pub mod chunker;
pub mod config;
pub mod downloader;
pub mod logging;
pub mod muxer;
pub mod probe;
pub mod relay;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod text;
pub mod transcriber;
pub mod types;
pub mod upload_queue;
pub mod watcher;
