//! Shared data model: the records that flow from watcher to chunker to transcriber to store.

use serde::{Deserialize, Serialize};

/// The kind of media a chunk (and its owning stream) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// No media is downloaded or uploaded for this key; transcript-only.
    None,
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::None => "none",
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot describing the result of one stream-liveness probe.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub url: String,
    pub is_live: bool,
    pub stream_id: String,
    /// Date-stripped stream title.
    pub stream_title: String,
    /// Seconds since epoch, kept as text because that's how it travels over the wire.
    pub start_time: String,
    pub key: String,
    pub media_type: MediaType,
}

impl StreamInfo {
    pub fn not_live(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_live: false,
            stream_id: String::new(),
            stream_title: String::new(),
            start_time: String::new(),
            key: String::new(),
            media_type: MediaType::None,
        }
    }
}

/// A unit of work handed from a chunker to the transcriber.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Raw media bytes. Empty when `media_type == MediaType::None`.
    pub raw: Vec<u8>,
    /// Wall-clock seconds at the start of this chunk (fractional).
    pub audio_start_time: f64,
    pub key: String,
    pub media_type: MediaType,
}

/// A single transcribed segment within a `TranscriptLine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub timestamp: i64,
    pub text: String,
}

/// One line of transcript, covering a single chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptLine {
    /// `-1` is the sentinel meaning "not yet assigned"; the store assigns the real id.
    pub id: i64,
    pub timestamp: i64,
    #[serde(default)]
    pub media_available: bool,
    pub segments: Vec<TranscriptSegment>,
}

impl TranscriptLine {
    pub fn new(timestamp: i64, segments: Vec<TranscriptSegment>) -> Self {
        Self {
            id: -1,
            timestamp,
            media_available: false,
            segments,
        }
    }

    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Per-key durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyState {
    pub active_id: String,
    pub active_title: String,
    pub start_time: String,
    pub media_type: MediaType,
    pub is_live: bool,
    pub transcript: Vec<TranscriptLine>,
}

impl KeyState {
    pub fn fresh(info: &StreamInfo) -> Self {
        Self {
            active_id: info.stream_id.clone(),
            active_title: info.stream_title.clone(),
            start_time: info.start_time.clone(),
            media_type: info.media_type,
            is_live: true,
            transcript: Vec::new(),
        }
    }

    pub fn last_id(&self) -> i64 {
        self.transcript.last().map(|l| l.id).unwrap_or(-1)
    }
}

/// A queued media upload, one per enqueued chunk with non-empty media.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub key: String,
    pub stream_id: String,
    pub line_id: i64,
    pub path: std::path::PathBuf,
}

/// Per-key DASH resume sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashState {
    pub stream_id: String,
    pub last_sequence: i64,
    pub current_stream_time: f64,
}

/// The `{version, build_time, keys[]}` payload pushed to `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub build_time: String,
    pub keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_state_last_id_defaults_to_negative_one() {
        let info = StreamInfo {
            url: "https://example.com".into(),
            is_live: true,
            stream_id: "X".into(),
            stream_title: "Title".into(),
            start_time: "0".into(),
            key: "k".into(),
            media_type: MediaType::Audio,
        };
        let state = KeyState::fresh(&info);
        assert_eq!(state.last_id(), -1);
    }

    #[test]
    fn joined_text_joins_with_space() {
        let line = TranscriptLine::new(
            1,
            vec![
                TranscriptSegment {
                    timestamp: 1,
                    text: "hello".into(),
                },
                TranscriptSegment {
                    timestamp: 2,
                    text: "world".into(),
                },
            ],
        );
        assert_eq!(line.joined_text(), "hello world");
    }
}
