//! Empirical per-provider byte rates used by the FixedBitrate chunker's cut threshold.
//!
//! Grounded on `worker_abstract.py::AbstractWorker.__init__`'s rate constants.

/// Bytes/second for a typical YouTube audio-only stream.
pub const YOUTUBE_AUDIO_BYTES_PER_SEC: u64 = 20_000;

/// Bytes/second for a typical Twitch audio-only stream.
pub const TWITCH_AUDIO_BYTES_PER_SEC: u64 = 25_540;

/// Pick the byte rate to use for `url`.
pub fn sample_rate_for_url(url: &str) -> u64 {
    if url.to_lowercase().contains("twitch.tv") {
        TWITCH_AUDIO_BYTES_PER_SEC
    } else {
        YOUTUBE_AUDIO_BYTES_PER_SEC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twitch_urls_use_twitch_rate() {
        assert_eq!(
            sample_rate_for_url("https://twitch.tv/someone"),
            TWITCH_AUDIO_BYTES_PER_SEC
        );
    }

    #[test]
    fn other_urls_use_youtube_rate() {
        assert_eq!(
            sample_rate_for_url("https://youtube.com/watch?v=x"),
            YOUTUBE_AUDIO_BYTES_PER_SEC
        );
    }
}
