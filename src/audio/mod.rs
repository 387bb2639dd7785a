//! One-shot decode of a whole in-memory media chunk into mono 16 kHz `f32` samples.
//!
//! The chunker hands the transcriber a complete, self-contained blob per [`Chunk`](crate::types::Chunk)
//! (a fixed-bitrate slice, a buffered time window, or a muxed DASH fragment), so decoding
//! here is one-shot rather than the streaming pull-loop the underlying demux/decode/pipeline
//! modules were originally built for.

pub mod decode;
pub mod demux;
pub mod pipeline;

use std::io::Cursor;

use anyhow::{Result, bail};

use pipeline::{AudioPipeline, TARGET_SAMPLE_RATE};

/// Decode `raw` into mono 16 kHz `f32` samples, returning the samples and the container's
/// total duration in seconds (when the format reports one).
pub fn decode_to_mono16k(raw: &[u8], hint_extension: Option<&str>) -> Result<(Vec<f32>, f64)> {
    let source = Box::new(Cursor::new(raw.to_vec()));
    let (mut format, track) =
        demux::probe_source_and_pick_default_track(source, hint_extension)?;

    let time_base = track.codec_params.time_base;
    let n_frames = track.codec_params.n_frames;
    let duration_seconds = match (time_base, n_frames) {
        (Some(tb), Some(frames)) => {
            let t = tb.calc_time(frames);
            t.seconds as f64 + t.frac
        }
        _ => 0.0,
    };

    let mut decoder = decode::make_decoder_for_track(&track)?;
    let mut pipeline = AudioPipeline::new();

    while let Some(packet) = demux::next_packet(&mut format)? {
        if packet.track_id() != track.id {
            continue;
        }

        decode::decode_packet_and_then(&mut decoder, &packet, |decoded| {
            pipeline.push_decoded(&decoded)
        })?;
    }

    let out = pipeline.finish()?;

    Ok((out, duration_seconds))
}

/// Best-effort precise duration of `raw`: decode its audio track and divide the sample
/// count by the target rate (matches summing `frame.samples / frame.sample_rate` at the
/// source rate, since resampling preserves wall-clock duration); fall back to the
/// container's reported duration when no audio track decodes.
pub fn precise_duration_seconds(raw: &[u8], hint_extension: Option<&str>) -> Result<f64> {
    match decode_to_mono16k(raw, hint_extension) {
        Ok((samples, _)) if !samples.is_empty() => {
            Ok(samples.len() as f64 / TARGET_SAMPLE_RATE as f64)
        }
        _ => probe_duration_seconds(raw, hint_extension),
    }
}

/// Probe `raw` for its container duration in seconds, without decoding audio.
pub fn probe_duration_seconds(raw: &[u8], hint_extension: Option<&str>) -> Result<f64> {
    let source = Box::new(Cursor::new(raw.to_vec()));
    let (_, track) = demux::probe_source_and_pick_default_track(source, hint_extension)?;

    let (Some(tb), Some(frames)) = (track.codec_params.time_base, track.codec_params.n_frames)
    else {
        bail!("container does not report a duration");
    };

    let t = tb.calc_time(frames);
    Ok(t.seconds as f64 + t.frac)
}

/// Whether `raw` alone already contains both an audio and a video stream.
///
/// Used by the DASH chunker to recognize a fragment sequence that arrived as one combined
/// AV file rather than separate audio/video tracks, so it doesn't wait forever for a
/// second file that will never show up.
pub fn is_complete_av(raw: &[u8], hint_extension: Option<&str>) -> bool {
    let source = Box::new(Cursor::new(raw.to_vec()));
    demux::has_audio_and_video_tracks(source, hint_extension).unwrap_or(false)
}

pub const TARGET_SAMPLE_RATE_HZ: u32 = TARGET_SAMPLE_RATE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_to_mono16k_rejects_garbage_input() {
        let err = decode_to_mono16k(b"not a media file", None).unwrap_err();
        let _ = err.to_string();
    }
}
