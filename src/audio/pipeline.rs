//! Downmixes and resamples decoded audio into mono 16 kHz `f32` samples.
//!
//! Every [`Chunk`](crate::types::Chunk) handed to the transcriber is a complete,
//! self-contained buffer, so this pipeline runs single-shot: push each decoded packet, call
//! [`AudioPipeline::finish`] once at end-of-stream, and take the accumulated samples.

use anyhow::{Context, Result, anyhow, bail};
use rubato::{Resampler, SincFixedIn, WindowFunction};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};

/// The target mono sample rate (Hz) every chunk is resampled to before transcription.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Accumulates decoded packets into one mono 16 kHz `f32` buffer.
pub struct AudioPipeline {
    sample_buf_f32: Option<SampleBuffer<f32>>,
    resampler: Option<SincFixedIn<f32>>,
    /// Mono samples at the source rate, buffered until there's a full resampler input block.
    mono_src_acc: Vec<f32>,
    output: Vec<f32>,
}

impl Default for AudioPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPipeline {
    pub fn new() -> Self {
        Self {
            sample_buf_f32: None,
            resampler: None,
            mono_src_acc: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Decode, downmix, and (if needed) resample one packet's worth of audio onto the
    /// accumulated output.
    pub fn push_decoded(&mut self, decoded: &AudioBufferRef<'_>) -> Result<()> {
        let (interleaved, src_rate, channels) =
            decoded_to_interleaved_f32(decoded, &mut self.sample_buf_f32)?;
        let mono = downmix_to_mono(&interleaved, channels);

        if src_rate == TARGET_SAMPLE_RATE {
            self.output.extend_from_slice(&mono);
            return Ok(());
        }

        self.ensure_resampler(src_rate)?;
        self.mono_src_acc.extend_from_slice(&mono);
        self.drain_full_blocks()
    }

    /// Flush any leftover resampler input (zero-padded to a full block) and return every
    /// sample pushed so far.
    pub fn finish(mut self) -> Result<Vec<f32>> {
        let Some(rs) = self.resampler.as_mut() else {
            return Ok(self.output);
        };

        if !self.mono_src_acc.is_empty() {
            let in_max = rs.input_frames_max();
            let rem = self.mono_src_acc.len() % in_max;
            if rem != 0 {
                self.mono_src_acc
                    .resize(self.mono_src_acc.len() + (in_max - rem), 0.0);
            }

            while !self.mono_src_acc.is_empty() {
                let block: Vec<f32> = self.mono_src_acc.drain(..in_max).collect();
                let resampled = resample_block(rs, &block)?;
                self.output.extend_from_slice(&resampled);
            }
        }

        Ok(self.output)
    }

    fn ensure_resampler(&mut self, src_rate: u32) -> Result<()> {
        if self.resampler.is_some() {
            return Ok(());
        }

        // Source frames fed into rubato per `process()` call.
        let in_chunk_src_frames = 2048;

        let rs = SincFixedIn::<f32>::new(
            TARGET_SAMPLE_RATE as f64 / src_rate as f64,
            2.0,
            rubato::SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: rubato::SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            in_chunk_src_frames,
            1, // mono
        )
        .map_err(|e| anyhow!(e))
        .context("failed to init resampler")?;

        self.resampler = Some(rs);
        Ok(())
    }

    fn drain_full_blocks(&mut self) -> Result<()> {
        loop {
            let rs = self
                .resampler
                .as_mut()
                .ok_or_else(|| anyhow!("resampler not initialized"))?;
            let in_max = rs.input_frames_max();

            if self.mono_src_acc.len() < in_max {
                break;
            }

            let block: Vec<f32> = self.mono_src_acc.drain(..in_max).collect();
            let resampled = resample_block(rs, &block)?;
            self.output.extend_from_slice(&resampled);
        }
        Ok(())
    }
}

fn resample_block(rs: &mut SincFixedIn<f32>, block: &[f32]) -> Result<Vec<f32>> {
    let input = vec![block.to_vec()];
    let out = rs
        .process(&input, None)
        .map_err(|e| anyhow!(e))
        .context("resampler process failed")?;

    if out.len() != 1 {
        bail!("expected mono output from resampler");
    }

    Ok(out.into_iter().next().expect("checked len == 1 above"))
}

fn decoded_to_interleaved_f32(
    decoded: &AudioBufferRef<'_>,
    sample_buf_f32: &mut Option<SampleBuffer<f32>>,
) -> Result<(Vec<f32>, u32, usize)> {
    ensure_sample_buffer(decoded, sample_buf_f32);

    let buf = sample_buf_f32
        .as_mut()
        .ok_or_else(|| anyhow!("sample buffer not initialized"))?;

    buf.copy_interleaved_ref(decoded.clone());

    let src_rate = decoded.spec().rate;
    let channels = decoded.spec().channels.count();
    if channels == 0 {
        bail!("decoded audio had zero channels");
    }

    Ok((buf.samples().to_vec(), src_rate, channels))
}

fn ensure_sample_buffer(decoded: &AudioBufferRef<'_>, sample_buf_f32: &mut Option<SampleBuffer<f32>>) {
    if sample_buf_f32.is_some() {
        return;
    }

    let spec = *decoded.spec();
    let duration = decoded.capacity() as u64;
    *sample_buf_f32 = Some(SampleBuffer::<f32>::new(duration, spec));
}

/// Downmix interleaved samples into mono by averaging channels equally.
fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);

    for f in 0..frames {
        let base = f * channels;
        let mut acc = 0.0;
        for c in 0..channels {
            acc += interleaved[base + c];
        }
        mono.push(acc / channels as f32);
    }

    mono
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_without_resampler_returns_whatever_was_pushed() -> anyhow::Result<()> {
        let pipeline = AudioPipeline::new();
        assert!(pipeline.finish()?.is_empty());
        Ok(())
    }

    #[test]
    fn downmix_to_mono_single_channel_is_identity() {
        let input = vec![0.0, 1.0, -1.0];
        let mono = downmix_to_mono(&input, 1);
        assert_eq!(mono, input);
    }

    #[test]
    fn downmix_to_mono_averages_channels() {
        // Two frames of stereo: (L=1, R=3), (L=-1, R=1) => mono: 2, 0
        let interleaved = vec![1.0, 3.0, -1.0, 1.0];
        let mono = downmix_to_mono(&interleaved, 2);
        assert_eq!(mono, vec![2.0, 0.0]);
    }

    #[test]
    fn resampled_path_accumulates_and_finish_flushes_remainder() -> anyhow::Result<()> {
        let mut pipeline = AudioPipeline::new();
        pipeline.ensure_resampler(8_000)?;
        pipeline.ensure_resampler(8_000)?; // idempotent

        let in_max = pipeline
            .resampler
            .as_ref()
            .expect("resampler initialized")
            .input_frames_max();

        // Enough samples to force multiple full blocks plus a remainder `finish()` flushes.
        let mono_src = vec![0.0; (in_max * 2) + 7];
        pipeline.mono_src_acc.extend_from_slice(&mono_src);
        pipeline.drain_full_blocks()?;

        assert!(pipeline.mono_src_acc.len() < in_max);

        let out = pipeline.finish()?;
        assert!(!out.is_empty());
        Ok(())
    }
}
