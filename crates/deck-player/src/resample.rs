//! Sample-rate conversion stage (Rubato).
//!
//! Runs between the decoder queue and the output queue when the device cannot play the
//! track at its native rate.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow, bail};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::queue::{SampleQueue, Take, capacity_for};

/// Resample `src` from `src_rate` to `dst_rate` on a background thread.
///
/// The returned queue closes once `src` is closed and drained, or when the output queue is
/// closed by the consumer. The thread's result carries any resampler failure; on failure
/// both queues are closed so neither side blocks.
pub fn start_resampler(
    src: Arc<SampleQueue>,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
    buffer_seconds: f32,
) -> Result<(Arc<SampleQueue>, JoinHandle<Result<()>>)> {
    if src_rate == 0 || dst_rate == 0 {
        bail!("cannot resample {src_rate} Hz to {dst_rate} Hz");
    }
    let channels = src.channels();
    let chunk = chunk_frames.max(1);
    let ratio = f64::from(dst_rate) / f64::from(src_rate);

    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: calculate_cutoff(128, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let dst = Arc::new(SampleQueue::new(
        channels,
        capacity_for(dst_rate, channels, buffer_seconds),
    ));
    let out = dst.clone();
    let out_frames = (chunk as f64 * ratio * 1.1).ceil() as usize + 64;

    let handle = thread::Builder::new()
        .name("deck-resample".to_string())
        .spawn(move || {
            let result = Async::<f32>::new_sinc(ratio, 1.1, &params, chunk, channels, FixedAsync::Input)
                .map_err(|e| anyhow!("resampler init: {e}"))
                .and_then(|resampler| {
                    let lead_in = resampler.output_delay();
                    let mut stage = Stage {
                        resampler: Box::new(resampler),
                        channels,
                        ratio,
                        scratch: vec![0.0; out_frames * channels],
                        lead_in,
                        frames_in: 0,
                        frames_out: 0,
                    };
                    stage.run(&src, &out, chunk)
                });
            if let Err(e) = &result {
                tracing::error!("resampler error: {e:#}");
                src.close();
            }
            out.close();
            result
        })
        .context("spawn resampler thread")?;

    tracing::debug!(src_rate, dst_rate, "resampler started");
    Ok((dst, handle))
}

struct Stage {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    ratio: f64,
    scratch: Vec<f32>,
    /// Output frames still to drop for the filter's start-up delay.
    lead_in: usize,
    frames_in: usize,
    frames_out: usize,
}

impl Stage {
    fn run(&mut self, src: &SampleQueue, out: &SampleQueue, chunk: usize) -> Result<()> {
        while let Some(block) = src.pop(Take::Exact(chunk)) {
            if !self.process(&block, None, out)? {
                return Ok(());
            }
        }
        // Whatever is left is shorter than a chunk.
        while let Some(tail) = src.pop(Take::UpTo(chunk)) {
            let frames = tail.len() / self.channels;
            if !self.process(&tail, Some(frames), out)? {
                return Ok(());
            }
        }
        self.flush(out, chunk)
    }

    /// Feed silence until the delayed end of the input has come out of the filter.
    fn flush(&mut self, out: &SampleQueue, chunk: usize) -> Result<()> {
        let silence = vec![0.0; chunk * self.channels];
        let per_round = ((chunk as f64 * self.ratio) as usize).max(1);
        let rounds = self.resampler.output_delay().div_ceil(per_round) + 4;
        for _ in 0..rounds {
            if self.frames_out >= self.expected_frames() {
                break;
            }
            if !self.process(&silence, Some(0), out)? {
                break;
            }
        }
        Ok(())
    }

    fn expected_frames(&self) -> usize {
        (self.frames_in as f64 * self.ratio).round() as usize
    }

    /// Resample one block into `out`. Returns `false` once `out` has been closed.
    fn process(
        &mut self,
        block: &[f32],
        partial_len: Option<usize>,
        out: &SampleQueue,
    ) -> Result<bool> {
        let frames = block.len() / self.channels;
        let input = InterleavedSlice::new(block, self.channels, frames)
            .map_err(|e| anyhow!("input buffer: {e}"))?;
        let capacity = self.scratch.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.scratch, self.channels, capacity)
            .map_err(|e| anyhow!("output buffer: {e}"))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_, produced) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| anyhow!("resample: {e}"))?;
        self.frames_in += partial_len.unwrap_or(frames);

        let skip = self.lead_in.min(produced);
        self.lead_in -= skip;
        let keep = (produced - skip).min(self.expected_frames().saturating_sub(self.frames_out));
        if keep == 0 {
            return Ok(true);
        }
        self.frames_out += keep;
        let start = skip * self.channels;
        Ok(out.push(&self.scratch[start..start + keep * self.channels]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_frame_count_when_upsampling() {
        let src = Arc::new(SampleQueue::new(2, 64_000));
        src.push(&vec![0.25; 4_000 * 2]);
        src.close();

        let (dst, handle) = start_resampler(src, 8_000, 16_000, 1024, 2.0).unwrap();
        let mut frames = 0;
        while let Some(chunk) = dst.pop(Take::UpTo(512)) {
            frames += chunk.len() / 2;
        }
        handle.join().unwrap().unwrap();

        // Filter delay trimmed at the head and flushed at the tail.
        assert!((7_990..=8_000).contains(&frames), "got {frames} frames");
    }

    #[test]
    fn closing_output_stops_the_stage() {
        let src = Arc::new(SampleQueue::new(1, 1_000_000));
        src.push(&vec![0.0; 200_000]);
        let (dst, handle) = start_resampler(src.clone(), 44_100, 48_000, 256, 0.01).unwrap();
        dst.close();
        src.close();
        handle.join().unwrap().unwrap();
        assert!(dst.is_closed());
    }

    #[test]
    fn downsampled_tail_is_not_cut_short() {
        let src = Arc::new(SampleQueue::new(1, 200_000));
        // Not a multiple of the chunk, so the partial tail and the flush both run.
        src.push(&vec![0.5; 44_100 + 300]);
        src.close();

        let (dst, handle) = start_resampler(src, 44_100, 22_050, 1024, 2.0).unwrap();
        let mut frames = 0;
        while let Some(chunk) = dst.pop(Take::UpTo(512)) {
            frames += chunk.len();
        }
        handle.join().unwrap().unwrap();
        assert!((22_190..=22_200).contains(&frames), "got {frames} frames");
    }

    #[test]
    fn zero_rate_is_rejected() {
        let src = Arc::new(SampleQueue::new(2, 1_000));
        let err = start_resampler(src.clone(), 0, 48_000, 1024, 1.0).unwrap_err();
        assert!(err.to_string().contains("0 Hz"));
        assert!(start_resampler(src, 48_000, 0, 1024, 1.0).is_err());
    }
}
