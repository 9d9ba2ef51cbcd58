//! cpal output stream and its real-time callback.
//!
//! The callback refills a local buffer from the queue without blocking, applies the
//! engine's left/right gains and maps the result onto the device's channel layout.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::output::EngineVolume;
use crate::queue::{SampleQueue, Take};

/// Left/right gains readable from the audio callback without locking.
pub struct StereoGain {
    left: AtomicU32,
    right: AtomicU32,
}

impl StereoGain {
    pub fn new(volume: EngineVolume) -> Self {
        Self {
            left: AtomicU32::new(volume.left.to_bits()),
            right: AtomicU32::new(volume.right.to_bits()),
        }
    }

    pub fn set(&self, volume: EngineVolume) {
        self.left.store(volume.left.to_bits(), Ordering::Relaxed);
        self.right.store(volume.right.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> EngineVolume {
        EngineVolume {
            left: f32::from_bits(self.left.load(Ordering::Relaxed)),
            right: f32::from_bits(self.right.load(Ordering::Relaxed)),
        }
    }
}

/// State shared between one playback session, its cpal callback and the channel that owns it.
pub struct SessionFlags {
    /// Callback outputs silence and stops draining.
    pub paused: AtomicBool,
    /// Session should tear down.
    pub cancel: AtomicBool,
    /// Callback found the queue closed and its own buffer empty.
    pub exhausted: AtomicBool,
    /// Session thread has released the stream.
    pub finished: AtomicBool,
    pub gains: StereoGain,
    failure: Mutex<Option<String>>,
}

impl SessionFlags {
    pub fn new(volume: EngineVolume) -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            gains: StereoGain::new(volume),
            failure: Mutex::new(None),
        }
    }

    /// Silence output and ask the session to end.
    pub fn halt(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Record a stream failure and end the session. The first failure wins.
    pub fn fail(&self, message: String) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(message);
        }
        drop(slot);
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn take_failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Build a stream that plays `queue` (already at the device rate) through `device`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    refill_max_frames: usize,
    flags: &Arc<SessionFlags>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, refill_max_frames, flags),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, refill_max_frames, flags),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, refill_max_frames, flags),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, refill_max_frames, flags),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    refill_max_frames: usize,
    flags: &Arc<SessionFlags>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let out_channels = usize::from(config.channels).max(1);
    let src_channels = queue.channels();
    let refill = refill_max_frames.max(1);
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let queue_cb = queue.clone();
    let flags_cb = flags.clone();
    let flags_err = flags.clone();
    let mut local: Vec<f32> = Vec::new();
    let mut pos = 0usize;
    let mut frame_out = vec![0.0f32; out_channels];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if flags_cb.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let gains = flags_cb.gains.get();

            for frame in data.chunks_mut(out_channels) {
                if pos >= local.len() {
                    pos = 0;
                    match queue_cb.pop(Take::Available(refill)) {
                        Some(chunk) => local = chunk,
                        None => {
                            local.clear();
                            if queue_cb.is_closed() {
                                flags_cb.exhausted.store(true, Ordering::Relaxed);
                            }
                            frame.fill(silence);
                            continue;
                        }
                    }
                }
                render_frame(&local[pos..pos + src_channels], gains, &mut frame_out);
                pos += src_channels;
                for (dst, sample) in frame.iter_mut().zip(&frame_out) {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(*sample);
                }
            }
        },
        move |err| {
            tracing::warn!("stream error: {err}");
            flags_err.fail(format!("output stream error: {err}"));
        },
        None,
    )?;
    Ok(stream)
}

/// Turn one source frame into one output frame.
///
/// The source is first reduced to a left/right pair (mono is duplicated, extra channels are
/// dropped), each side is scaled by its gain, and the pair is written to the device
/// layout: averaged for mono devices, left/right on the first two channels otherwise.
fn render_frame(src: &[f32], gains: EngineVolume, out: &mut [f32]) {
    let (left, right) = match src {
        [] => (0.0, 0.0),
        [mono] => (*mono, *mono),
        [l, r, ..] => (*l, *r),
    };
    let (left, right) = (left * gains.left, right * gains.right);

    out.fill(0.0);
    match out {
        [] => {}
        [mono] => *mono = 0.5 * (left + right),
        [l, r, ..] => {
            *l = left;
            *r = right;
        }
    }
}
