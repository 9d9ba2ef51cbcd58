//! Session wiring: device + optional resampler + output stream, run until the track ends.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::decode::DecodedTrack;
use crate::playback::{self, SessionFlags};
use crate::queue::SampleQueue;
use crate::{device, resample};

const POLL: Duration = Duration::from_millis(20);
/// Upper bound for the callback to play out its last local buffer.
const PLAY_OUT_LIMIT: Duration = Duration::from_secs(1);

struct Output {
    stream: cpal::Stream,
    queue: Arc<SampleQueue>,
    resampler: Option<JoinHandle<Result<()>>>,
}

/// Play `decoded` on the selected device, blocking until it ends or `flags` cancels it.
///
/// `on_start` is told whether the stream came up; a failure there is not returned again.
/// The returned error is a failure that ended playback after it started. Tearing down
/// after a cancel is not an error.
pub fn play_decoded(
    device_name: Option<&str>,
    playback: &PlaybackConfig,
    decoded: DecodedTrack,
    flags: &Arc<SessionFlags>,
    on_start: impl FnOnce(Result<()>),
) -> Result<()> {
    let output = match start_output(device_name, playback, &decoded, flags) {
        Ok(output) => {
            on_start(Ok(()));
            output
        }
        Err(e) => {
            let _ = decoded.finish();
            on_start(Err(e));
            return Ok(());
        }
    };

    if output.queue.wait_drained(&flags.cancel, POLL) {
        let deadline = Instant::now() + PLAY_OUT_LIMIT;
        while !flags.exhausted.load(Ordering::Relaxed)
            && !flags.is_cancelled()
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
    }

    flags.paused.store(true, Ordering::Relaxed);
    drop(output.stream);
    output.queue.close();
    let resample_result = match output.resampler {
        Some(handle) => join_resampler(handle),
        None => Ok(()),
    };
    let decode_result = decoded.finish();

    if let Some(message) = flags.take_failure() {
        return Err(anyhow!(message));
    }
    if flags.is_cancelled() {
        return Ok(());
    }
    resample_result.context("resample")?;
    decode_result
}

fn join_resampler(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow!("resampler thread panicked"))?
}

fn start_output(
    device_name: Option<&str>,
    playback: &PlaybackConfig,
    decoded: &DecodedTrack,
    flags: &Arc<SessionFlags>,
) -> Result<Output> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let supported = device::pick_output_config(&device, decoded.spec.rate)?;
    let mut stream_config = supported.config();
    stream_config.buffer_size = device::pick_buffer_size(&supported);

    let dst_rate = stream_config.sample_rate;
    let (queue, resampler) = if decoded.spec.rate == dst_rate {
        tracing::debug!(rate_hz = dst_rate, "resample skipped");
        (decoded.queue.clone(), None)
    } else {
        tracing::debug!(from_hz = decoded.spec.rate, to_hz = dst_rate, "resampling");
        let (queue, handle) = resample::start_resampler(
            decoded.queue.clone(),
            decoded.spec.rate,
            dst_rate,
            playback.chunk_frames,
            playback.buffer_seconds,
        )?;
        (queue, Some(handle))
    };

    let started = playback::build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        &queue,
        playback.refill_max_frames,
        flags,
    )
    .context("build output stream")
    .and_then(|stream| {
        stream.play().context("start output stream")?;
        Ok(stream)
    });
    let stream = match started {
        Ok(stream) => stream,
        Err(e) => {
            // Unblock the resampler so it can exit.
            queue.close();
            return Err(e);
        }
    };

    tracing::debug!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = dst_rate,
        channels = stream_config.channels,
        "output stream started"
    );
    Ok(Output {
        stream,
        queue,
        resampler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resampler_error_is_returned() {
        let handle = thread::spawn(|| Err(anyhow!("resampler init: ratio out of range")));
        let err = join_resampler(handle).unwrap_err();
        assert!(err.to_string().contains("ratio out of range"));
    }

    #[test]
    fn resampler_panic_is_an_error() {
        let handle = thread::spawn(|| -> Result<()> { panic!("resampler blew up") });
        let err = join_resampler(handle).unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn clean_resampler_exit_is_ok() {
        let handle = thread::spawn(|| Ok(()));
        assert!(join_resampler(handle).is_ok());
    }
}
