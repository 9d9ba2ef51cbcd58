//! Track decoding with Symphonia.
//!
//! [`open_track`] probes the file on the caller's thread, so an unreadable or unsupported
//! file fails immediately, then decodes packets on a background thread into a bounded
//! [`SampleQueue`].

use std::fs::File;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::catalog::Track;
use crate::queue::{SampleQueue, capacity_for};

/// A track being decoded in the background.
pub struct DecodedTrack {
    pub spec: SignalSpec,
    pub queue: Arc<SampleQueue>,
    worker: JoinHandle<Result<()>>,
}

impl DecodedTrack {
    /// Wait for the decode thread and surface the error that ended it early, if any.
    ///
    /// Closing the queue first makes a blocked decoder return promptly.
    pub fn finish(self) -> Result<()> {
        self.queue.close();
        self.worker
            .join()
            .map_err(|_| anyhow!("decoder thread panicked"))?
    }
}

/// Probe `track` and start decoding it into a queue sized for `buffer_seconds`.
pub fn open_track(track: &Track, buffer_seconds: f32) -> Result<DecodedTrack> {
    let path = track.path();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;

    let mut hint = Hint::new();
    if let Some(ext) = track.extension() {
        hint.with_extension(&ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("probe {}", track.display_name()))?;
    let format = probed.format;

    let codec_track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;
    let params = codec_track.codec_params.clone();
    let channels = params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout"))?;
    let rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;
    let spec = SignalSpec::new(rate, channels);

    // Build the decoder here so unsupported codecs are reported by the caller.
    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .context("create decoder")?;

    let queue = Arc::new(SampleQueue::new(
        channels.count(),
        capacity_for(rate, channels.count(), buffer_seconds),
    ));

    tracing::debug!(
        track = %track.display_name(),
        rate_hz = rate,
        channels = channels.count(),
        duration_ms = ?duration_ms(&params),
        "track opened"
    );

    let out = queue.clone();
    let worker = thread::Builder::new()
        .name("deck-decode".to_string())
        .spawn(move || {
            let result = decode_packets(format, decoder, &out);
            if let Err(e) = &result {
                tracing::error!("decoder thread error: {e:#}");
            }
            out.close();
            result
        })
        .context("spawn decoder thread")?;

    Ok(DecodedTrack {
        spec,
        queue,
        worker,
    })
}

fn decode_packets(
    mut format: Box<dyn FormatReader>,
    mut decoder: Box<dyn symphonia::core::codecs::Decoder>,
    out: &SampleQueue,
) -> Result<()> {
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => return Ok(()),
            Err(e) => return Err(e).context("read packet"),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);

        if !out.push(sample_buf.samples()) {
            // Consumer went away.
            return Ok(());
        }
    }
}

/// Duration from codec metadata, when the container reports a frame count.
fn duration_ms(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    let rate = u64::from(params.sample_rate?);
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Take;
    use crate::testing::{fixture_tracks, wav_track};

    #[test]
    fn decodes_every_frame_of_a_wav() {
        let track = wav_track("decode-wav", 8_000, 2, 800);
        let decoded = open_track(&track, 1.0).unwrap();
        assert_eq!(decoded.spec.rate, 8_000);
        assert_eq!(decoded.spec.channels.count(), 2);

        let mut frames = 0;
        while let Some(chunk) = decoded.queue.pop(Take::UpTo(256)) {
            frames += chunk.len() / 2;
        }
        assert_eq!(frames, 800);
        decoded.finish().unwrap();
    }

    #[test]
    fn empty_file_fails_to_open() {
        let track = fixture_tracks("decode-empty", &["silence.mp3"]).remove(0);
        assert!(open_track(&track, 1.0).is_err());
    }

    #[test]
    fn finish_stops_a_blocked_decoder() {
        let track = wav_track("decode-cancel", 8_000, 1, 8_000);
        // Room for a fraction of the track, so the decoder blocks on a full queue.
        let decoded = open_track(&track, 0.01).unwrap();
        decoded.finish().unwrap();
    }

    #[test]
    fn duration_ms_needs_rate_and_frames() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_ms(&params), Some(2_000));
        params.sample_rate = Some(0);
        assert_eq!(duration_ms(&params), None);
    }
}
