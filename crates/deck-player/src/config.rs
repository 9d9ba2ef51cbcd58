use std::time::Duration;

/// Playback tuning parameters shared by decode/resample/output stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for queue sizing.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}

/// Settings for the cpal output backend.
#[derive(Clone, Debug, Default)]
pub struct BackendConfig {
    /// Output device substring match; `None` uses the host default device.
    pub device: Option<String>,
    pub playback: PlaybackConfig,
}

/// Per-engine behaviour.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Gain applied to both sides when the engine is created.
    pub default_volume: f32,
    /// Sleep increment while the background loop waits for a track to finish.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_volume: 1.0,
            poll_interval: Duration::from_millis(100),
        }
    }
}
