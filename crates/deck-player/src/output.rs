//! Output backend seam.
//!
//! An [`OutputBackend`] is initialized once per registry and opens one [`OutputChannel`]
//! per engine. The engine only ever talks to its own channel.

use std::fmt;

use anyhow::Result;

use crate::catalog::Track;
use crate::error::DeckError;

/// Identifier of one engine's output channel. Never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u32);

impl ChannelId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Independent left/right gains of one engine, each in `[0.0, 1.0]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineVolume {
    pub left: f32,
    pub right: f32,
}

impl EngineVolume {
    pub const FULL: EngineVolume = EngineVolume { left: 1.0, right: 1.0 };

    /// Same gain on both sides.
    pub fn both(gain: f32) -> Self {
        Self { left: gain, right: gain }
    }
}

impl Default for EngineVolume {
    fn default() -> Self {
        Self::FULL
    }
}

/// Validate a gain before it reaches a channel.
///
/// Non-finite values are rejected; finite values outside `[0.0, 1.0]` are clamped and
/// the clamp is logged.
pub fn validate_gain(gain: f32) -> Result<f32, DeckError> {
    if !gain.is_finite() {
        tracing::warn!(gain, "rejected non-finite volume");
        return Err(DeckError::InvalidVolume(gain));
    }
    let clamped = gain.clamp(0.0, 1.0);
    if clamped != gain {
        tracing::warn!(requested = gain, applied = clamped, "volume clamped");
    }
    Ok(clamped)
}

/// Audio backend shared by every engine of a registry.
pub trait OutputBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;
    /// One-time global setup. The registry guarantees a single call.
    fn initialize(&self) -> Result<()>;
    /// Open the channel an engine will play through.
    fn open_channel(&self, id: ChannelId) -> Result<Box<dyn OutputChannel>>;
}

/// One engine's playback resource.
///
/// All methods take `&self` and are called from both the engine's background loop and
/// control threads, so implementations synchronize internally.
pub trait OutputChannel: Send + Sync {
    /// Replace whatever is on the channel with `track` at `volume`.
    ///
    /// Returns once the track has been loaded and audio has started; load failures are
    /// reported here rather than later.
    fn play(&self, track: &Track, volume: EngineVolume) -> Result<()>;
    /// Halt output. Audio has ceased when this returns.
    fn stop(&self);
    /// `true` while a track is loaded and has not finished.
    fn is_busy(&self) -> bool;
    /// Apply gains to the track currently playing.
    fn set_volume(&self, volume: EngineVolume);
    /// Take the failure (if any) that ended the last track after `play` returned.
    fn take_error(&self) -> Option<String>;
}
