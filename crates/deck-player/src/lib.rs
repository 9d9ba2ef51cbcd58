//! Multi-channel playlist playback.
//!
//! A [`catalog`] scan turns a folder into a [`Playlist`]; an [`Engine`] bound to that
//! playlist streams one track at a time on its own output channel, driven by a background
//! loop, while other threads issue control calls. The [`registry`] hands every engine a
//! distinct channel and initializes the audio backend once.

pub mod catalog;
pub mod config;
pub mod cpal_backend;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod playback;
pub mod playlist;
pub mod queue;
pub mod registry;
pub mod resample;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::Track;
pub use config::{BackendConfig, EngineConfig, PlaybackConfig};
pub use engine::Engine;
pub use error::DeckError;
pub use output::{ChannelId, EngineVolume, OutputBackend, OutputChannel};
pub use playlist::Playlist;
pub use registry::EngineRegistry;

pub use deck_types::{EngineStatus, PlaybackEndReason, PlaybackState};
