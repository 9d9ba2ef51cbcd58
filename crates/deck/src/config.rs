//! Config file loading and flag merging.
//!
//! Precedence is command-line flag, then config file, then built-in default.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use deck_player::{BackendConfig, EngineConfig, PlaybackConfig};
use serde::Deserialize;

use crate::cli::Args;

/// Config file schema.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeckConfig {
    /// Output device substring match.
    pub device: Option<String>,
    pub playback: Option<PlaybackSection>,
    pub engine: Option<EngineSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackSection {
    pub chunk_frames: Option<usize>,
    pub refill_max_frames: Option<usize>,
    pub buffer_seconds: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub default_volume: Option<f32>,
    pub poll_interval_ms: Option<u64>,
}

impl DeckConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }
}

/// Effective settings after merging.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendConfig,
    pub engine: EngineConfig,
}

pub fn resolve(args: &Args, file: &DeckConfig) -> Settings {
    let playback_file = file.playback.as_ref();
    let engine_file = file.engine.as_ref();
    let playback_default = PlaybackConfig::default();
    let engine_default = EngineConfig::default();

    let playback = PlaybackConfig {
        chunk_frames: args
            .chunk_frames
            .or(playback_file.and_then(|p| p.chunk_frames))
            .unwrap_or(playback_default.chunk_frames),
        refill_max_frames: args
            .refill_max_frames
            .or(playback_file.and_then(|p| p.refill_max_frames))
            .unwrap_or(playback_default.refill_max_frames),
        buffer_seconds: args
            .buffer_seconds
            .or(playback_file.and_then(|p| p.buffer_seconds))
            .unwrap_or(playback_default.buffer_seconds),
    };

    let engine = EngineConfig {
        default_volume: args
            .volume
            .or(engine_file.and_then(|e| e.default_volume))
            .unwrap_or(engine_default.default_volume),
        poll_interval: engine_file
            .and_then(|e| e.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(engine_default.poll_interval),
    };

    Settings {
        backend: BackendConfig {
            device: args.device.clone().or_else(|| file.device.clone()),
            playback,
        },
        engine,
    }
}
