use serde::{Deserialize, Serialize};

/// Lifecycle state of one playback engine.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Freshly constructed; no background loop has ever run.
    #[default]
    Idle,
    /// A background loop is advancing through the playlist.
    Playing,
    /// Playback was halted by `stop()` or by a backend failure.
    Stopped,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

/// Reason why the most recent track left the output channel.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of file.
    Eof,
    /// Decoder or output error interrupted playback.
    Error,
    /// Playback was explicitly stopped by a command.
    Stopped,
}

/// Point-in-time view of an engine, suitable for printing or serializing.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    /// Output channel assigned by the engine registry.
    pub channel: u32,
    /// Current lifecycle state.
    pub state: PlaybackState,
    /// Index into the playlist the engine will play (or is playing).
    pub index: usize,
    /// Playlist length at snapshot time.
    pub playlist_len: usize,
    /// Path of the track most recently loaded on the channel.
    pub now_playing: Option<String>,
    /// Left channel gain in `[0.0, 1.0]`.
    pub left_volume: f32,
    /// Right channel gain in `[0.0, 1.0]`.
    pub right_volume: f32,
    /// Number of background loop instances started so far.
    pub loop_starts: u64,
    /// Why the previous track ended, if one has ended.
    pub end_reason: Option<PlaybackEndReason>,
    /// Last backend failure message observed by the loop.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&PlaybackState::Playing).unwrap();
        assert_eq!(json, "\"playing\"");
        let back: PlaybackState = serde_json::from_str("\"stopped\"").unwrap();
        assert_eq!(back, PlaybackState::Stopped);
    }

    #[test]
    fn default_status_is_idle() {
        let status = EngineStatus::default();
        assert_eq!(status.state, PlaybackState::Idle);
        assert!(!status.state.is_playing());
        assert!(status.now_playing.is_none());
    }

    #[test]
    fn end_reason_roundtrips_through_status() {
        let status = EngineStatus {
            end_reason: Some(PlaybackEndReason::Eof),
            ..EngineStatus::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"end_reason\":\"eof\""));
    }
}
