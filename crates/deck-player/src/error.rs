use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by catalog, playlist and engine operations.
///
/// Everything except [`DeckError::InvalidPath`] and a backend that cannot initialize is
/// recoverable: the operation leaves state unchanged and the condition is also logged.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeckError {
    #[error("index {index} is out of bounds for a playlist of {len} tracks")]
    InvalidIndex { index: usize, len: usize },

    #[error("not a directory: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("not a recognized audio file: {}", .0.display())]
    UnrecognizedMedia(PathBuf),

    #[error("audio backend failure: {0}")]
    Backend(String),

    #[error("playlist is empty")]
    EmptyPlaylist,

    #[error("engine is not playing")]
    NotPlaying,

    #[error("volume must be a finite number, got {0}")]
    InvalidVolume(f32),
}

impl DeckError {
    /// Wrap an `anyhow` chain from the backend, keeping every context layer.
    pub(crate) fn backend(err: anyhow::Error) -> Self {
        DeckError::Backend(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_keeps_context_chain() {
        let err = anyhow::anyhow!("device unplugged").context("open stream");
        let wrapped = DeckError::backend(err);
        assert_eq!(
            wrapped,
            DeckError::Backend("open stream: device unplugged".to_string())
        );
    }

    #[test]
    fn invalid_index_message_names_bounds() {
        let err = DeckError::InvalidIndex { index: 7, len: 3 };
        assert_eq!(
            err.to_string(),
            "index 7 is out of bounds for a playlist of 3 tracks"
        );
    }
}
