//! Track catalog: turn a folder into an ordered playlist of validated audio files.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use mime_guess::mime;

use crate::error::DeckError;
use crate::playlist::Playlist;

/// A validated reference to one playable audio file.
///
/// Only constructed through [`Track::from_path`], so every value points at an existing
/// regular file whose guessed media type is `audio/*`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Track {
    path: PathBuf,
    media_kind: String,
}

impl Track {
    /// Validate `path` and build a track from it.
    ///
    /// Fails with [`DeckError::UnrecognizedMedia`] when the path is not an existing file or
    /// its extension does not map to an audio MIME type.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, DeckError> {
        let path = path.into();
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "file does not exist");
            return Err(DeckError::UnrecognizedMedia(path));
        }
        match guess_audio_kind(&path) {
            Some(media_kind) => Ok(Self { path, media_kind }),
            None => {
                tracing::warn!(path = %path.display(), "file is not a recognized audio type");
                Err(DeckError::UnrecognizedMedia(path))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Guessed MIME type, e.g. `audio/mpeg`.
    pub fn media_kind(&self) -> &str {
        &self.media_kind
    }

    /// Base file name, used for sorting and log output.
    pub fn display_name(&self) -> String {
        self.file_name().to_string_lossy().into_owned()
    }

    pub(crate) fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or(self.path.as_os_str())
    }

    /// Lowercase extension, used as a decoder probe hint.
    pub(crate) fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase())
    }
}

/// Enumerate `folder` into a playlist of its audio files.
///
/// Entries that are not audio files are skipped with a warning. An existing folder with no
/// audio yields an empty playlist, which callers must check before building an engine.
/// When `sort_by_name` is set, tracks are ordered by base file name (stable, byte-wise).
pub fn resolve(folder: &Path, sort_by_name: bool) -> Result<Playlist, DeckError> {
    if !folder.is_dir() {
        tracing::warn!(path = %folder.display(), "path is not a valid folder");
        return Err(DeckError::InvalidPath(folder.to_path_buf()));
    }

    let entries = fs::read_dir(folder).map_err(|e| {
        tracing::warn!(path = %folder.display(), "read_dir failed: {e}");
        DeckError::InvalidPath(folder.to_path_buf())
    })?;

    let mut playlist = Playlist::new();
    let mut skipped = 0usize;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %folder.display(), "unreadable folder entry: {e}");
                skipped += 1;
                continue;
            }
        };
        match Track::from_path(entry.path()) {
            Ok(track) => playlist.add(track),
            Err(_) => skipped += 1,
        }
    }

    if sort_by_name {
        playlist.sort_by_name();
    }

    tracing::info!(
        path = %folder.display(),
        tracks = playlist.len(),
        skipped,
        "catalog resolved"
    );
    Ok(playlist)
}

fn guess_audio_kind(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .iter()
        .find(|m| m.type_() == mime::AUDIO)
        .map(|m| m.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "deck-catalog-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn resolve_keeps_audio_and_sorts_by_name() {
        let dir = scratch_dir("mixed");
        touch(&dir, "c.wav");
        touch(&dir, "b.txt");
        touch(&dir, "a.mp3");

        let playlist = resolve(&dir, true).unwrap();
        let names: Vec<String> = playlist.iter().map(Track::display_name).collect();
        assert_eq!(names, vec!["a.mp3", "c.wav"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_counts_only_audio_files() {
        let dir = scratch_dir("counts");
        for name in ["01.flac", "02.mp3", "03.ogg", "notes.txt", "cover.jpg"] {
            touch(&dir, name);
        }
        fs::create_dir_all(dir.join("nested.mp3")).unwrap();

        let playlist = resolve(&dir, false).unwrap();
        assert_eq!(playlist.len(), 3);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_sort_is_case_sensitive() {
        let dir = scratch_dir("case");
        touch(&dir, "beta.mp3");
        touch(&dir, "Zed.mp3");
        touch(&dir, "alpha.mp3");

        let playlist = resolve(&dir, true).unwrap();
        let names: Vec<String> = playlist.iter().map(Track::display_name).collect();
        assert_eq!(names, vec!["Zed.mp3", "alpha.mp3", "beta.mp3"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_empty_folder_is_empty_playlist_not_error() {
        let dir = scratch_dir("empty");
        touch(&dir, "readme.txt");

        let playlist = resolve(&dir, true).unwrap();
        assert!(playlist.is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_rejects_missing_folder() {
        let dir = std::env::temp_dir().join("deck-catalog-definitely-missing");
        let err = resolve(&dir, true).unwrap_err();
        assert_eq!(err, DeckError::InvalidPath(dir));
    }

    #[test]
    fn resolve_rejects_regular_file() {
        let dir = scratch_dir("file");
        let file = touch(&dir, "a.mp3");
        assert!(matches!(resolve(&file, true), Err(DeckError::InvalidPath(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn track_from_path_validates_existence_and_kind() {
        let dir = scratch_dir("track");
        let audio = touch(&dir, "song.mp3");
        let text = touch(&dir, "song.txt");

        let track = Track::from_path(&audio).unwrap();
        assert_eq!(track.media_kind(), "audio/mpeg");
        assert_eq!(track.display_name(), "song.mp3");
        assert_eq!(track.extension().as_deref(), Some("mp3"));

        assert_eq!(
            Track::from_path(&text),
            Err(DeckError::UnrecognizedMedia(text.clone()))
        );
        let missing = dir.join("gone.mp3");
        assert_eq!(
            Track::from_path(&missing),
            Err(DeckError::UnrecognizedMedia(missing.clone()))
        );

        fs::remove_dir_all(&dir).unwrap();
    }
}
