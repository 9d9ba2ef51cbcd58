//! Ordered, mutable track sequence.
//!
//! Index-based mutations check `index < len` before touching anything and report
//! [`DeckError::InvalidIndex`] instead of mutating on a bad index.

use std::path::Path;

use crate::catalog::{self, Track};
use crate::error::DeckError;

/// Ordered list of tracks. Insertion order is significant and duplicates are allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Playlist {
    tracks: Vec<Track>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// Scan `folder` for audio files; see [`catalog::resolve`].
    pub fn from_folder(folder: &Path, sort_by_name: bool) -> Result<Self, DeckError> {
        catalog::resolve(folder, sort_by_name)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn add(&mut self, track: Track) {
        tracing::info!(track = %track.display_name(), "track added");
        self.tracks.push(track);
    }

    /// Remove the first track equal to `track`.
    ///
    /// Returns `false` (and logs) when no such track is present.
    pub fn remove(&mut self, track: &Track) -> bool {
        match self.tracks.iter().position(|t| t == track) {
            Some(pos) => {
                self.tracks.remove(pos);
                tracing::info!(track = %track.display_name(), "track removed");
                true
            }
            None => {
                tracing::warn!(track = %track.display_name(), "track not in playlist");
                false
            }
        }
    }

    /// Stable sort by base file name.
    pub fn sort_by_name(&mut self) {
        self.tracks.sort_by(|a, b| a.file_name().cmp(b.file_name()));
        tracing::info!(tracks = self.tracks.len(), "playlist sorted by file name");
    }

    /// Swap the tracks at `i` and `j`.
    pub fn exchange(&mut self, i: usize, j: usize) -> Result<(), DeckError> {
        self.check_index(i)?;
        self.check_index(j)?;
        self.tracks.swap(i, j);
        tracing::info!(i, j, "tracks exchanged");
        Ok(())
    }

    /// Remove the track at `from` and reinsert it at `to`.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), DeckError> {
        self.check_index(from)?;
        self.check_index(to)?;
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        tracing::info!(from, to, "track moved");
        Ok(())
    }

    pub(crate) fn check_index(&self, index: usize) -> Result<(), DeckError> {
        let len = self.tracks.len();
        if index < len {
            Ok(())
        } else {
            tracing::warn!(index, len, "invalid playlist index");
            Err(DeckError::InvalidIndex { index, len })
        }
    }
}

impl<'a> IntoIterator for &'a Playlist {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_tracks, names};

    #[test]
    fn exchange_swaps_entries() {
        let mut playlist = Playlist::from_tracks(fixture_tracks("exchange", &["a.mp3", "b.mp3", "c.mp3"]));
        playlist.exchange(0, 2).unwrap();
        assert_eq!(names(&playlist), vec!["c.mp3", "b.mp3", "a.mp3"]);
    }

    #[test]
    fn exchange_out_of_bounds_leaves_playlist_unchanged() {
        let mut playlist = Playlist::from_tracks(fixture_tracks("exchange-oob", &["a.mp3", "b.mp3"]));
        let before = playlist.clone();
        assert_eq!(
            playlist.exchange(0, 2),
            Err(DeckError::InvalidIndex { index: 2, len: 2 })
        );
        assert_eq!(playlist, before);
    }

    #[test]
    fn move_track_reinserts_at_target() {
        let mut playlist =
            Playlist::from_tracks(fixture_tracks("move", &["a.mp3", "b.mp3", "c.mp3", "d.mp3"]));
        playlist.move_track(0, 2).unwrap();
        assert_eq!(names(&playlist), vec!["b.mp3", "c.mp3", "a.mp3", "d.mp3"]);
        playlist.move_track(3, 0).unwrap();
        assert_eq!(names(&playlist), vec!["d.mp3", "b.mp3", "c.mp3", "a.mp3"]);
    }

    #[test]
    fn move_track_out_of_bounds_is_rejected() {
        let mut playlist = Playlist::from_tracks(fixture_tracks("move-oob", &["a.mp3"]));
        assert_eq!(
            playlist.move_track(5, 0),
            Err(DeckError::InvalidIndex { index: 5, len: 1 })
        );
        assert_eq!(names(&playlist), vec!["a.mp3"]);
    }

    #[test]
    fn remove_drops_first_match_only() {
        let tracks = fixture_tracks("remove", &["a.mp3", "b.mp3"]);
        let mut playlist = Playlist::new();
        playlist.add(tracks[0].clone());
        playlist.add(tracks[1].clone());
        playlist.add(tracks[0].clone());

        assert!(playlist.remove(&tracks[0]));
        assert_eq!(names(&playlist), vec!["b.mp3", "a.mp3"]);
    }

    #[test]
    fn remove_absent_track_is_soft_failure() {
        let tracks = fixture_tracks("remove-absent", &["a.mp3", "b.mp3"]);
        let mut playlist = Playlist::from_tracks(vec![tracks[0].clone()]);
        assert!(!playlist.remove(&tracks[1]));
        assert_eq!(playlist.len(), 1);
    }

    #[test]
    fn sort_by_name_orders_by_base_name() {
        let mut playlist =
            Playlist::from_tracks(fixture_tracks("sort", &["m.mp3", "b.wav", "x.flac"]));
        playlist.sort_by_name();
        assert_eq!(names(&playlist), vec!["b.wav", "m.mp3", "x.flac"]);
    }

    #[test]
    fn empty_playlist_reports_empty() {
        let playlist = Playlist::new();
        assert!(playlist.is_empty());
        assert!(playlist.get(0).is_none());
        assert_eq!(
            playlist.check_index(0),
            Err(DeckError::InvalidIndex { index: 0, len: 0 })
        );
    }
}
