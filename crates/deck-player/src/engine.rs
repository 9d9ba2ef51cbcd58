//! Playback engine: one output channel, one background loop, thread-safe controls.
//!
//! ## Locking
//! The playlist, current index, skip flag, state and volume live in one `Mutex` per
//! engine. Control calls and the background loop only hold it to read or decide. Loading a
//! track onto the channel happens with it released: the starter claims the track and volume
//! under the lock, calls `OutputChannel::play` unlocked, then re-locks to commit. A commit
//! is dropped (and the channel halted) when `stop()` ran in between. Starters serialize on
//! a second mutex, so `stop()` and the volume setters never wait behind a track load.
//!
//! ## Loop
//! While `Playing`, the loop starts the track at the current index, sleeps in
//! `poll_interval` steps until the channel goes idle (or a control call wakes it), then
//! re-takes the lock to decide whether to advance. Every track start bumps a generation
//! counter; when a control call (`skip`, `previous`, `play_track_at`) has started a track
//! pre-emptively, the loop adopts that track instead of starting another.
//!
//! `skip()` also raises the skip flag so that a natural end observed just before the skip
//! does not advance a second time. `previous()` and `play_track_at()` do not raise it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use deck_types::{EngineStatus, PlaybackEndReason, PlaybackState};

use crate::catalog::Track;
use crate::config::EngineConfig;
use crate::error::DeckError;
use crate::output::{ChannelId, EngineVolume, OutputChannel, validate_gain};
use crate::playlist::Playlist;
use crate::registry::{ChannelLease, EngineRegistry};

/// A playlist player bound to its own output channel.
///
/// Every method may be called from any thread. Dropping the engine stops playback and
/// joins the background loop before the output channel goes back to the registry.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct EngineInner {
    lease: ChannelLease,
    config: EngineConfig,
    shared: Mutex<Shared>,
    /// Held from claiming a track until it is committed. Taken before `shared`.
    starting: Mutex<()>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    loop_starts: AtomicU64,
}

struct Shared {
    playlist: Playlist,
    index: usize,
    state: PlaybackState,
    skip_requested: bool,
    volume: EngineVolume,
    current: Option<Track>,
    generation: u64,
    /// Bumped by every `stop()`; a load claimed before a stop is not committed.
    stops: u64,
    end_reason: Option<PlaybackEndReason>,
    last_error: Option<String>,
}

/// A track picked under the lock, to be loaded with the lock released.
struct Claim {
    track: Track,
    index: usize,
    volume: EngineVolume,
    stops: u64,
}

/// How a claimed track ended up.
#[derive(Debug, PartialEq, Eq)]
enum Launch {
    Started { index: usize, generation: u64 },
    /// `stop()` ran while the track was loading.
    Superseded,
}

/// What the loop does after the track it waited on went idle.
#[derive(Debug, PartialEq, Eq)]
enum AfterTrack {
    Exit,
    /// A control call already started the next track; wait on it.
    Adopt(u64),
    Start,
}

impl Shared {
    fn after_track(&mut self, waited_on: u64) -> AfterTrack {
        if !self.state.is_playing() {
            return AfterTrack::Exit;
        }
        if self.skip_requested {
            self.skip_requested = false;
            if self.generation != waited_on {
                return AfterTrack::Adopt(self.generation);
            }
            return AfterTrack::Start;
        }
        self.end_reason = Some(PlaybackEndReason::Eof);
        self.advance();
        AfterTrack::Start
    }

    fn advance(&mut self) {
        let len = self.playlist.len();
        if len > 0 {
            self.index = (self.index + 1) % len;
        }
    }
}

impl Engine {
    /// Build an engine on the process-wide registry with default settings.
    pub fn new(playlist: Playlist) -> Result<Self, DeckError> {
        Self::with_registry(&EngineRegistry::global(), playlist, EngineConfig::default())
    }

    /// Build an engine on `registry`, acquiring a fresh output channel.
    ///
    /// Fails only if the backend cannot initialize or open a channel, or if the configured
    /// default volume is not a finite number.
    pub fn with_registry(
        registry: &Arc<EngineRegistry>,
        playlist: Playlist,
        config: EngineConfig,
    ) -> Result<Self, DeckError> {
        let gain = validate_gain(config.default_volume)?;
        let lease = registry.acquire_channel()?;
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        tracing::info!(
            channel = %lease.id(),
            tracks = playlist.len(),
            "engine created"
        );
        let inner = EngineInner {
            lease,
            config,
            shared: Mutex::new(Shared {
                playlist,
                index: 0,
                state: PlaybackState::Idle,
                skip_requested: false,
                volume: EngineVolume::both(gain),
                current: None,
                generation: 0,
                stops: 0,
                end_reason: None,
                last_error: None,
            }),
            starting: Mutex::new(()),
            wake_tx,
            wake_rx,
            loop_starts: AtomicU64::new(0),
        };
        Ok(Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.inner.id()
    }

    /// Start the background loop. No-op when already playing.
    pub fn play(&self) -> Result<(), DeckError> {
        let id = self.inner.id();
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let s = self.inner.lock();
            if s.state.is_playing() {
                tracing::info!(channel = %id, "already playing");
                return Ok(());
            }
        }

        // A previous loop has seen a non-playing state and is on its way out.
        if let Some(handle) = worker.take() {
            join_loop(id, handle);
        }

        let mut s = self.inner.lock();
        if s.playlist.is_empty() {
            tracing::warn!(channel = %id, "cannot play an empty playlist");
            return Err(DeckError::EmptyPlaylist);
        }
        s.state = PlaybackState::Playing;
        s.skip_requested = false;
        s.last_error = None;

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("deck-engine-{}", id.get()))
            .spawn(move || inner.run_loop());
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                let starts = self.inner.loop_starts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(channel = %id, index = s.index, loop_starts = starts, "starting playback");
                Ok(())
            }
            Err(e) => {
                s.state = PlaybackState::Stopped;
                tracing::error!(channel = %id, "failed to spawn playback loop: {e}");
                Err(DeckError::Backend(format!("spawn playback loop: {e}")))
            }
        }
    }

    /// Halt output now and let the background loop exit.
    ///
    /// Audio has ceased when this returns. Stopping an engine that never played is a no-op.
    pub fn stop(&self) {
        let id = self.inner.id();
        let mut s = self.inner.lock();
        match s.state {
            PlaybackState::Idle => {
                tracing::debug!(channel = %id, "stop ignored: never started");
                return;
            }
            PlaybackState::Stopped => {
                tracing::debug!(channel = %id, "already stopped");
            }
            PlaybackState::Playing => {
                s.state = PlaybackState::Stopped;
                s.skip_requested = false;
                s.stops += 1;
                s.end_reason = Some(PlaybackEndReason::Stopped);
                self.inner.channel().stop();
                s.current = None;
                tracing::info!(channel = %id, "playback stopped");
            }
        }
        drop(s);
        self.inner.wake();
    }

    /// Jump to the next track (wrapping) and start it immediately.
    ///
    /// Returns the new index.
    pub fn skip(&self) -> Result<usize, DeckError> {
        let _starting = self.inner.starting();
        let claim = {
            let mut s = self.inner.lock();
            self.inner.check_can_jump(&s)?;
            s.advance();
            s.skip_requested = true;
            tracing::info!(channel = %self.inner.id(), index = s.index, "skipping to next track");
            self.inner.claim(&s)?
        };
        self.inner.jump_to(claim)
    }

    /// Jump to the previous track (wrapping) and start it immediately.
    ///
    /// Unlike [`Engine::skip`] this does not suppress the loop's own end-of-track advance.
    pub fn previous(&self) -> Result<usize, DeckError> {
        let _starting = self.inner.starting();
        let claim = {
            let mut s = self.inner.lock();
            self.inner.check_can_jump(&s)?;
            let len = s.playlist.len();
            s.index = (s.index + len - 1) % len;
            tracing::info!(channel = %self.inner.id(), index = s.index, "going back to previous track");
            self.inner.claim(&s)?
        };
        self.inner.jump_to(claim)
    }

    /// Select the track the engine plays next. Does not start playback.
    pub fn set_index(&self, index: usize) -> Result<(), DeckError> {
        let mut s = self.inner.lock();
        s.playlist.check_index(index)?;
        s.index = index;
        tracing::info!(channel = %self.inner.id(), index, "index set");
        Ok(())
    }

    /// Select `index` and play it now, starting the engine if needed.
    pub fn play_track_at(&self, index: usize) -> Result<(), DeckError> {
        {
            let _starting = self.inner.starting();
            let claim = {
                let mut s = self.inner.lock();
                s.playlist.check_index(index)?;
                s.index = index;
                tracing::info!(channel = %self.inner.id(), index, "playing track at index");
                if s.state.is_playing() {
                    Some(self.inner.claim(&s)?)
                } else {
                    None
                }
            };
            if let Some(claim) = claim {
                return self.inner.jump_to(claim).map(|_| ());
            }
        }
        self.play()
    }

    /// Replace the playlist and rewind to its first track.
    ///
    /// A track already on the channel keeps playing; the loop continues from the new
    /// playlist when it ends.
    pub fn set_playlist(&self, playlist: Playlist) {
        let mut s = self.inner.lock();
        s.playlist = playlist;
        s.index = 0;
        tracing::info!(channel = %self.inner.id(), tracks = s.playlist.len(), "playlist set");
    }

    /// Set both gains. Out-of-range values are clamped; the applied volume is returned.
    pub fn set_volume(&self, gain: f32) -> Result<EngineVolume, DeckError> {
        let gain = validate_gain(gain)?;
        self.inner.update_volume("master", |v| *v = EngineVolume::both(gain))
    }

    /// Set the left gain, keeping the right one.
    pub fn set_left_volume(&self, gain: f32) -> Result<EngineVolume, DeckError> {
        let gain = validate_gain(gain)?;
        self.inner.update_volume("left", |v| v.left = gain)
    }

    /// Set the right gain, keeping the left one.
    pub fn set_right_volume(&self, gain: f32) -> Result<EngineVolume, DeckError> {
        let gain = validate_gain(gain)?;
        self.inner.update_volume("right", |v| v.right = gain)
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn current_index(&self) -> usize {
        self.inner.lock().index
    }

    pub fn volume(&self) -> EngineVolume {
        self.inner.lock().volume
    }

    pub fn current_track(&self) -> Option<Track> {
        self.inner.lock().current.clone()
    }

    pub fn playlist(&self) -> Playlist {
        self.inner.lock().playlist.clone()
    }

    /// Number of background loop instances started over the engine's lifetime.
    pub fn loop_starts(&self) -> u64 {
        self.inner.loop_starts.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        let s = self.inner.lock();
        EngineStatus {
            channel: self.inner.id().get(),
            state: s.state,
            index: s.index,
            playlist_len: s.playlist.len(),
            now_playing: s.current.as_ref().map(|t| t.path().display().to_string()),
            left_volume: s.volume.left,
            right_volume: s.volume.right,
            loop_starts: self.loop_starts(),
            end_reason: s.end_reason,
            last_error: s.last_error.clone(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            join_loop(self.inner.id(), handle);
        }
    }
}

fn join_loop(id: ChannelId, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!(channel = %id, "playback loop panicked");
    }
}

impl EngineInner {
    fn id(&self) -> ChannelId {
        self.lease.id()
    }

    fn channel(&self) -> &dyn OutputChannel {
        self.lease.channel()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn starting(&self) -> MutexGuard<'_, ()> {
        self.starting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn check_can_jump(&self, s: &Shared) -> Result<(), DeckError> {
        if !s.state.is_playing() {
            tracing::warn!(channel = %self.id(), "not playing; ignoring track change");
            return Err(DeckError::NotPlaying);
        }
        if s.playlist.is_empty() {
            tracing::warn!(channel = %self.id(), "playlist is empty; ignoring track change");
            return Err(DeckError::EmptyPlaylist);
        }
        Ok(())
    }

    /// Pick the track at the current index, with the volume it should start at.
    fn claim(&self, s: &Shared) -> Result<Claim, DeckError> {
        let track = s.playlist.get(s.index).cloned().ok_or(DeckError::EmptyPlaylist)?;
        Ok(Claim {
            track,
            index: s.index,
            volume: s.volume,
            stops: s.stops,
        })
    }

    /// Replace whatever is on the channel with `claim`, then commit it.
    ///
    /// Must be called with `starting` held and `shared` released. A load error for a
    /// track that is still wanted is returned after clearing `current`.
    fn launch(&self, claim: Claim) -> Result<Launch, DeckError> {
        self.channel().stop();
        tracing::info!(
            channel = %self.id(),
            index = claim.index,
            track = %claim.track.display_name(),
            "now playing"
        );
        let loaded = self.channel().play(&claim.track, claim.volume);

        let mut s = self.lock();
        if s.stops != claim.stops || !s.state.is_playing() {
            tracing::debug!(channel = %self.id(), index = claim.index, "stopped while loading");
            self.channel().stop();
            return Ok(Launch::Superseded);
        }
        if let Err(e) = loaded {
            s.current = None;
            return Err(DeckError::backend(e));
        }
        if s.volume != claim.volume {
            self.channel().set_volume(s.volume);
        }
        s.current = Some(claim.track);
        s.generation += 1;
        Ok(Launch::Started {
            index: claim.index,
            generation: s.generation,
        })
    }

    /// Launch a track for a control call and wake the loop so it adopts it.
    fn jump_to(&self, claim: Claim) -> Result<usize, DeckError> {
        let track = claim.track.display_name();
        let launched = self.launch(claim);
        self.wake();
        match launched {
            Ok(Launch::Started { index, .. }) => Ok(index),
            Ok(Launch::Superseded) => Err(DeckError::NotPlaying),
            Err(err) => {
                tracing::error!(channel = %self.id(), track = %track, "{err}");
                let mut s = self.lock();
                s.last_error = Some(err.to_string());
                s.end_reason = Some(PlaybackEndReason::Error);
                Err(err)
            }
        }
    }

    fn update_volume(
        &self,
        side: &'static str,
        apply: impl FnOnce(&mut EngineVolume),
    ) -> Result<EngineVolume, DeckError> {
        let mut s = self.lock();
        apply(&mut s.volume);
        let volume = s.volume;
        if s.current.is_some() {
            self.channel().set_volume(volume);
        }
        tracing::debug!(
            channel = %self.id(),
            side,
            left = volume.left,
            right = volume.right,
            "volume set"
        );
        Ok(volume)
    }

    /// Record a backend failure and stop; a later `play()` starts a fresh loop.
    fn fail_locked(&self, s: &mut Shared, message: String) {
        tracing::error!(channel = %self.id(), "error during playback: {message}");
        self.channel().stop();
        s.state = PlaybackState::Stopped;
        s.current = None;
        s.skip_requested = false;
        s.end_reason = Some(PlaybackEndReason::Error);
        s.last_error = Some(message);
    }

    /// Claim the track at the current index for the loop, or leave the loop.
    fn claim_next(&self, s: &mut Shared) -> Option<Claim> {
        if !s.state.is_playing() {
            return None;
        }
        if s.playlist.is_empty() {
            tracing::warn!(channel = %self.id(), "playlist became empty; stopping");
            s.state = PlaybackState::Stopped;
            s.current = None;
            return None;
        }
        self.claim(s).ok()
    }

    /// Load a claimed track for the loop. Returns the generation to wait on.
    ///
    /// A load failure is fatal to this loop instance.
    fn begin_track(&self, claim: Claim) -> Option<u64> {
        match self.launch(claim) {
            Ok(Launch::Started { generation, .. }) => Some(generation),
            Ok(Launch::Superseded) => None,
            Err(e) => {
                let mut s = self.lock();
                if s.state.is_playing() {
                    self.fail_locked(&mut s, e.to_string());
                }
                None
            }
        }
    }

    /// Sleep until the channel goes idle. Returns `false` when the loop should exit.
    ///
    /// Adopts tracks started by control calls while waiting.
    fn wait_for_track_end(&self, waiting_on: &mut u64) -> bool {
        loop {
            if !self.channel().is_busy() {
                return true;
            }
            match self.wake_rx.recv_timeout(self.config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
            let mut s = self.lock();
            if !s.state.is_playing() {
                return false;
            }
            if s.generation != *waiting_on {
                *waiting_on = s.generation;
                s.skip_requested = false;
            }
        }
    }

    fn run_loop(self: Arc<Self>) {
        let id = self.id();
        tracing::debug!(channel = %id, "playback loop entered");

        let first = {
            let _starting = self.starting();
            let claim = self.claim_next(&mut self.lock());
            claim.and_then(|claim| self.begin_track(claim))
        };
        let Some(mut waiting_on) = first else {
            tracing::debug!(channel = %id, "playback loop exited before first track");
            return;
        };

        loop {
            if !self.wait_for_track_end(&mut waiting_on) {
                break;
            }

            let _starting = self.starting();
            let claim = {
                let mut s = self.lock();
                if let Some(message) = self.channel().take_error() {
                    if s.state.is_playing() {
                        self.fail_locked(&mut s, message);
                    }
                    break;
                }
                match s.after_track(waiting_on) {
                    AfterTrack::Exit => break,
                    AfterTrack::Adopt(generation) => {
                        tracing::debug!(channel = %id, index = s.index, "adopting skipped-to track");
                        waiting_on = generation;
                        continue;
                    }
                    AfterTrack::Start => {
                        tracing::info!(channel = %id, index = s.index, "moving to track");
                        match self.claim_next(&mut s) {
                            Some(claim) => claim,
                            None => break,
                        }
                    }
                }
            };
            match self.begin_track(claim) {
                Some(generation) => waiting_on = generation,
                None => break,
            }
        }

        tracing::debug!(channel = %id, "playback loop exited");
    }
}
