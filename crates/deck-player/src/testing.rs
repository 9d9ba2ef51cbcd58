//! Test doubles: an in-memory backend whose channels "play" until a test finishes them.
//!
//! Built for this crate's tests and, with the `testing` feature, for dependents' tests.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::catalog::Track;
use crate::output::{ChannelId, EngineVolume, OutputBackend, OutputChannel};
use crate::playlist::Playlist;

pub const WAIT: Duration = Duration::from_secs(5);

/// Create real (empty) audio files under a unique temp dir and return them as tracks.
pub fn fixture_tracks(tag: &str, names: &[&str]) -> Vec<Track> {
    let dir = std::env::temp_dir().join(format!(
        "deck-fixture-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    fs::create_dir_all(&dir).unwrap();
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, b"").unwrap();
            Track::from_path(path).unwrap()
        })
        .collect()
}

pub fn fixture_playlist(tag: &str, len: usize) -> Playlist {
    let names: Vec<String> = (0..len).map(|i| format!("{i:02}.mp3")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    Playlist::from_tracks(fixture_tracks(tag, &refs))
}

/// Write a silent 16-bit PCM WAV with `frames` frames and return it as a track.
pub fn wav_track(tag: &str, rate: u32, channels: u16, frames: u32) -> Track {
    let track = fixture_tracks(tag, &["tone.wav"]).remove(0);
    let block_align = channels * 2;
    let data_len = frames * u32::from(block_align);

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&rate.to_le_bytes());
    bytes.extend_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);

    fs::write(track.path(), bytes).unwrap();
    track
}

pub fn names(playlist: &Playlist) -> Vec<String> {
    playlist.iter().map(Track::display_name).collect()
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub struct FakeBackend {
    init_calls: AtomicUsize,
    init_error: Option<String>,
    channels: Mutex<HashMap<ChannelId, Arc<FakeChannel>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            init_calls: AtomicUsize::new(0),
            init_error: None,
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn failing_init(msg: &str) -> Arc<Self> {
        Arc::new(Self {
            init_calls: AtomicUsize::new(0),
            init_error: Some(msg.to_string()),
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn channel(&self, id: ChannelId) -> Arc<FakeChannel> {
        self.channels.lock().unwrap()[&id].clone()
    }
}

impl OutputBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn initialize(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the window for concurrent callers in the init-once test.
        std::thread::sleep(Duration::from_millis(10));
        match &self.init_error {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }

    fn open_channel(&self, id: ChannelId) -> Result<Box<dyn OutputChannel>> {
        let channel = Arc::new(FakeChannel::default());
        self.channels.lock().unwrap().insert(id, channel.clone());
        Ok(Box::new(channel))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FakeEvent {
    Play(String, EngineVolume),
    Stop,
    Volume(EngineVolume),
}

#[derive(Default)]
struct FakeState {
    busy: bool,
    events: Vec<FakeEvent>,
    fail_next_play: Option<String>,
    pending_error: Option<String>,
    load_delay: Duration,
}

#[derive(Default)]
pub struct FakeChannel {
    state: Mutex<FakeState>,
    changed: Condvar,
}

impl FakeChannel {
    /// Let the current track reach its natural end.
    pub fn finish_track(&self) {
        let mut st = self.state.lock().unwrap();
        st.busy = false;
        self.changed.notify_all();
    }

    /// End the current track with a playback error reported through `take_error`.
    pub fn fail_current(&self, msg: &str) {
        let mut st = self.state.lock().unwrap();
        st.busy = false;
        st.pending_error = Some(msg.to_string());
        self.changed.notify_all();
    }

    /// Make every `play` call take `delay` to load, like a slow decoder or device.
    pub fn set_load_delay(&self, delay: Duration) {
        self.state.lock().unwrap().load_delay = delay;
    }

    /// Make the next `play` call fail to load.
    pub fn fail_next_play(&self, msg: &str) {
        self.state.lock().unwrap().fail_next_play = Some(msg.to_string());
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Names of every track started on this channel, in order.
    pub fn plays(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FakeEvent::Play(name, _) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn stop_calls(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, FakeEvent::Stop))
            .count()
    }

    /// Block until at least `count` tracks have been started.
    pub fn wait_for_plays(&self, count: usize) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut st = self.state.lock().unwrap();
        loop {
            let plays = st
                .events
                .iter()
                .filter(|e| matches!(e, FakeEvent::Play(..)))
                .count();
            if plays >= count {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self.changed.wait_timeout(st, deadline - now).unwrap().0;
        }
    }
}

impl OutputChannel for Arc<FakeChannel> {
    fn play(&self, track: &Track, volume: EngineVolume) -> Result<()> {
        let delay = self.state.lock().unwrap().load_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut st = self.state.lock().unwrap();
        if let Some(msg) = st.fail_next_play.take() {
            st.busy = false;
            self.changed.notify_all();
            return Err(anyhow!("{msg}"));
        }
        st.busy = true;
        st.events.push(FakeEvent::Play(track.display_name(), volume));
        self.changed.notify_all();
        Ok(())
    }

    fn stop(&self) {
        let mut st = self.state.lock().unwrap();
        st.busy = false;
        st.events.push(FakeEvent::Stop);
        self.changed.notify_all();
    }

    fn is_busy(&self) -> bool {
        self.state.lock().unwrap().busy
    }

    fn set_volume(&self, volume: EngineVolume) {
        self.state.lock().unwrap().events.push(FakeEvent::Volume(volume));
    }

    fn take_error(&self) -> Option<String> {
        self.state.lock().unwrap().pending_error.take()
    }
}
