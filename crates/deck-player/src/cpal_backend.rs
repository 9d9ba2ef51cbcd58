//! Output backend on the host's cpal device.
//!
//! Every channel plays on its own cpal stream, so several engines mix on the same device
//! through the host's audio server. A channel runs at most one session thread at a time;
//! the thread owns the stream (cpal streams are not `Send` on every platform) and reports
//! whether it came up before `play` returns.
//!
//! The session slot is only locked to swap sessions, never while a track loads. Every
//! `play` and `stop` bumps an epoch; a session that comes up after a newer call is halted
//! instead of installed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::catalog::Track;
use crate::config::BackendConfig;
use crate::output::{ChannelId, EngineVolume, OutputBackend, OutputChannel};
use crate::playback::SessionFlags;
use crate::{decode, device, pipeline};

/// Backend that plays through cpal's default host.
pub struct CpalBackend {
    config: BackendConfig,
}

impl CpalBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn initialize(&self) -> Result<()> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, self.config.device.as_deref())?;
        let name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unnamed>".to_string());
        tracing::info!(host = ?host.id(), device = %name, "output device ready");
        Ok(())
    }

    fn open_channel(&self, id: ChannelId) -> Result<Box<dyn OutputChannel>> {
        Ok(Box::new(CpalChannel {
            id,
            config: self.config.clone(),
            session: Mutex::new(None),
            epoch: AtomicU64::new(0),
            error: Arc::new(Mutex::new(None)),
        }))
    }
}

struct Session {
    flags: Arc<SessionFlags>,
    join: JoinHandle<()>,
}

/// One engine's stream slot on the cpal device.
pub struct CpalChannel {
    id: ChannelId,
    config: BackendConfig,
    session: Mutex<Option<Session>>,
    epoch: AtomicU64,
    error: Arc<Mutex<Option<String>>>,
}

impl CpalChannel {
    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the running session out of its slot and wait for it to wind down.
    fn halt_current(&self) {
        let old = self.session().take();
        if let Some(old) = old {
            self.halt(old);
        }
    }

    fn halt(&self, session: Session) {
        session.flags.halt();
        if session.join.join().is_err() {
            tracing::error!(channel = %self.id, "playback session panicked");
        }
    }
}

impl OutputChannel for CpalChannel {
    fn play(&self, track: &Track, volume: EngineVolume) -> Result<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.halt_current();
        self.error_slot().take();

        let decoded = decode::open_track(track, self.config.playback.buffer_seconds)
            .with_context(|| format!("load {}", track.display_name()))?;

        let flags = Arc::new(SessionFlags::new(volume));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let device_name = self.config.device.clone();
        let playback = self.config.playback.clone();
        let session_flags = flags.clone();
        let error = self.error.clone();
        let id = self.id;

        let join = thread::Builder::new()
            .name(format!("deck-output-{}", id.get()))
            .spawn(move || {
                let result = pipeline::play_decoded(
                    device_name.as_deref(),
                    &playback,
                    decoded,
                    &session_flags,
                    |started| {
                        let _ = ready_tx.send(started);
                    },
                );
                if let Err(e) = result {
                    tracing::warn!(channel = %id, "playback ended with error: {e:#}");
                    *error.lock().unwrap_or_else(PoisonError::into_inner) = Some(format!("{e:#}"));
                }
                session_flags.finished.store(true, Ordering::SeqCst);
            })
            .context("spawn playback session")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                let started = Session { flags, join };
                let mut slot = self.session();
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    drop(slot);
                    tracing::debug!(channel = %self.id, "session superseded while starting");
                    self.halt(started);
                    return Ok(());
                }
                *slot = Some(started);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(anyhow!("playback session exited before starting"))
            }
        }
    }

    fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.halt_current();
    }

    fn is_busy(&self) -> bool {
        self.session()
            .as_ref()
            .is_some_and(|s| !s.flags.finished.load(Ordering::SeqCst))
    }

    fn set_volume(&self, volume: EngineVolume) {
        if let Some(session) = self.session().as_ref() {
            session.flags.gains.set(volume);
        }
    }

    fn take_error(&self) -> Option<String> {
        self.error_slot().take()
    }
}

impl Drop for CpalChannel {
    fn drop(&mut self) {
        self.halt_current();
    }
}
