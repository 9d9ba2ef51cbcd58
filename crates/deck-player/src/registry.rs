//! Engine registry: one backend, initialized once, handing out distinct output channels.
//!
//! Channel ids come from a per-registry counter and are never reused, so two engines can
//! never collide on the same mixing channel. The process-wide registry behind
//! [`EngineRegistry::global`] is created on first use; [`EngineRegistry::install_global`]
//! lets a binary choose the backend before any engine exists.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::config::BackendConfig;
use crate::cpal_backend::CpalBackend;
use crate::error::DeckError;
use crate::output::{ChannelId, OutputBackend, OutputChannel};

pub struct EngineRegistry {
    backend: Arc<dyn OutputBackend>,
    init: OnceLock<Result<(), String>>,
    next_channel: AtomicU32,
    active: Mutex<BTreeSet<ChannelId>>,
}

static GLOBAL: OnceLock<Arc<EngineRegistry>> = OnceLock::new();

impl EngineRegistry {
    /// Create a standalone registry around `backend`.
    pub fn new(backend: Arc<dyn OutputBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            init: OnceLock::new(),
            next_channel: AtomicU32::new(0),
            active: Mutex::new(BTreeSet::new()),
        })
    }

    /// The process-wide registry, backed by the default cpal device if nothing was installed.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| Self::new(Arc::new(CpalBackend::new(BackendConfig::default()))))
            .clone()
    }

    /// Install `backend` as the process-wide registry.
    ///
    /// Only the first call (or the first `global()`) wins; later calls get the already
    /// installed registry back in `Err`.
    pub fn install_global(backend: Arc<dyn OutputBackend>) -> Result<Arc<Self>, Arc<Self>> {
        let mut installed = false;
        let registry = GLOBAL.get_or_init(|| {
            installed = true;
            Self::new(backend)
        });
        if installed {
            Ok(registry.clone())
        } else {
            Err(registry.clone())
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Initialize the backend exactly once.
    ///
    /// Concurrent callers block until the first initialization finishes. A failed
    /// initialization is remembered and reported to every later caller.
    pub fn ensure_backend_initialized(&self) -> Result<(), DeckError> {
        let outcome = self.init.get_or_init(|| {
            tracing::info!(backend = self.backend.name(), "initializing audio backend");
            self.backend.initialize().map_err(|e| {
                tracing::error!(backend = self.backend.name(), "backend init failed: {e:#}");
                format!("{e:#}")
            })
        });
        outcome.clone().map_err(DeckError::Backend)
    }

    /// Reserve a fresh channel id and open its output channel.
    ///
    /// The returned lease gives the channel back when dropped.
    pub fn acquire_channel(self: &Arc<Self>) -> Result<ChannelLease, DeckError> {
        self.ensure_backend_initialized()?;
        let id = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        let channel = self.backend.open_channel(id).map_err(DeckError::backend)?;
        self.active_guard().insert(id);
        tracing::info!(channel = %id, "output channel acquired");
        Ok(ChannelLease {
            id,
            channel,
            registry: self.clone(),
        })
    }

    /// Channels currently leased to live engines.
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.active_guard().iter().copied().collect()
    }

    fn release(&self, id: ChannelId) {
        self.active_guard().remove(&id);
        tracing::info!(channel = %id, "output channel released");
    }

    fn active_guard(&self) -> std::sync::MutexGuard<'_, BTreeSet<ChannelId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive use of one output channel.
///
/// Dropping the lease halts the channel before its id is returned to the registry.
pub struct ChannelLease {
    id: ChannelId,
    channel: Box<dyn OutputChannel>,
    registry: Arc<EngineRegistry>,
}

impl ChannelLease {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn channel(&self) -> &dyn OutputChannel {
        self.channel.as_ref()
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.channel.stop();
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use std::thread;

    #[test]
    fn channels_are_distinct_and_monotonic() {
        let backend = FakeBackend::new();
        let registry = EngineRegistry::new(backend.clone());

        let a = registry.acquire_channel().unwrap();
        let b = registry.acquire_channel().unwrap();
        assert!(b.id() > a.id());
        assert_eq!(registry.active_channels(), vec![a.id(), b.id()]);

        let released = a.id();
        drop(a);
        let c = registry.acquire_channel().unwrap();
        assert_ne!(c.id(), released);
        assert!(c.id() > b.id());
    }

    #[test]
    fn backend_initializes_once_across_threads() {
        let backend = FakeBackend::new();
        let registry = EngineRegistry::new(backend.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.acquire_channel().map(|lease| lease.id()))
            })
            .collect();
        let mut ids: Vec<ChannelId> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 8);
        assert_eq!(backend.init_calls(), 1);
    }

    #[test]
    fn failed_init_is_reported_to_every_caller() {
        let backend = FakeBackend::failing_init("no output device");
        let registry = EngineRegistry::new(backend.clone());

        assert_eq!(
            registry.ensure_backend_initialized(),
            Err(DeckError::Backend("no output device".to_string()))
        );
        assert!(matches!(registry.acquire_channel(), Err(DeckError::Backend(_))));
        assert_eq!(backend.init_calls(), 1);
    }

    #[test]
    fn dropping_lease_stops_channel_and_releases_id() {
        let backend = FakeBackend::new();
        let registry = EngineRegistry::new(backend.clone());

        let lease = registry.acquire_channel().unwrap();
        let id = lease.id();
        let fake = backend.channel(id);
        drop(lease);

        assert!(fake.stop_calls() >= 1);
        assert!(registry.active_channels().is_empty());
    }
}
