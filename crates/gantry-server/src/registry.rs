//! Concurrent table of live channel sessions.
//!
//! The registry is the only place sessions are looked up. Removal closes the
//! session, so every path that drops an entry (client disconnect, reaper
//! eviction, shutdown) goes through the same `Closed` transition.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gantry_core::SessionId;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::reaper::{self, ReaperConfig, ReaperHandle};
use crate::session::ChannelSession;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session {0} is already registered")]
    Duplicate(SessionId),
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<ChannelSession>>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` and move it to `Registered`. An occupied id is
    /// rejected and the existing entry is left untouched.
    pub fn register(&self, session: Arc<ChannelSession>) -> Result<(), RegistryError> {
        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                session.mark_registered();
                entry.insert(session);
                Ok(())
            }
        }
    }

    /// Exact-match lookup.
    pub fn lookup(&self, id: &str) -> Option<Arc<ChannelSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Refresh a session's last activity. Returns `false` if absent.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.value().touch(Instant::now());
                true
            }
            None => false,
        }
    }

    /// Remove and close a session. Idempotent.
    pub fn remove(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        session.close();
        debug!(session_id = %id, remaining = self.sessions.len(), "session removed");
        true
    }

    /// Close and remove every session idle for longer than `threshold`.
    /// Returns how many were evicted.
    pub fn sweep(&self, now: Instant, threshold: Duration) -> usize {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now) > threshold)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in stale {
            // a deliver may have touched it since the scan
            let removed = self
                .sessions
                .remove_if(&id, |_, session| session.idle_for(now) > threshold);
            if let Some((_, session)) = removed {
                let idle = session.idle_for(now);
                session.close();
                info!(session_id = %id, idle_secs = idle.as_secs(), "evicted idle session");
                evicted += 1;
            }
        }
        evicted
    }

    /// Close and remove everything. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.remove(id.as_str())).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start the idle reaper, cancelling any reaper already running.
    pub fn start_reaper(self: &Arc<Self>, config: ReaperConfig) {
        let mut slot = self.reaper.lock();
        if let Some(previous) = slot.take() {
            previous.stop();
            debug!("replaced running reaper");
        }
        *slot = Some(reaper::spawn(Arc::downgrade(self), config));
    }

    /// Stop the reaper. Returns `false` if none was running.
    pub fn stop_reaper(&self) -> bool {
        match self.reaper.lock().take() {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn reaper_running(&self) -> bool {
        self.reaper.lock().as_ref().is_some_and(ReaperHandle::is_running)
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().take() {
            handle.stop();
        }
    }
}
