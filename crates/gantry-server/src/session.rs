//! One streaming client's session.
//!
//! A session moves `Created -> Registered -> Active -> Closed`. `Closed` is
//! terminal; [`ChannelSession::close`] performs that transition at most once
//! and tears down the protocol connection as part of it.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use gantry_core::{Connection, SessionId};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Registered,
    Active,
    Closed,
}

pub struct ChannelSession {
    id: SessionId,
    state: Mutex<SessionState>,
    last_activity: Mutex<Instant>,
    connection: OnceLock<Arc<dyn Connection>>,
    closed: CancellationToken,
}

impl Default for ChannelSession {
    fn default() -> Self {
        Self::with_id(SessionId::new())
    }
}

impl ChannelSession {
    /// Mint a session with a fresh identifier.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::Created),
            last_activity: Mutex::new(Instant::now()),
            connection: OnceLock::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn mark_registered(&self) -> bool {
        self.transition(SessionState::Created, SessionState::Registered)
    }

    /// Record that the client completed a round trip with the protocol core.
    pub fn mark_active(&self) -> bool {
        self.transition(SessionState::Registered, SessionState::Active)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Bind the protocol connection. A session closed in the meantime closes
    /// the connection instead and returns `false`.
    pub fn install_connection(&self, connection: Arc<dyn Connection>) -> bool {
        if self.is_closed() {
            close_connection(&self.id, connection.as_ref());
            return false;
        }
        if self.connection.set(Arc::clone(&connection)).is_err() {
            return false;
        }
        // close() may have run between the check and the set
        if self.is_closed() {
            close_connection(&self.id, connection.as_ref());
            return false;
        }
        true
    }

    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.get().cloned()
    }

    /// Refresh last activity. Never moves the timestamp backwards.
    pub fn touch(&self, now: Instant) {
        let mut last = self.last_activity.lock();
        if now > *last {
            *last = now;
        }
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Transition to `Closed`. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return false;
            }
            *state = SessionState::Closed;
        }
        self.closed.cancel();
        if let Some(connection) = self.connection.get() {
            close_connection(&self.id, connection.as_ref());
        }
        debug!(session_id = %self.id, "session closed");
        true
    }

    /// Token cancelled when the session closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

fn close_connection(id: &SessionId, connection: &dyn Connection) {
    if let Err(e) = connection.close() {
        warn!(session_id = %id, error = %e, "error closing protocol connection");
    }
}
