//! Process-wide session event broadcast.
//!
//! The forced-logout signal lives here: when a refresh cycle fails the
//! coordinator emits exactly one [`SessionEvent::ForcedLogout`], which the
//! session lifecycle (UI, CLI) observes to reset its state.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the broadcast channel; slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// The refresh endpoint rejected the session or could not be reached
    RefreshFailed,
    /// A refresh was needed but no token was stored
    MissingToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    LoggedIn,
    TokenRefreshed,
    LoggedOut,
    ForcedLogout { reason: LogoutReason },
}

impl SessionEvent {
    /// Stable event name, as used by listeners keyed on strings.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::LoggedIn => "auth:login",
            SessionEvent::TokenRefreshed => "auth:refreshed",
            SessionEvent::LoggedOut | SessionEvent::ForcedLogout { .. } => "auth:logout",
        }
    }
}

/// Sending half of the session event channel. Clones share the channel.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event. Having no listeners is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.tx.send(event.clone()).unwrap_or(0);
        debug!(event = event.name(), ?event, listeners, "Session event");
    }
}
