//! Connection lifecycle state.

use std::fmt;

/// Lifecycle of a push connection.
///
/// A connection manager holds exactly one of these and is its only writer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// Handshake or transport open in progress, or waiting for `hello`.
    Connecting,
    /// `hello` received; events are flowing.
    Connected,
    /// Waiting to retry after a lost transport.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Gave up. Only an explicit connect leaves this state.
    Failed {
        /// Last failure.
        reason: String,
    },
}

impl ConnectionState {
    /// Check if events are flowing.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if the manager is connected or working towards it.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting { .. }
        )
    }

    /// Check if the manager gave up.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }

    /// Stable label, used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {})", attempt)
            }
            ConnectionState::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}
