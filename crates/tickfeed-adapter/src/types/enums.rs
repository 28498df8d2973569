/*
[INPUT]:  Protocol mode strings and connection lifecycle states
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - enumerations for subscriptions and lifecycle
[UPDATE]: When the protocol gains modes or lifecycle states change
*/

use std::fmt;

use serde::{Deserialize, Serialize};

/// Subscription fidelity for an instrument, ordered by payload richness.
///
/// A token carries at most one mode; setting a new mode replaces the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Last traded price only
    Ltp,
    /// LTP plus traded quantities, volume and OHLC
    Quote,
    /// Quote plus timestamps, open interest and market depth
    Full,
}

impl Mode {
    /// Wire string used in control frames
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Ltp => "ltp",
            Mode::Quote => "quote",
            Mode::Full => "full",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the streaming client, published on a `watch` channel.
///
/// `Closed` is terminal and only reached through an explicit stop or an
/// exhausted retry ceiling; all other states are re-enterable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Closed,
}

/// Why a session ended; drives the controller's reconnect decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Caller-initiated close; never reconnects
    Clean,
    /// Transport failure, protocol violation or server-initiated close
    Error,
    /// Liveness watchdog saw no inbound traffic in time
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseReason::Clean => "clean",
            CloseReason::Error => "error",
            CloseReason::Timeout => "timeout",
        };
        f.write_str(label)
    }
}
