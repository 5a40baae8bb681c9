use std::fmt;

use tokio::sync::mpsc;

use super::{report::StatsReport, types::StatsResult};

/// Lifecycle properties a peer connection exposes change notifications for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// ICE agent connectivity (`new`, `checking`, `connected`, ...).
    IceConnection,
    /// Aggregate connection state.
    Connection,
    /// ICE candidate gathering (`new`, `gathering`, `complete`).
    IceGathering,
    /// Offer/answer negotiation state.
    Signaling,
}

impl StateKind {
    /// All four observable properties, in binding order.
    pub const ALL: [StateKind; 4] = [
        StateKind::IceConnection,
        StateKind::Connection,
        StateKind::IceGathering,
        StateKind::Signaling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::IceConnection => "iceConnectionState",
            StateKind::Connection => "connectionState",
            StateKind::IceGathering => "iceGatheringState",
            StateKind::Signaling => "signalingState",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored peer-to-peer media connection.
///
/// This is the only capability the monitor needs from the media stack:
/// an asynchronous statistics snapshot and four observable lifecycle
/// properties. Implementations wrap whatever connection object the
/// application uses.
#[async_trait::async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// Requests a point-in-time statistics snapshot.
    ///
    /// May fail with any [`StatsError`](super::error::StatsError); the caller
    /// treats every failure as recoverable.
    async fn get_stats(&self) -> StatsResult<StatsReport>;

    /// Registers for change notifications of one lifecycle property.
    ///
    /// Each call returns an independent receiver that yields every new state
    /// in the order the changes happened; nothing is coalesced. Dropping the
    /// receiver deregisters it.
    fn subscribe_state(&self, kind: StateKind) -> mpsc::UnboundedReceiver<String>;
}
