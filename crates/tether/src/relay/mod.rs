//! Outbound seam to the relay.
//!
//! The hub never talks to a socket directly; it hands [`OutboundEnvelope`]s
//! to a [`RelayTransport`]. The production implementation is the websocket
//! client in [`ws`], tests substitute a capturing stub.

use async_trait::async_trait;

use tether_protocol::OutboundEnvelope;

pub mod ws;

pub use ws::WsRelay;

/// Hub-side view of the relay connection.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Queue an envelope for delivery. Errors are reported, not retried; the
    /// relay redelivers state via the normal reconnect flow.
    async fn send(&self, envelope: OutboundEnvelope) -> anyhow::Result<()>;

    /// Close the connection. Called once, at the end of shutdown.
    async fn disconnect(&self);
}
