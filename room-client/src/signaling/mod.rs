//! Signaling channel abstraction.
//!
//! The signaling relay is an external process; this crate only needs its
//! client side: join a room, exchange negotiation payloads, and relay peer
//! messages when no direct channel exists.

mod mock;

pub use mock::{MockSignaling, MockSignalingHub};

use async_trait::async_trait;
use room_types::{SignalingEvent, SignalingMessage};
use thiserror::Error;
use tokio::sync::mpsc;

/// Signaling errors.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// `send` before `connect` (or after `disconnect`).
    #[error("signaling not connected")]
    NotConnected,

    /// The relay refused or lost the message.
    #[error("signaling send failed: {0}")]
    SendFailed(String),

    /// Connecting to the relay failed.
    #[error("signaling connect failed: {0}")]
    ConnectFailed(String),
}

/// Client side of a signaling relay.
#[async_trait]
pub trait Signaling: Send + Sync + 'static {
    /// Connect; relay events are delivered on `events` until disconnect.
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<SignalingEvent>,
    ) -> Result<(), SignalingError>;

    /// Send one message to the relay.
    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError>;

    /// Leave the relay. Safe to call more than once.
    async fn disconnect(&self);
}
