//! Peer transport abstraction for cardroom.
//!
//! This module hides the unreliable peer-to-peer transport (a browser data
//! channel, a QUIC stream, the in-memory mock) behind two traits and builds
//! the [`Mesh`] on top of them.
//!
//! # Design
//!
//! A [`PeerConnector`] opens one [`PeerConnection`] per remote peer. The
//! connection negotiates with the usual offer/answer/candidate exchange and
//! carries exactly one message channel. Connections report what happens to
//! them (local candidates, channel open/close, inbound frames) through a
//! [`PeerEvents`] handle, which feeds the mesh's event stream.
//!
//! ```text
//! RoomClient ──► Mesh ──► PeerConnection (one per peer) ──► network
//!                 │
//!                 └──► MeshEvent stream (signals to forward, channel state, frames)
//! ```

mod mesh;
mod mock;

pub use mesh::{Mesh, MeshEvent};
pub use mock::{MockConnection, MockConnector, MockNetwork};

use async_trait::async_trait;
use room_types::{ClientId, IceCandidate, SessionDescription, SignalPayload};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection exists for the peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(ClientId),

    /// Offer/answer negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The peer's channel is not open.
    #[error("channel not open")]
    ChannelNotOpen,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The mesh has been destroyed.
    #[error("mesh destroyed")]
    Destroyed,
}

/// Message channel state, as reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Negotiating or waiting for the remote channel.
    Connecting,
    /// Ready for traffic.
    Open,
    /// Shut down.
    Closed,
}

/// Reporting handle given to a connection when it is created.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    peer: ClientId,
    tx: mpsc::UnboundedSender<MeshEvent>,
}

impl PeerEvents {
    pub(crate) fn new(peer: ClientId, tx: mpsc::UnboundedSender<MeshEvent>) -> Self {
        Self { peer, tx }
    }

    /// The remote peer this handle reports for.
    pub fn peer(&self) -> &ClientId {
        &self.peer
    }

    /// A local candidate was gathered and must be signaled to the peer.
    pub fn local_candidate(&self, candidate: IceCandidate) {
        let _ = self.tx.send(MeshEvent::Signal {
            peer: self.peer.clone(),
            payload: SignalPayload::Candidate(candidate),
        });
    }

    /// The message channel opened.
    pub fn channel_open(&self) {
        let _ = self.tx.send(MeshEvent::ChannelOpen(self.peer.clone()));
    }

    /// The message channel closed.
    pub fn channel_closed(&self) {
        let _ = self.tx.send(MeshEvent::ChannelClosed(self.peer.clone()));
    }

    /// A frame arrived on the channel.
    pub fn message(&self, data: Vec<u8>) {
        let _ = self.tx.send(MeshEvent::Message {
            peer: self.peer.clone(),
            data,
        });
    }
}

/// One negotiated connection to a remote peer.
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// Create a local offer and install it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Create a local answer to the installed remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Install the remote description.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    /// Apply a remote candidate. Only valid once a remote description exists.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Create the message channel (initiator side only; the other side waits
    /// for the incoming channel).
    fn open_channel(&self);

    /// Current channel state.
    fn channel_state(&self) -> ChannelState;

    /// Send one frame. Delivery is not guaranteed.
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Tear down the connection.
    fn close(&self);
}

/// Factory for peer connections.
pub trait PeerConnector: Send + Sync + 'static {
    /// Connection type produced.
    type Connection: PeerConnection;

    /// Open a connection from `local` to `remote`.
    fn connect(
        &self,
        local: &ClientId,
        remote: &ClientId,
        events: PeerEvents,
    ) -> Result<Arc<Self::Connection>, TransportError>;
}
