//! # room-client
//!
//! Peer mesh, reliable delivery and per-join sessions for cardroom.
//!
//! ## Layers
//!
//! - [`transport`]: one channel per peer over a pluggable [`PeerConnector`]
//! - [`signaling`]: room membership, negotiation payloads and message relay
//! - [`RoomClient`]: ACK tracking, retry ladder, relay and sync fallback
//! - [`RoomSession`]: one room join (client, store subscription, heartbeat,
//!   local state), torn down on leave
//!
//! ## Example
//!
//! ```ignore
//! use cardroom_client::{JoinRequest, RoomSession, SessionConfig};
//!
//! let mut session = RoomSession::join(
//!     rules,
//!     store,
//!     JoinRequest { room_id, player, expected_players: 2 },
//!     connector,
//!     signaling,
//!     &SessionConfig::default(),
//! )
//! .await?;
//!
//! session.dispatch(action).await?;
//! while let Some(update) = session.next_update().await {
//!     redraw(session.state(), update);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod session;
pub mod signaling;
pub mod transport;

pub use client::{ClientError, ClientOptions, JoinMode, RoomClient, RoomEvent};
pub use config::{Config, ConfigError, SessionConfig};
pub use session::{DispatchOutcome, JoinRequest, RoomSession, SessionError, SessionUpdate};
pub use signaling::{MockSignaling, MockSignalingHub, Signaling, SignalingError};
pub use transport::{
    ChannelState, Mesh, MeshEvent, MockConnection, MockConnector, MockNetwork, PeerConnection,
    PeerConnector, PeerEvents, TransportError,
};
