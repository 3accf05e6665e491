//! # room-types
//!
//! Wire and record types shared by every cardroom crate.
//!
//! This crate provides:
//! - [`RoomId`], [`ClientId`], [`GameId`], [`ActionId`], [`PingToken`] - Identity types
//! - [`Action`], [`ActionRecord`] - Domain events and their durable form
//! - [`RoomMeta`], [`Presence`], [`RoomSnapshot`], [`DirectoryEntry`] - Store records
//! - [`PeerMessage`], [`SignalingMessage`], [`SignalingEvent`] - Wire messages
//! - [`TypesError`] - Encoding errors
//!
//! Store records serialize as camelCase JSON so that every client, whatever
//! it is written in, reads the same tree. Peer frames are MessagePack.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod action;
mod error;
mod ids;
mod messages;
mod room;

pub use action::{Action, ActionRecord};
pub use error::TypesError;
pub use ids::{is_valid_key, ActionId, ClientId, GameId, PingToken, RoomId};
pub use messages::{
    IceCandidate, PeerMessage, SdpKind, SessionDescription, SignalPayload, SignalingEvent,
    SignalingMessage,
};
pub use room::{
    DirectoryEntry, Presence, PresencePatch, Role, RoomMeta, RoomSnapshot, RoomStatus,
};
