//! Identity types for cardroom.
//!
//! Every id is an opaque string so that it can double as a path segment in
//! the replicated store and be produced by any client implementation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters that cannot appear in a store path segment.
const FORBIDDEN_KEY_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Check whether a string can be used as a single store path segment.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(FORBIDDEN_KEY_CHARS)
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Pre-shared identifier of a room.
    RoomId
}

string_id! {
    /// Identifier of a player, which is also its peer id on the mesh.
    ///
    /// Ids are totally ordered; the lower id of a pair initiates the
    /// peer connection.
    ClientId
}

string_id! {
    /// Epoch token identifying one room session (`currentGameId`).
    ///
    /// Rotated on restart and round reset; every write that carries an
    /// expected epoch is compared against it.
    GameId
}

string_id! {
    /// Client-assigned, globally unique action id.
    ///
    /// The idempotency key for the action log and for peer ACKs.
    ActionId
}

string_id! {
    /// Token a client publishes in its presence record so peers can echo it.
    PingToken
}

impl GameId {
    /// Generate a fresh random epoch token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl ActionId {
    /// Generate a fresh random action id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl PingToken {
    /// Generate a fresh random ping token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}
