//! Session-level services for Dicelink.
//!
//! 1. **Authentication**: signing and verifying envelopes against a shared
//!    session secret ([`MessageAuthenticator`], [`HmacAuthenticator`]).
//! 2. **Registry**: the explicit, owned table of hosted sessions and their
//!    members used by a relay hub ([`SessionRegistry`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Sync / relay hub (above)  ← verify envelopes, look up session members
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below)    ← NetworkMessage, SessionInfo, PeerInfo
//! ```

mod auth;
mod error;
mod registry;

pub use auth::{HmacAuthenticator, MessageAuthenticator, SECRET_LEN};
pub use error::SessionError;
pub use registry::{Departure, SessionRegistry};
