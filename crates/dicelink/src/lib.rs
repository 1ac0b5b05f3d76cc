//! # Dicelink
//!
//! Peer-to-peer Yatzy sessions with a host-authoritative game state.
//!
//! One peer hosts a session; the others join it over the local network
//! ([`LanTransport`](dicelink_transport::LanTransport)) or through a relay
//! hub ([`RelayTransport`](dicelink_transport::RelayTransport)). Every
//! action is validated (signature, timing, rate limit, game rules) before
//! it touches the state, and when copies disagree the host's wins.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use dicelink::prelude::*;
//!
//! # async fn run() -> Result<(), DicelinkError> {
//! let node = GameNodeBuilder::new()
//!     .player_name("Bo")
//!     .lan(TransportConfig::default());
//! let sessions = node.discover(Duration::from_secs(3)).await?;
//! if let Some(session) = sessions.first() {
//!     node.join(session, None).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod node;

pub use error::DicelinkError;
pub use node::{GameNode, GameNodeBuilder};

pub use dicelink_protocol as protocol;
pub use dicelink_relay as relay;
pub use dicelink_session as session;
pub use dicelink_sync as sync;
pub use dicelink_transport as transport;

pub mod prelude {
    pub use crate::{DicelinkError, GameNode, GameNodeBuilder};
    pub use dicelink_protocol::{
        MessageBody, MessageKind, NetworkMessage, PeerId, PeerInfo,
        SessionInfo,
    };
    pub use dicelink_sync::{
        GameMode, GameState, Rejection, ScoreCategory, StateChanged,
        SyncConfig, SyncError,
    };
    pub use dicelink_transport::{
        LanTransport, PeerTransport, RelayTransport, TransportConfig,
        TransportError, TransportEvent,
    };
}
