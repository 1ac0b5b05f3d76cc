//! Relay hub for Dicelink.
//!
//! Peers that cannot reach each other on a LAN connect to a hub instead.
//! The hub keeps one [`SessionRegistry`](dicelink_session::SessionRegistry)
//! (owned by the [`RelayHub`], never global), answers session calls and
//! forwards game payloads between members without looking inside them.
//!
//! ```text
//! RelayTransport ──ws──→ RelayServer ──→ RelayHub ──→ SessionRegistry
//!                  ←── replies + pushes ──┘
//! ```

mod config;
mod error;
mod hub;
mod server;

pub use config::{RELAY_PORT, RelayConfig};
pub use error::RelayError;
pub use hub::{ClientSender, RelayHub};
pub use server::RelayServer;
