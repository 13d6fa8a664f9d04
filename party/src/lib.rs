//! # Party Networking Library
//!
//! This library implements the host/client "party" layer of a multiplayer
//! game: one host process and up to 255 client processes exchanging
//! compressed game and chat packets over UDP, with moderation (kick votes,
//! bans, admin allow-list) and presence (roster, public party advertisement)
//! layered on top.
//!
//! ## Core Responsibilities
//!
//! ### Session Establishment
//! Clients join with a three-field handshake (protocol version, random
//! request id, stable instance uuid). Hosts answer retries idempotently and
//! hand out small ConnectionIDs that are reused only after a full trip of a
//! round-robin cursor.
//!
//! ### Teardown
//! Leaving is a two-phase exchange with acks on both sides. Requests for
//! peers that are already gone are still acked, so no side ever waits
//! forever.
//!
//! ### Session Traffic
//! Chat, rosters, keepalives and opaque game data travel as
//! [`party_shared::SessionMessage`]s inside LZ4-compressed game packets.
//!
//! ## Architecture Design
//!
//! ### Single Logic Context
//! All protocol state lives in one [`mux::ConnectionMux`] owned by one task.
//! Socket reading and writing happen on their own tasks and only talk to the
//! logic loop through channels, so nothing in the multiplexer needs a lock.
//!
//! ### Explicit Time
//! Every operation that depends on time takes `now: Instant`. The runtime
//! passes the wall clock; tests pass whatever instant they need.
//!
//! ## Module Organization
//!
//! - `mux`: handshake, dispatch, teardown, chat relay, kick votes, roster
//! - `peer` / `client_table`: connection objects and ConnectionID allocation
//! - `ban` / `kick_vote` / `chat` / `policy`: party policy state
//! - `network`: tokio runtime, flood gate, [`network::PartyHandle`]
//! - `config` / `error` / `timing`: configuration, errors, protocol timers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use party::config::PartyConfig;
//! use party::network::PartyNode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PartyConfig::default();
//!     let (node, handle, mut events) = PartyNode::bind(&config).await?;
//!     tokio::spawn(node.run());
//!
//!     // Join someone else's party; hosting needs no call at all
//!     handle.connect("192.168.1.20:43210".parse()?)?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod ban;
pub mod chat;
pub mod client_table;
pub mod config;
pub mod error;
pub mod events;
pub mod kick_vote;
pub mod mux;
pub mod network;
pub mod outbox;
pub mod peer;
pub mod policy;
pub mod timing;

pub use config::PartyConfig;
pub use error::{PartyError, Result};
pub use events::PartyEvent;
pub use mux::ConnectionMux;
pub use network::{PartyHandle, PartyNode};
pub use outbox::{OutboundPacket, Outbox};
