//! Wire types shared by every party process
//!
//! - [`protocol`]: raw datagram tags and their fixed layouts
//! - [`session`]: messages tunnelled inside compressed game packets
//! - [`spec`]: the player identity blob attached to chat and roster entries
//! - [`roster`]: the party membership document broadcast by hosts

pub mod protocol;
pub mod roster;
pub mod session;
pub mod spec;

pub use protocol::{DenyReason, Packet, PacketTag};
pub use roster::{Roster, RosterEntry};
pub use session::{truncate_chat, SessionMessage};
pub use spec::PlayerSpec;

/// Protocol version spoken by default
pub const PROTOCOL_VERSION: u16 = 33;
/// Oldest version a client falls back to after a version-mismatch deny
pub const PROTOCOL_VERSION_MIN: u16 = 32;
/// Build number reported in HostInfo/ClientInfo
pub const BUILD_NUMBER: u32 = 21_000;
pub const DEFAULT_PORT: u16 = 43210;

/// Size of the ConnectionID space
pub const MAX_CONNECTIONS: usize = 256;

/// Small reusable identifier of a client as seen by its host
pub type ConnectionId = u8;
/// Per-attempt identifier carried by handshake replies and host game packets
pub type RequestId = u8;
