//! Protocol timers driven by the logic loop's periodic tick

use std::time::Duration;

/// Resend interval for an unanswered ClientRequest
pub const HANDSHAKE_RETRY: Duration = Duration::from_millis(1000);
/// Give up on a host that never answers
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Resend interval for an unacknowledged DisconnectFromClientRequest
pub const DISCONNECT_RETRY: Duration = Duration::from_millis(500);
/// Tear down locally even without an ack after this long
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
/// Silence after which a peer is considered gone
pub const PEER_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum spacing between roster broadcasts
pub const ROSTER_INTERVAL: Duration = Duration::from_millis(500);
pub const KICK_VOTE_DURATION: Duration = Duration::from_secs(30);
/// How long a client must wait between starting kick votes
pub const KICK_VOTE_COOLDOWN: Duration = Duration::from_secs(60);
/// Window for the per-client chat rate limit
pub const CHAT_WINDOW: Duration = Duration::from_secs(5);
pub const CHAT_MESSAGES_PER_WINDOW: usize = 5;
