use party_shared::ConnectionId;
use thiserror::Error;

/// Failures surfaced to local callers
///
/// Network-origin problems never show up here; they are dropped or answered
/// with deny packets inside the multiplexer.
#[derive(Debug, Error)]
pub enum PartyError {
    #[error("{operation} is only available while hosting a party")]
    HostOnly { operation: &'static str },
    #[error("{operation} needs a connection to a party host")]
    NotConnected { operation: &'static str },
    #[error("no client with connection id {0}")]
    UnknownClient(ConnectionId),
    #[error("config error: {0}")]
    Config(String),
    #[error("party loop is no longer running")]
    ChannelClosed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PartyError>;
