//! Session-layer messages carried inside compressed game packets
//!
//! A session frame is `[type][body]`. Chat bodies use a fixed layout
//! (`[spec_len][spec][utf-8 message]`) so older peers can relay them; every
//! other body is bincode. Frames travel LZ4-compressed with the uncompressed
//! size prepended.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::roster::Roster;
use crate::spec::PlayerSpec;

/// Largest uncompressed session frame we are willing to inflate
pub const MAX_SESSION_FRAME: usize = 64 * 1024;

const TYPE_KEEP_ALIVE: u8 = 0;
const TYPE_CLIENT_INFO: u8 = 1;
const TYPE_HOST_INFO: u8 = 2;
const TYPE_CHAT: u8 = 3;
const TYPE_ROSTER: u8 = 4;
const TYPE_SCREEN_MESSAGE: u8 = 5;
const TYPE_KICK_VOTE_REQUEST: u8 = 6;
const TYPE_GAME: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    KeepAlive,
    /// Sent by a client once accepted
    ClientInfo {
        spec: PlayerSpec,
        token: Option<String>,
        build_number: u32,
    },
    /// Host's reply to ClientInfo, re-sent when party details change
    HostInfo {
        party_name: String,
        build_number: u32,
    },
    /// `sender` is empty on client -> host chat; the host fills it in
    Chat {
        sender: Option<PlayerSpec>,
        message: String,
    },
    Roster(Roster),
    ScreenMessage(String),
    KickVoteRequest {
        target: u8,
    },
    /// Game state the party layer does not interpret
    Game(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
struct ClientInfoBody {
    spec: PlayerSpec,
    token: Option<String>,
    build_number: u32,
}

#[derive(Serialize, Deserialize)]
struct HostInfoBody {
    party_name: String,
    build_number: u32,
}

/// Cuts a chat line at its first newline
pub fn truncate_chat(message: &str) -> &str {
    match message.find('\n') {
        Some(pos) => &message[..pos],
        None => message,
    }
}

impl SessionMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(32);

        match self {
            SessionMessage::KeepAlive => buf.put_u8(TYPE_KEEP_ALIVE),
            SessionMessage::ClientInfo {
                spec,
                token,
                build_number,
            } => {
                buf.put_u8(TYPE_CLIENT_INFO);
                let body = ClientInfoBody {
                    spec: spec.clone(),
                    token: token.clone(),
                    build_number: *build_number,
                };
                buf.put_slice(&bincode::serialize(&body).unwrap_or_default());
            }
            SessionMessage::HostInfo {
                party_name,
                build_number,
            } => {
                buf.put_u8(TYPE_HOST_INFO);
                let body = HostInfoBody {
                    party_name: party_name.clone(),
                    build_number: *build_number,
                };
                buf.put_slice(&bincode::serialize(&body).unwrap_or_default());
            }
            SessionMessage::Chat { sender, message } => {
                buf.put_u8(TYPE_CHAT);
                let blob = sender
                    .as_ref()
                    .map(|spec| spec.normalized().to_blob())
                    .unwrap_or_default();
                buf.put_u8(blob.len() as u8);
                buf.put_slice(&blob);
                buf.put_slice(truncate_chat(message).as_bytes());
            }
            SessionMessage::Roster(roster) => {
                buf.put_u8(TYPE_ROSTER);
                buf.put_slice(&bincode::serialize(roster).unwrap_or_default());
            }
            SessionMessage::ScreenMessage(text) => {
                buf.put_u8(TYPE_SCREEN_MESSAGE);
                buf.put_slice(text.as_bytes());
            }
            SessionMessage::KickVoteRequest { target } => {
                buf.put_u8(TYPE_KICK_VOTE_REQUEST);
                buf.put_u8(*target);
            }
            SessionMessage::Game(payload) => {
                buf.put_u8(TYPE_GAME);
                buf.put_slice(payload);
            }
        }

        buf.to_vec()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut buf = data;
        if !buf.has_remaining() {
            return None;
        }

        let message = match buf.get_u8() {
            TYPE_KEEP_ALIVE => SessionMessage::KeepAlive,
            TYPE_CLIENT_INFO => {
                let body: ClientInfoBody = bincode::deserialize(buf).ok()?;
                SessionMessage::ClientInfo {
                    spec: body.spec,
                    token: body.token,
                    build_number: body.build_number,
                }
            }
            TYPE_HOST_INFO => {
                let body: HostInfoBody = bincode::deserialize(buf).ok()?;
                SessionMessage::HostInfo {
                    party_name: body.party_name,
                    build_number: body.build_number,
                }
            }
            TYPE_CHAT => {
                if !buf.has_remaining() {
                    return None;
                }
                let spec_len = buf.get_u8() as usize;
                if buf.remaining() < spec_len {
                    return None;
                }
                let sender = if spec_len == 0 {
                    None
                } else {
                    Some(PlayerSpec::from_blob(&buf[..spec_len])?)
                };
                buf.advance(spec_len);
                let text = std::str::from_utf8(buf).ok()?;
                SessionMessage::Chat {
                    sender,
                    message: truncate_chat(text).to_string(),
                }
            }
            TYPE_ROSTER => SessionMessage::Roster(bincode::deserialize(buf).ok()?),
            TYPE_SCREEN_MESSAGE => {
                SessionMessage::ScreenMessage(std::str::from_utf8(buf).ok()?.to_string())
            }
            TYPE_KICK_VOTE_REQUEST => {
                if !buf.has_remaining() {
                    return None;
                }
                SessionMessage::KickVoteRequest {
                    target: buf.get_u8(),
                }
            }
            TYPE_GAME => SessionMessage::Game(buf.to_vec()),
            _ => return None,
        };

        Some(message)
    }

    /// Encodes and compresses the frame for a game packet payload
    pub fn to_payload(&self) -> Vec<u8> {
        lz4_flex::compress_prepend_size(&self.encode())
    }

    /// Inflates and decodes a game packet payload
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        let claimed = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if claimed > MAX_SESSION_FRAME {
            return None;
        }
        let frame = lz4_flex::decompress_size_prepended(payload).ok()?;
        Self::decode(&frame)
    }
}
