//! Raw datagram format for the party protocol
//!
//! Every datagram starts with a one-byte tag followed by a tag-specific
//! payload. Multi-byte integers are big-endian. Anything that does not parse
//! cleanly decodes to `None` so callers can drop it without replying.

use bytes::{Buf, BufMut, BytesMut};

/// Leading byte of every party datagram
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTag {
    ClientRequest = 1,
    ClientAccept = 2,
    ClientDeny = 3,
    DenyPartyFull = 4,
    DenyAlreadyInParty = 5,
    DenyVersionMismatch = 6,
    DisconnectFromClientRequest = 7,
    DisconnectFromClientAck = 8,
    DisconnectFromHostRequest = 9,
    DisconnectFromHostAck = 10,
    ClientGamePacket = 11,
    HostGamePacket = 12,
}

impl PacketTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::ClientRequest,
            2 => Self::ClientAccept,
            3 => Self::ClientDeny,
            4 => Self::DenyPartyFull,
            5 => Self::DenyAlreadyInParty,
            6 => Self::DenyVersionMismatch,
            7 => Self::DisconnectFromClientRequest,
            8 => Self::DisconnectFromClientAck,
            9 => Self::DisconnectFromHostRequest,
            10 => Self::DisconnectFromHostAck,
            11 => Self::ClientGamePacket,
            12 => Self::HostGamePacket,
            _ => return None,
        })
    }
}

/// Why a host turned a ClientRequest down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Generic rejection understood by every protocol version
    Generic,
    PartyFull,
    AlreadyInParty,
    VersionMismatch,
}

impl DenyReason {
    fn tag(self) -> PacketTag {
        match self {
            DenyReason::Generic => PacketTag::ClientDeny,
            DenyReason::PartyFull => PacketTag::DenyPartyFull,
            DenyReason::AlreadyInParty => PacketTag::DenyAlreadyInParty,
            DenyReason::VersionMismatch => PacketTag::DenyVersionMismatch,
        }
    }
}

/// One decoded party datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ClientRequest {
        protocol_version: u16,
        request_id: u8,
        instance_uuid: String,
    },
    ClientAccept {
        connection_id: u8,
        request_id: u8,
    },
    Deny {
        reason: DenyReason,
        request_id: u8,
    },
    DisconnectFromClientRequest {
        connection_id: u8,
    },
    DisconnectFromClientAck {
        connection_id: u8,
    },
    DisconnectFromHostRequest {
        connection_id: u8,
    },
    DisconnectFromHostAck {
        connection_id: u8,
    },
    /// Compressed session payload travelling client -> host
    ClientGamePacket {
        connection_id: u8,
        payload: Vec<u8>,
    },
    /// Compressed session payload travelling host -> client
    HostGamePacket {
        request_id: u8,
        payload: Vec<u8>,
    },
}

impl Packet {
    pub fn tag(&self) -> PacketTag {
        match self {
            Packet::ClientRequest { .. } => PacketTag::ClientRequest,
            Packet::ClientAccept { .. } => PacketTag::ClientAccept,
            Packet::Deny { reason, .. } => reason.tag(),
            Packet::DisconnectFromClientRequest { .. } => PacketTag::DisconnectFromClientRequest,
            Packet::DisconnectFromClientAck { .. } => PacketTag::DisconnectFromClientAck,
            Packet::DisconnectFromHostRequest { .. } => PacketTag::DisconnectFromHostRequest,
            Packet::DisconnectFromHostAck { .. } => PacketTag::DisconnectFromHostAck,
            Packet::ClientGamePacket { .. } => PacketTag::ClientGamePacket,
            Packet::HostGamePacket { .. } => PacketTag::HostGamePacket,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(self.tag() as u8);

        match self {
            Packet::ClientRequest {
                protocol_version,
                request_id,
                instance_uuid,
            } => {
                buf.put_u16(*protocol_version);
                buf.put_u8(*request_id);
                buf.put_slice(instance_uuid.as_bytes());
            }
            Packet::ClientAccept {
                connection_id,
                request_id,
            } => {
                buf.put_u8(*connection_id);
                buf.put_u8(*request_id);
            }
            Packet::Deny { request_id, .. } => buf.put_u8(*request_id),
            Packet::DisconnectFromClientRequest { connection_id }
            | Packet::DisconnectFromClientAck { connection_id }
            | Packet::DisconnectFromHostRequest { connection_id }
            | Packet::DisconnectFromHostAck { connection_id } => buf.put_u8(*connection_id),
            Packet::ClientGamePacket {
                connection_id,
                payload,
            } => {
                buf.put_u8(*connection_id);
                buf.put_slice(payload);
            }
            Packet::HostGamePacket {
                request_id,
                payload,
            } => {
                buf.put_u8(*request_id);
                buf.put_slice(payload);
            }
        }

        buf.to_vec()
    }

    /// Parses a datagram; short, unknown or otherwise malformed input yields `None`
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut buf = data;
        if !buf.has_remaining() {
            return None;
        }
        let tag = PacketTag::from_byte(buf.get_u8())?;

        let packet = match tag {
            PacketTag::ClientRequest => {
                if buf.remaining() < 3 {
                    return None;
                }
                let protocol_version = buf.get_u16();
                let request_id = buf.get_u8();
                let instance_uuid = std::str::from_utf8(buf).ok()?.to_string();
                if instance_uuid.is_empty() {
                    return None;
                }
                Packet::ClientRequest {
                    protocol_version,
                    request_id,
                    instance_uuid,
                }
            }
            PacketTag::ClientAccept => {
                if buf.remaining() < 2 {
                    return None;
                }
                Packet::ClientAccept {
                    connection_id: buf.get_u8(),
                    request_id: buf.get_u8(),
                }
            }
            PacketTag::ClientDeny
            | PacketTag::DenyPartyFull
            | PacketTag::DenyAlreadyInParty
            | PacketTag::DenyVersionMismatch => {
                let reason = match tag {
                    PacketTag::DenyPartyFull => DenyReason::PartyFull,
                    PacketTag::DenyAlreadyInParty => DenyReason::AlreadyInParty,
                    PacketTag::DenyVersionMismatch => DenyReason::VersionMismatch,
                    _ => DenyReason::Generic,
                };
                Packet::Deny {
                    reason,
                    request_id: read_u8(&mut buf)?,
                }
            }
            PacketTag::DisconnectFromClientRequest => Packet::DisconnectFromClientRequest {
                connection_id: read_u8(&mut buf)?,
            },
            PacketTag::DisconnectFromClientAck => Packet::DisconnectFromClientAck {
                connection_id: read_u8(&mut buf)?,
            },
            PacketTag::DisconnectFromHostRequest => Packet::DisconnectFromHostRequest {
                connection_id: read_u8(&mut buf)?,
            },
            PacketTag::DisconnectFromHostAck => Packet::DisconnectFromHostAck {
                connection_id: read_u8(&mut buf)?,
            },
            PacketTag::ClientGamePacket => Packet::ClientGamePacket {
                connection_id: read_u8(&mut buf)?,
                payload: buf.to_vec(),
            },
            PacketTag::HostGamePacket => Packet::HostGamePacket {
                request_id: read_u8(&mut buf)?,
                payload: buf.to_vec(),
            },
        };

        Some(packet)
    }
}

fn read_u8(buf: &mut &[u8]) -> Option<u8> {
    if buf.has_remaining() {
        Some(buf.get_u8())
    } else {
        None
    }
}
