//! The two kinds of connection object the multiplexer owns
//!
//! A [`HostPeer`] is our view of the party we joined; a [`ClientPeer`] is a
//! host's view of one joined client. The multiplexer only talks to them
//! through the narrow [`Peer`] contract plus their handshake fields.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::debug;
use party_shared::{ConnectionId, Packet, PlayerSpec, RequestId, SessionMessage};

/// How a peer is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp(SocketAddr),
}

impl Transport {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Transport::Udp(addr) => *addr,
        }
    }
}

/// Contract between the multiplexer and a connection object
pub trait Peer {
    fn id(&self) -> Option<ConnectionId>;
    fn address(&self) -> SocketAddr;
    /// Inflates a game packet payload; the result is handed to the session layer
    fn handle_game_packet(&mut self, payload: &[u8], now: Instant) -> Option<SessionMessage>;
    /// Marks the peer as leaving and returns the request to put on the wire
    fn request_disconnect(&mut self, now: Instant) -> Packet;
    fn can_communicate(&self) -> bool;
}

/// Local side of a party we are joining or have joined
#[derive(Debug)]
pub struct HostPeer {
    transport: Transport,
    pub request_id: RequestId,
    /// Assigned by the host's ClientAccept
    pub client_id: Option<ConnectionId>,
    pub protocol_version: u16,
    /// Already retried with the older protocol version
    pub fell_back: bool,
    pub party_name: Option<String>,
    pub build_number: Option<u32>,
    pub started_at: Instant,
    pub last_request_sent: Instant,
    pub last_heard: Instant,
    pub last_keepalive: Instant,
    /// Set once we asked the host to let us go
    pub disconnect_started: Option<Instant>,
    pub last_disconnect_sent: Instant,
    pub packets_received: u64,
}

impl HostPeer {
    pub fn new(addr: SocketAddr, request_id: RequestId, protocol_version: u16, now: Instant) -> Self {
        Self {
            transport: Transport::Udp(addr),
            request_id,
            client_id: None,
            protocol_version,
            fell_back: false,
            party_name: None,
            build_number: None,
            started_at: now,
            last_request_sent: now,
            last_heard: now,
            last_keepalive: now,
            disconnect_started: None,
            last_disconnect_sent: now,
            packets_received: 0,
        }
    }

    pub fn handshake_request(&self, instance_uuid: &str) -> Packet {
        Packet::ClientRequest {
            protocol_version: self.protocol_version,
            request_id: self.request_id,
            instance_uuid: instance_uuid.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.client_id.is_some()
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnect_started.is_some()
    }

    /// Wraps a session message for the host; `None` until accepted
    pub fn game_packet(&self, message: &SessionMessage) -> Option<Packet> {
        self.client_id.map(|connection_id| Packet::ClientGamePacket {
            connection_id,
            payload: message.to_payload(),
        })
    }

    pub fn is_silent(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heard) > timeout
    }
}

impl Peer for HostPeer {
    fn id(&self) -> Option<ConnectionId> {
        self.client_id
    }

    fn address(&self) -> SocketAddr {
        self.transport.addr()
    }

    fn handle_game_packet(&mut self, payload: &[u8], now: Instant) -> Option<SessionMessage> {
        self.last_heard = now;
        self.packets_received += 1;
        let message = SessionMessage::from_payload(payload);
        if message.is_none() {
            debug!("Dropping undecodable payload from host {}", self.address());
        }
        message
    }

    fn request_disconnect(&mut self, now: Instant) -> Packet {
        if self.disconnect_started.is_none() {
            self.disconnect_started = Some(now);
        }
        self.last_disconnect_sent = now;
        Packet::DisconnectFromClientRequest {
            connection_id: self.client_id.unwrap_or_default(),
        }
    }

    fn can_communicate(&self) -> bool {
        self.is_accepted() && self.party_name.is_some() && !self.is_disconnecting()
    }
}

/// Host-side record of one joined client
#[derive(Debug)]
pub struct ClientPeer {
    pub connection_id: ConnectionId,
    pub instance_uuid: String,
    /// Request id of the latest accepted attempt; tags host -> client packets
    pub request_id: RequestId,
    transport: Transport,
    /// Flipped once ClientInfo arrives
    pub can_communicate: bool,
    pub spec: Option<PlayerSpec>,
    pub token: Option<String>,
    pub build_number: Option<u32>,
    pub joined_at: Instant,
    pub last_heard: Instant,
    pub last_keepalive: Instant,
    pub last_kick_vote_start: Option<Instant>,
    recent_chat: VecDeque<Instant>,
    pub chat_warned: bool,
}

impl ClientPeer {
    pub fn new(
        connection_id: ConnectionId,
        addr: SocketAddr,
        instance_uuid: &str,
        request_id: RequestId,
        now: Instant,
    ) -> Self {
        Self {
            connection_id,
            instance_uuid: instance_uuid.to_string(),
            request_id,
            transport: Transport::Udp(addr),
            can_communicate: false,
            spec: None,
            token: None,
            build_number: None,
            joined_at: now,
            last_heard: now,
            last_keepalive: now,
            last_kick_vote_start: None,
            recent_chat: VecDeque::new(),
            chat_warned: false,
        }
    }

    /// Follows a client that retried its request from a new address
    pub fn readdress(&mut self, addr: SocketAddr) {
        self.transport = Transport::Udp(addr);
    }

    pub fn display_name(&self) -> String {
        match &self.spec {
            Some(spec) => spec.display_name().to_string(),
            None => format!("Client {}", self.connection_id),
        }
    }

    pub fn game_packet(&self, message: &SessionMessage) -> Packet {
        Packet::HostGamePacket {
            request_id: self.request_id,
            payload: message.to_payload(),
        }
    }

    pub fn is_silent(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heard) > timeout
    }

    /// Records a chat line; false once the client exceeds `limit` lines per `window`
    pub fn allow_chat(&mut self, now: Instant, window: Duration, limit: usize) -> bool {
        while self
            .recent_chat
            .front()
            .is_some_and(|sent| now.saturating_duration_since(*sent) >= window)
        {
            self.recent_chat.pop_front();
        }

        if self.recent_chat.len() >= limit {
            return false;
        }

        self.recent_chat.push_back(now);
        self.chat_warned = false;
        true
    }
}

impl Peer for ClientPeer {
    fn id(&self) -> Option<ConnectionId> {
        Some(self.connection_id)
    }

    fn address(&self) -> SocketAddr {
        self.transport.addr()
    }

    fn handle_game_packet(&mut self, payload: &[u8], now: Instant) -> Option<SessionMessage> {
        self.last_heard = now;
        let message = SessionMessage::from_payload(payload);
        if message.is_none() {
            debug!(
                "Dropping undecodable payload from client {}",
                self.connection_id
            );
        }
        message
    }

    fn request_disconnect(&mut self, _now: Instant) -> Packet {
        self.can_communicate = false;
        Packet::DisconnectFromHostRequest {
            connection_id: self.connection_id,
        }
    }

    fn can_communicate(&self) -> bool {
        self.can_communicate
    }
}
