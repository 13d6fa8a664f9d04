//! Connection multiplexer
//!
//! The multiplexer is the single owner of the (at most one) [`HostPeer`] and of
//! the [`ClientTable`]. Every incoming datagram goes through
//! [`ConnectionMux::dispatch`]; every timer goes through [`ConnectionMux::tick`].
//! Neither ever blocks: outbound packets are queued on the [`Outbox`] and
//! anything the local user should hear about is queued as a [`PartyEvent`].
//!
//! Network noise (undecodable packets, stale request ids, foreign addresses)
//! is dropped with a debug log. Only local misuse produces a
//! [`PartyError`](crate::error::PartyError).
//!
//! The handshake lives in `handshake`, two-phase teardown in `disconnect`,
//! and everything carried inside game packets in `session`.

mod disconnect;
mod handshake;
mod session;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Instant;

use log::{debug, info};
use party_shared::{
    ConnectionId, Packet, PlayerSpec, RequestId, Roster, RosterEntry, SessionMessage,
    BUILD_NUMBER, PROTOCOL_VERSION, PROTOCOL_VERSION_MIN,
};
use uuid::Uuid;

use crate::chat::{ChatFilter, ChatLine};
use crate::client_table::ClientTable;
use crate::config::PartyConfig;
use crate::events::PartyEvent;
use crate::outbox::Outbox;
use crate::peer::{ClientPeer, HostPeer, Peer};
use crate::policy::{PartyPolicy, PublicPartyInfo};

/// Why a client left the table; picks the announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaveReason {
    Left,
    Kicked,
    TimedOut,
    /// Removed without telling anyone, e.g. before it ever joined
    Silent,
}

pub struct ConnectionMux {
    local_spec: PlayerSpec,
    token: Option<String>,
    /// Stable for the lifetime of this process
    instance_uuid: String,
    host: Option<HostPeer>,
    /// Request id of our latest join attempt, never repeated by the next one
    last_request_id: Option<RequestId>,
    clients: ClientTable,
    /// Protocol versions admitted from joining clients
    accepted_versions: RangeInclusive<u16>,
    policy: PartyPolicy,
    chat_filter: Option<ChatFilter>,
    outbox: Outbox,
    events: VecDeque<PartyEvent>,
    roster_dirty: bool,
    last_roster_sent: Option<Instant>,
    /// Latest roster received from our host
    host_roster: Option<Roster>,
}

impl ConnectionMux {
    pub fn new(config: &PartyConfig, outbox: Outbox) -> Self {
        Self {
            local_spec: PlayerSpec::new(&config.player_name, config.account_id.as_deref()),
            token: None,
            instance_uuid: Uuid::new_v4().to_string(),
            host: None,
            last_request_id: None,
            clients: ClientTable::new(),
            accepted_versions: PROTOCOL_VERSION_MIN..=PROTOCOL_VERSION,
            policy: PartyPolicy::from_config(config),
            chat_filter: None,
            outbox,
            events: VecDeque::new(),
            roster_dirty: false,
            last_roster_sent: None,
            host_roster: None,
        }
    }

    pub fn instance_uuid(&self) -> &str {
        &self.instance_uuid
    }

    pub fn local_spec(&self) -> &PlayerSpec {
        &self.local_spec
    }

    /// Token forwarded to hosts in ClientInfo for the authentication layer
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn set_accepted_protocol_versions(&mut self, versions: RangeInclusive<u16>) {
        self.accepted_versions = versions;
    }

    /// True unless we are a client of someone else's party
    pub fn is_hosting(&self) -> bool {
        self.host.is_none()
    }

    pub fn host_peer(&self) -> Option<&HostPeer> {
        self.host.as_ref()
    }

    pub fn client(&self, id: ConnectionId) -> Option<&ClientPeer> {
        self.clients.get(id)
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn policy(&self) -> &PartyPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut PartyPolicy {
        &mut self.policy
    }

    pub fn set_chat_filter(&mut self, filter: Option<ChatFilter>) {
        self.chat_filter = filter;
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PartyEvent> + '_ {
        self.events.drain(..)
    }

    /// Single entry point for every received datagram
    pub fn dispatch(&mut self, data: &[u8], from: SocketAddr, now: Instant) {
        let Some(packet) = Packet::decode(data) else {
            debug!("Dropping {} undecodable bytes from {}", data.len(), from);
            return;
        };

        match packet {
            Packet::ClientRequest {
                protocol_version,
                request_id,
                instance_uuid,
            } => self.handle_client_request(protocol_version, request_id, instance_uuid, from, now),
            Packet::ClientAccept {
                connection_id,
                request_id,
            } => self.handle_client_accept(connection_id, request_id, from, now),
            Packet::Deny { reason, request_id } => self.handle_deny(reason, request_id, from, now),
            Packet::DisconnectFromClientRequest { connection_id } => {
                self.handle_disconnect_from_client_request(connection_id, from)
            }
            Packet::DisconnectFromClientAck { connection_id } => {
                self.handle_disconnect_from_client_ack(connection_id, from)
            }
            Packet::DisconnectFromHostRequest { connection_id } => {
                self.handle_disconnect_from_host_request(connection_id, from)
            }
            // Kicks are one-shot and the peer is already gone; a client that
            // missed the request is told again by the unknown-client rule
            Packet::DisconnectFromHostAck { connection_id } => {
                debug!("Client {} confirmed its removal", connection_id);
            }
            Packet::ClientGamePacket {
                connection_id,
                payload,
            } => self.handle_client_game_packet(connection_id, &payload, from, now),
            Packet::HostGamePacket {
                request_id,
                payload,
            } => self.handle_host_game_packet(request_id, &payload, from, now),
        }
    }

    /// Drives every timer: retries, keepalives, timeouts, votes and roster
    pub fn tick(&mut self, now: Instant) {
        if self.host.is_some() {
            self.tick_host_peer(now);
        } else {
            self.tick_clients(now);
            self.tick_kick_vote(now);
            self.tick_roster(now);
            self.policy.bans.prune(now);
        }
    }

    /// Registered clients, joined or still identifying themselves
    pub fn connected_client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn roster(&self) -> Roster {
        match &self.host {
            Some(_) => self.host_roster.clone().unwrap_or_default(),
            None => self.local_roster(),
        }
    }

    pub fn chat_history(&self) -> impl Iterator<Item = &ChatLine> {
        self.policy.chat_history.iter()
    }

    pub fn public_party_info(&self) -> PublicPartyInfo {
        let party = &self.policy.public_party;
        PublicPartyInfo {
            enabled: party.enabled,
            name: party.name.clone(),
            size: self.clients.communicating_count() + 1,
            max_size: party.max_size,
        }
    }

    pub fn set_public_party_enabled(&mut self, enabled: bool) {
        info!("Public party advertisement {}", if enabled { "on" } else { "off" });
        self.policy.public_party.enabled = enabled;
    }

    /// Renames the party and tells every joined client
    pub fn set_party_name(&mut self, name: &str) {
        self.policy.public_party.name = name.to_string();
        self.roster_dirty = true;

        let message = self.host_info();
        self.broadcast(&message);
    }

    /// Never evicts clients already in the party
    pub fn set_max_party_size(&mut self, max_size: u8) {
        self.policy.public_party.max_size = max_size.max(2);
        self.roster_dirty = true;
    }

    pub fn set_admin_list(&mut self, ids: Vec<String>) {
        self.policy.set_admin_public_ids(ids);
    }

    pub fn admin_list(&self) -> &[String] {
        self.policy.admin_public_ids()
    }

    pub fn set_kick_voting_enabled(&mut self, enabled: bool) {
        self.policy.kick_voting_enabled = enabled;
    }

    fn host_info(&self) -> SessionMessage {
        SessionMessage::HostInfo {
            party_name: self.policy.public_party.name.clone(),
            build_number: BUILD_NUMBER,
        }
    }

    fn local_roster(&self) -> Roster {
        let mut entries = vec![RosterEntry {
            client_id: None,
            spec: self.local_spec.clone(),
        }];
        entries.extend(self.clients.communicating().map(|peer| RosterEntry {
            client_id: Some(peer.connection_id),
            spec: peer
                .spec
                .clone()
                .unwrap_or_else(|| PlayerSpec::from_name(&peer.display_name())),
        }));

        Roster {
            party_name: self.policy.public_party.name.clone(),
            max_size: self.policy.public_party.max_size,
            entries,
        }
    }

    fn send_to_client(&self, id: ConnectionId, message: &SessionMessage) {
        if let Some(peer) = self.clients.get(id) {
            self.outbox.send(&peer.game_packet(message), peer.address());
        }
    }

    /// Sends to every communicating client, compressing once
    fn broadcast(&self, message: &SessionMessage) {
        self.broadcast_to(message, |_| true);
    }

    fn broadcast_to(&self, message: &SessionMessage, mut include: impl FnMut(ConnectionId) -> bool) {
        let payload = message.to_payload();
        for peer in self.clients.communicating() {
            if !include(peer.connection_id) {
                continue;
            }
            let packet = Packet::HostGamePacket {
                request_id: peer.request_id,
                payload: payload.clone(),
            };
            self.outbox.send(&packet, peer.address());
        }
    }

    fn send_to_host(&self, message: &SessionMessage) {
        let Some(host) = &self.host else {
            return;
        };
        if let Some(packet) = host.game_packet(message) {
            self.outbox.send(&packet, host.address());
        }
    }

    /// Screen message to every client plus a local notice
    fn announce(&mut self, text: String) {
        self.broadcast(&SessionMessage::ScreenMessage(text.clone()));
        self.events.push_back(PartyEvent::Notice(text));
    }

    fn record_chat(&mut self, sender: Option<String>, message: String) {
        self.policy.chat_history.push(ChatLine {
            sender: sender.clone(),
            message: message.clone(),
        });
        self.events.push_back(PartyEvent::Chat { sender, message });
    }

    /// Drops a client from the table; the caller has already told it, if needed
    fn remove_client(&mut self, id: ConnectionId, reason: LeaveReason) -> Option<ClientPeer> {
        let peer = self.clients.remove(id)?;

        if self.policy.kick_vote.on_client_removed(id).is_some() {
            self.announce("The kick vote was canceled.".to_string());
        }

        if peer.can_communicate() && reason != LeaveReason::Silent {
            let name = peer.display_name();
            let text = match reason {
                LeaveReason::Kicked => format!("{} was removed from the party.", name),
                LeaveReason::TimedOut => format!("{} lost connection.", name),
                _ => format!("{} left the party.", name),
            };
            self.announce(text);
            self.events.push_back(PartyEvent::ClientLeft {
                connection_id: id,
                name,
            });
            self.roster_dirty = true;
        }

        Some(peer)
    }

    /// Forgets our host; `notice` is shown once
    fn teardown_host(&mut self, notice: Option<String>) {
        let Some(host) = self.host.take() else {
            return;
        };
        info!("Left party at {}", host.address());
        self.host_roster = None;
        if let Some(text) = notice {
            self.events.push_back(PartyEvent::Notice(text));
        }
        self.events.push_back(PartyEvent::LeftParty);
    }
}
