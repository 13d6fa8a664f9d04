//! Join handshake on both ends
//!
//! Clients retry their ClientRequest from `tick` with the same request id and
//! instance uuid, so the host treats a known uuid as a retry and answers with
//! the same ConnectionID again.

use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, info};
use party_shared::{
    ConnectionId, DenyReason, Packet, RequestId, SessionMessage, BUILD_NUMBER, PROTOCOL_VERSION,
    PROTOCOL_VERSION_MIN,
};
use rand::Rng;

use super::{ConnectionMux, LeaveReason};
use crate::events::PartyEvent;
use crate::peer::{HostPeer, Peer};
use crate::timing::{
    DISCONNECT_RETRY, DISCONNECT_TIMEOUT, HANDSHAKE_RETRY, HANDSHAKE_TIMEOUT, KEEPALIVE_INTERVAL,
    PEER_TIMEOUT,
};

/// Random request id that differs from the previous attempt's
fn fresh_request_id(previous: Option<RequestId>) -> RequestId {
    let mut rng = rand::thread_rng();
    loop {
        let id: RequestId = rng.gen();
        if Some(id) != previous {
            return id;
        }
    }
}

fn deny_notice(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::PartyFull => "The party is full.",
        DenyReason::AlreadyInParty => "That player is already in another party.",
        DenyReason::VersionMismatch => "The party is running an incompatible version.",
        DenyReason::Generic => "The party refused the connection.",
    }
}

impl ConnectionMux {
    /// Starts joining the party at `addr`, giving up whatever role we had
    pub fn connect_to_host(&mut self, addr: SocketAddr, now: Instant) {
        for id in self.clients.ids() {
            self.evict_client(id, LeaveReason::Silent, now);
        }
        self.roster_dirty = false;

        if let Some(mut old) = self.host.take() {
            if old.is_accepted() && !old.is_disconnecting() {
                let packet = old.request_disconnect(now);
                self.outbox.send(&packet, old.address());
            }
            self.host_roster = None;
            self.events.push_back(PartyEvent::LeftParty);
        }

        let request_id = fresh_request_id(self.last_request_id);
        self.last_request_id = Some(request_id);
        let host = HostPeer::new(addr, request_id, PROTOCOL_VERSION, now);
        info!(
            "Requesting to join party at {} (request {})",
            addr, host.request_id
        );
        self.outbox
            .send(&host.handshake_request(&self.instance_uuid), addr);
        self.host = Some(host);
    }

    pub(super) fn handle_client_request(
        &mut self,
        protocol_version: u16,
        request_id: RequestId,
        instance_uuid: String,
        from: SocketAddr,
        now: Instant,
    ) {
        if let Some(id) = self.clients.find_by_uuid(&instance_uuid) {
            self.reaccept_client(id, protocol_version, request_id, from, now);
            return;
        }

        if self.clients.len() >= self.policy.client_capacity() {
            info!("Party full, denying {}", from);
            self.send_deny(DenyReason::PartyFull, request_id, from);
            return;
        }

        if self.host.is_some() {
            debug!("Denying request from {}: we are in another party", from);
            self.send_deny(DenyReason::AlreadyInParty, request_id, from);
            return;
        }

        if self.policy.bans.is_instance_banned(&instance_uuid, now) {
            info!("Denying banned instance at {}", from);
            self.send_deny(DenyReason::PartyFull, request_id, from);
            return;
        }

        if !self.accepted_versions.contains(&protocol_version) {
            info!(
                "Denying {}: protocol version {} not supported",
                from, protocol_version
            );
            self.send_deny(DenyReason::VersionMismatch, request_id, from);
            return;
        }

        match self.clients.allocate(from, &instance_uuid, request_id, now) {
            Some(id) => self.send_accept(id, request_id, from),
            None => self.send_deny(DenyReason::PartyFull, request_id, from),
        }
    }

    /// Answers a retried ClientRequest with the ConnectionID already assigned
    ///
    /// A joined client keeps its address; only a client still identifying
    /// itself may move, e.g. after a NAT rebinding.
    fn reaccept_client(
        &mut self,
        id: ConnectionId,
        protocol_version: u16,
        request_id: RequestId,
        from: SocketAddr,
        now: Instant,
    ) {
        let Some(peer) = self.clients.get(id) else {
            return;
        };
        if peer.address() != from && peer.can_communicate() {
            debug!(
                "Ignoring request for joined client {} from foreign address {}",
                id, from
            );
            return;
        }
        if !self.accepted_versions.contains(&protocol_version) {
            debug!(
                "Retry for client {} with unsupported version {}",
                id, protocol_version
            );
            self.send_deny(DenyReason::VersionMismatch, request_id, from);
            return;
        }

        if let Some(peer) = self.clients.get_mut(id) {
            peer.request_id = request_id;
            peer.readdress(from);
            peer.last_heard = now;
        }
        debug!("Re-accepting client {} (request {})", id, request_id);
        self.send_accept(id, request_id, from);
    }

    fn send_accept(&self, connection_id: ConnectionId, request_id: RequestId, to: SocketAddr) {
        self.outbox.send(
            &Packet::ClientAccept {
                connection_id,
                request_id,
            },
            to,
        );
    }

    /// Specific reasons are followed by the generic deny older clients understand
    fn send_deny(&self, reason: DenyReason, request_id: RequestId, to: SocketAddr) {
        self.outbox.send(&Packet::Deny { reason, request_id }, to);
        if reason != DenyReason::Generic {
            self.outbox.send(
                &Packet::Deny {
                    reason: DenyReason::Generic,
                    request_id,
                },
                to,
            );
        }
    }

    pub(super) fn handle_client_accept(
        &mut self,
        connection_id: ConnectionId,
        request_id: RequestId,
        from: SocketAddr,
        now: Instant,
    ) {
        let Some(host) = self.host.as_mut() else {
            debug!("Ignoring ClientAccept from {}: not joining a party", from);
            return;
        };
        if host.request_id != request_id || host.address() != from || host.is_disconnecting() {
            debug!("Ignoring stale ClientAccept (request {})", request_id);
            return;
        }
        if let Some(existing) = host.client_id {
            debug!(
                "Duplicate ClientAccept for client {} (have {})",
                connection_id, existing
            );
            return;
        }

        host.client_id = Some(connection_id);
        host.last_heard = now;
        host.last_request_sent = now;
        info!("Accepted by {} as client {}", from, connection_id);

        self.send_client_info();
    }

    pub(super) fn send_client_info(&self) {
        self.send_to_host(&SessionMessage::ClientInfo {
            spec: self.local_spec.clone(),
            token: self.token.clone(),
            build_number: BUILD_NUMBER,
        });
    }

    pub(super) fn handle_deny(
        &mut self,
        reason: DenyReason,
        request_id: RequestId,
        from: SocketAddr,
        now: Instant,
    ) {
        let Some(host) = self.host.as_ref() else {
            return;
        };
        if host.request_id != request_id || host.address() != from || host.is_accepted() {
            debug!("Ignoring {:?} deny for request {}", reason, request_id);
            return;
        }

        if reason == DenyReason::VersionMismatch
            && !host.fell_back
            && host.protocol_version > PROTOCOL_VERSION_MIN
        {
            let retry_id = fresh_request_id(Some(request_id));
            self.last_request_id = Some(retry_id);
            let mut retry = HostPeer::new(from, retry_id, PROTOCOL_VERSION_MIN, now);
            retry.fell_back = true;
            info!(
                "Party at {} wants another version, retrying with {}",
                from, PROTOCOL_VERSION_MIN
            );
            self.outbox
                .send(&retry.handshake_request(&self.instance_uuid), from);
            self.host = Some(retry);
            return;
        }

        info!("Join request to {} denied: {:?}", from, reason);
        self.teardown_host(Some(deny_notice(reason).to_string()));
    }

    /// Client-side timers for our HostPeer
    pub(super) fn tick_host_peer(&mut self, now: Instant) {
        let Some(host) = self.host.as_mut() else {
            return;
        };

        if let Some(started) = host.disconnect_started {
            if now.saturating_duration_since(started) >= DISCONNECT_TIMEOUT {
                info!("Host never confirmed our departure, leaving anyway");
                self.teardown_host(Some("Left the party.".to_string()));
            } else if now.saturating_duration_since(host.last_disconnect_sent) >= DISCONNECT_RETRY {
                let packet = host.request_disconnect(now);
                self.outbox.send(&packet, host.address());
            }
            return;
        }

        if !host.is_accepted() {
            if now.saturating_duration_since(host.started_at) >= HANDSHAKE_TIMEOUT {
                info!("No answer from {}, giving up", host.address());
                self.teardown_host(Some("Connection to party timed out.".to_string()));
            } else if now.saturating_duration_since(host.last_request_sent) >= HANDSHAKE_RETRY {
                host.last_request_sent = now;
                self.outbox
                    .send(&host.handshake_request(&self.instance_uuid), host.address());
            }
            return;
        }

        if host.is_silent(now, PEER_TIMEOUT) {
            info!("Host at {} went silent", host.address());
            self.teardown_host(Some("Lost connection to party.".to_string()));
            return;
        }

        let resend_info = host.party_name.is_none()
            && now.saturating_duration_since(host.last_request_sent) >= HANDSHAKE_RETRY;
        if resend_info {
            host.last_request_sent = now;
        }
        let keepalive_due = now.saturating_duration_since(host.last_keepalive) >= KEEPALIVE_INTERVAL;
        if keepalive_due {
            host.last_keepalive = now;
        }

        if resend_info {
            self.send_client_info();
        }
        if keepalive_due {
            self.send_to_host(&SessionMessage::KeepAlive);
        }
    }
}
