//! Two-phase teardown
//!
//! Whichever side initiates keeps resending its request until the matching
//! ack arrives (client side, from `tick`) or simply forgets the peer and lets
//! the zombie rule catch stragglers (host side). Requests for peers that are
//! already gone are still acked.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info};
use party_shared::{ConnectionId, Packet, SessionMessage};

use super::{ConnectionMux, LeaveReason};
use crate::error::{PartyError, Result};
use crate::peer::{ClientPeer, Peer};
use crate::timing::{KEEPALIVE_INTERVAL, PEER_TIMEOUT};

impl ConnectionMux {
    /// Leaves our host's party
    pub fn disconnect_from_host(&mut self, now: Instant) -> Result<()> {
        let Some(host) = self.host.as_mut() else {
            return Err(PartyError::NotConnected {
                operation: "disconnect_from_host",
            });
        };

        if !host.is_accepted() {
            info!("Abandoning join request to {}", host.address());
            self.teardown_host(None);
            return Ok(());
        }
        if host.is_disconnecting() {
            return Ok(());
        }

        info!("Leaving party at {}", host.address());
        let packet = host.request_disconnect(now);
        self.outbox.send(&packet, host.address());
        Ok(())
    }

    /// Removes a client from our party, banning its identity when `ban` is nonzero
    pub fn disconnect_client(
        &mut self,
        id: ConnectionId,
        ban: Option<Duration>,
        now: Instant,
    ) -> Result<()> {
        if self.host.is_some() {
            return Err(PartyError::HostOnly {
                operation: "disconnect_client",
            });
        }
        let Some(peer) = self.clients.get(id) else {
            return Err(PartyError::UnknownClient(id));
        };

        if let Some(duration) = ban.filter(|duration| !duration.is_zero()) {
            let spec = peer.spec.clone();
            let instance_uuid = peer.instance_uuid.clone();
            self.policy
                .bans
                .ban_peer(spec, Some(instance_uuid), duration, now);
        }

        info!("Kicking client {}", id);
        self.evict_client(id, LeaveReason::Kicked, now);
        Ok(())
    }

    /// Tells everyone we are going away; used when the node shuts down
    pub fn shutdown(&mut self, now: Instant) {
        if self.host.is_some() {
            // Best effort, there will be no retries
            let _ = self.disconnect_from_host(now);
        }
        for id in self.clients.ids() {
            self.evict_client(id, LeaveReason::Silent, now);
        }
    }

    /// Removes a client and sends it a DisconnectFromHostRequest
    pub(super) fn evict_client(
        &mut self,
        id: ConnectionId,
        reason: LeaveReason,
        now: Instant,
    ) -> Option<ClientPeer> {
        let mut peer = self.remove_client(id, reason)?;
        let packet = peer.request_disconnect(now);
        self.outbox.send(&packet, peer.address());
        Some(peer)
    }

    pub(super) fn handle_disconnect_from_client_request(
        &mut self,
        connection_id: ConnectionId,
        from: SocketAddr,
    ) {
        let known = self
            .clients
            .get(connection_id)
            .is_some_and(|peer| peer.address() == from);

        if known {
            info!("Client {} is leaving", connection_id);
            self.remove_client(connection_id, LeaveReason::Left);
        } else {
            debug!(
                "Disconnect request for unknown client {} from {}, acking anyway",
                connection_id, from
            );
        }

        self.outbox
            .send(&Packet::DisconnectFromClientAck { connection_id }, from);
    }

    pub(super) fn handle_disconnect_from_client_ack(
        &mut self,
        connection_id: ConnectionId,
        from: SocketAddr,
    ) {
        let matches = self.host.as_ref().is_some_and(|host| {
            host.is_disconnecting()
                && host.client_id == Some(connection_id)
                && host.address() == from
        });
        if !matches {
            debug!("Ignoring disconnect ack for {} from {}", connection_id, from);
            return;
        }

        self.teardown_host(Some("Left the party.".to_string()));
    }

    pub(super) fn handle_disconnect_from_host_request(
        &mut self,
        connection_id: ConnectionId,
        from: SocketAddr,
    ) {
        let matches = self
            .host
            .as_ref()
            .is_some_and(|host| host.client_id == Some(connection_id) && host.address() == from);

        if matches {
            info!("Removed from party at {}", from);
            self.teardown_host(Some("You were removed from the party.".to_string()));
        } else {
            debug!(
                "Disconnect request for {} from {} does not match our host",
                connection_id, from
            );
        }

        self.outbox
            .send(&Packet::DisconnectFromHostAck { connection_id }, from);
    }

    /// Host-side liveness: evicts silent clients and keeps joined ones alive
    pub(super) fn tick_clients(&mut self, now: Instant) {
        for id in self.clients.silent_clients(now, PEER_TIMEOUT) {
            info!("Client {} timed out", id);
            self.evict_client(id, LeaveReason::TimedOut, now);
        }

        let keepalive = SessionMessage::KeepAlive.to_payload();
        for peer in self.clients.iter_mut() {
            if !peer.can_communicate()
                || now.saturating_duration_since(peer.last_keepalive) < KEEPALIVE_INTERVAL
            {
                continue;
            }
            peer.last_keepalive = now;
            let packet = Packet::HostGamePacket {
                request_id: peer.request_id,
                payload: keepalive.clone(),
            };
            self.outbox.send(&packet, peer.address());
        }
    }
}
