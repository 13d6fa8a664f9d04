//! Everything carried inside compressed game packets: identification, chat,
//! kick votes, rosters and opaque game data

use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, info};
use party_shared::{truncate_chat, ConnectionId, Packet, PlayerSpec, RequestId, SessionMessage};

use super::{ConnectionMux, LeaveReason};
use crate::error::{PartyError, Result};
use crate::events::PartyEvent;
use crate::kick_vote::{parse_ballot, VoteResolution};
use crate::peer::Peer;
use crate::timing::{CHAT_MESSAGES_PER_WINDOW, CHAT_WINDOW, ROSTER_INTERVAL};

impl ConnectionMux {
    pub(super) fn handle_client_game_packet(
        &mut self,
        connection_id: ConnectionId,
        payload: &[u8],
        from: SocketAddr,
        now: Instant,
    ) {
        let Some(peer) = self.clients.get_mut(connection_id) else {
            debug!(
                "Game packet for unknown client {} from {}, telling it to stop",
                connection_id, from
            );
            self.outbox
                .send(&Packet::DisconnectFromHostRequest { connection_id }, from);
            return;
        };
        if peer.address() != from {
            debug!(
                "Game packet for client {} from foreign address {}",
                connection_id, from
            );
            return;
        }

        if let Some(message) = peer.handle_game_packet(payload, now) {
            self.handle_client_message(connection_id, message, now);
        }
    }

    pub(super) fn handle_host_game_packet(
        &mut self,
        request_id: RequestId,
        payload: &[u8],
        from: SocketAddr,
        now: Instant,
    ) {
        let Some(host) = self.host.as_mut() else {
            debug!("Host game packet from {} while not in a party", from);
            return;
        };
        if host.request_id != request_id || host.address() != from || !host.is_accepted() {
            debug!("Dropping host game packet for request {}", request_id);
            return;
        }

        if let Some(message) = host.handle_game_packet(payload, now) {
            self.handle_host_message(message);
        }
    }

    fn handle_client_message(&mut self, id: ConnectionId, message: SessionMessage, now: Instant) {
        let communicating = self
            .clients
            .get(id)
            .is_some_and(|peer| peer.can_communicate());

        match message {
            SessionMessage::KeepAlive => {}
            SessionMessage::ClientInfo {
                spec,
                token,
                build_number,
            } => self.handle_client_info(id, spec, token, build_number, now),
            SessionMessage::Chat { message, .. } if communicating => {
                self.handle_client_chat(id, &message, now)
            }
            SessionMessage::KickVoteRequest { target } if communicating => {
                self.start_kick_vote(id, target, now)
            }
            SessionMessage::Game(payload) if communicating => {
                self.events.push_back(PartyEvent::GamePayload {
                    from: Some(id),
                    payload,
                });
            }
            other => debug!("Ignoring {:?} from client {}", other, id),
        }
    }

    fn handle_client_info(
        &mut self,
        id: ConnectionId,
        spec: PlayerSpec,
        token: Option<String>,
        build_number: u32,
        now: Instant,
    ) {
        let spec = spec.normalized();
        if self.policy.bans.is_banned(&spec, now) {
            info!("Client {} ({}) is banned", id, spec.display_name());
            self.evict_client(id, LeaveReason::Silent, now);
            return;
        }

        let Some(peer) = self.clients.get_mut(id) else {
            return;
        };
        peer.spec = Some(spec);
        peer.token = token;
        peer.build_number = Some(build_number);
        let newly_joined = !peer.can_communicate;
        peer.can_communicate = true;
        let name = peer.display_name();

        self.send_to_client(id, &self.host_info());

        if newly_joined {
            info!("Client {} joined as {}", id, name);
            self.announce(format!("{} joined the party.", name));
            self.events.push_back(PartyEvent::ClientJoined {
                connection_id: id,
                name,
            });
            self.roster_dirty = true;
        }
    }

    fn handle_client_chat(&mut self, id: ConnectionId, message: &str, now: Instant) {
        let Some(peer) = self.clients.get_mut(id) else {
            return;
        };

        if !peer.allow_chat(now, CHAT_WINDOW, CHAT_MESSAGES_PER_WINDOW) {
            if !peer.chat_warned {
                peer.chat_warned = true;
                debug!("Client {} is chatting too fast", id);
                self.send_to_client(
                    id,
                    &SessionMessage::ScreenMessage(
                        "You are sending messages too quickly.".to_string(),
                    ),
                );
            }
            return;
        }

        let sender = peer
            .spec
            .clone()
            .unwrap_or_else(|| PlayerSpec::from_name(&peer.display_name()));

        let line = truncate_chat(message);
        if line.is_empty() {
            return;
        }

        if let Some(yes) = parse_ballot(line) {
            if self.policy.kick_vote.cast(&self.clients, id, yes) {
                debug!("Client {} voted {}", id, if yes { "yes" } else { "no" });
                self.send_to_client(
                    id,
                    &SessionMessage::ScreenMessage("Your vote was recorded.".to_string()),
                );
                return;
            }
        }

        let Some(line) = self.filter_chat(line, Some(id)) else {
            debug!("Chat from client {} vetoed", id);
            return;
        };

        self.broadcast(&SessionMessage::Chat {
            sender: Some(sender.clone()),
            message: line.clone(),
        });
        self.record_chat(Some(sender.display_name().to_string()), line);
    }

    /// Runs the filter hook; `None` means the line must not go anywhere
    fn filter_chat(&mut self, line: &str, from: Option<ConnectionId>) -> Option<String> {
        let filtered = match self.chat_filter.as_mut() {
            Some(filter) => filter(line, from)?,
            None => line.to_string(),
        };
        let filtered = truncate_chat(&filtered);
        (!filtered.is_empty()).then(|| filtered.to_string())
    }

    /// Sends a chat line
    ///
    /// Hosts may pick recipients and a display name. Hosts also render the
    /// line locally unless recipients were given. Clients can only hand the
    /// line to their host, which echoes it back.
    pub fn send_chat(
        &mut self,
        message: &str,
        targets: Option<&[ConnectionId]>,
        sender_override: Option<&str>,
    ) -> Result<()> {
        let line = truncate_chat(message);

        if let Some(host) = &self.host {
            if targets.is_some() {
                return Err(PartyError::HostOnly {
                    operation: "chat targets",
                });
            }
            if sender_override.is_some() {
                return Err(PartyError::HostOnly {
                    operation: "chat sender override",
                });
            }
            if !host.can_communicate() {
                debug!("Not in a party yet, dropping chat");
                return Ok(());
            }
            if !line.is_empty() {
                self.send_to_host(&SessionMessage::Chat {
                    sender: None,
                    message: line.to_string(),
                });
            }
            return Ok(());
        }

        if line.is_empty() {
            return Ok(());
        }
        let Some(line) = self.filter_chat(line, None) else {
            debug!("Local chat vetoed");
            return Ok(());
        };

        let sender = match sender_override {
            Some(name) => PlayerSpec::from_name(name),
            None => self.local_spec.clone(),
        };
        let chat = SessionMessage::Chat {
            sender: Some(sender.clone()),
            message: line.clone(),
        };

        match targets {
            Some(ids) => self.broadcast_to(&chat, |id| ids.contains(&id)),
            None => {
                self.broadcast(&chat);
                self.record_chat(Some(sender.display_name().to_string()), line);
            }
        }
        Ok(())
    }

    /// Asks our host to start a vote to kick `target`
    pub fn request_kick_vote(&mut self, target: ConnectionId) -> Result<()> {
        match &self.host {
            Some(host) if host.can_communicate() => {
                self.send_to_host(&SessionMessage::KickVoteRequest { target });
                Ok(())
            }
            _ => Err(PartyError::NotConnected {
                operation: "request_kick_vote",
            }),
        }
    }

    fn start_kick_vote(&mut self, starter: ConnectionId, target: ConnectionId, now: Instant) {
        let enabled = self.policy.kick_voting_enabled;
        let started = self
            .policy
            .kick_vote
            .start(&self.clients, starter, target, enabled, now)
            .map(|_| ());

        match started {
            Ok(()) => {
                let starter_name = self.client_name(starter);
                let target_name = self.client_name(target);
                if let Some(peer) = self.clients.get_mut(starter) {
                    peer.last_kick_vote_start = Some(now);
                }
                info!("{} started a kick vote against {}", starter_name, target_name);
                self.announce(format!(
                    "{} started a vote to kick {}. Type 1 to vote yes or 2 to vote no.",
                    starter_name, target_name
                ));
            }
            Err(e) => {
                debug!("Client {} could not start a kick vote: {:?}", starter, e);
                self.send_to_client(starter, &SessionMessage::ScreenMessage(e.message()));
            }
        }
    }

    fn client_name(&self, id: ConnectionId) -> String {
        self.clients
            .get(id)
            .map(|peer| peer.display_name())
            .unwrap_or_else(|| format!("Client {}", id))
    }

    pub(super) fn tick_kick_vote(&mut self, now: Instant) {
        let Some(resolution) = self.policy.kick_vote.evaluate(&self.clients, now) else {
            return;
        };

        match resolution {
            VoteResolution::Passed { target } => {
                let Some(peer) = self.clients.get_live(target) else {
                    return;
                };
                let name = peer.display_name();
                let spec = peer.spec.clone();
                let instance_uuid = peer.instance_uuid.clone();
                let duration = self.policy.kick_vote_ban;

                info!("Kick vote passed against {}", name);
                self.policy
                    .bans
                    .ban_peer(spec, Some(instance_uuid), duration, now);
                self.announce(format!("The vote passed. {} will be removed.", name));
                self.evict_client(target.id, LeaveReason::Kicked, now);
            }
            VoteResolution::Expired { target } => {
                let name = self.client_name(target.id);
                info!("Kick vote against {} expired", name);
                self.announce(format!("The vote to kick {} failed.", name));
            }
            VoteResolution::Canceled { .. } => {
                self.announce("The kick vote was canceled.".to_string());
            }
        }
    }

    /// Broadcasts the roster when membership changed, at most once per interval
    pub(super) fn tick_roster(&mut self, now: Instant) {
        if !self.roster_dirty {
            return;
        }
        if self
            .last_roster_sent
            .is_some_and(|last| now.saturating_duration_since(last) < ROSTER_INTERVAL)
        {
            return;
        }

        let roster = self.local_roster();
        self.broadcast(&SessionMessage::Roster(roster.clone()));
        self.events.push_back(PartyEvent::RosterUpdated(roster));
        self.roster_dirty = false;
        self.last_roster_sent = Some(now);
    }

    fn handle_host_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::KeepAlive => {}
            SessionMessage::HostInfo {
                party_name,
                build_number,
            } => {
                let Some(host) = self.host.as_mut() else {
                    return;
                };
                let first = host.party_name.is_none();
                host.party_name = Some(party_name.clone());
                host.build_number = Some(build_number);

                if first {
                    let connection_id = host.client_id.unwrap_or_default();
                    info!("Joined party \"{}\" as client {}", party_name, connection_id);
                    self.events.push_back(PartyEvent::JoinedParty {
                        connection_id,
                        party_name,
                    });
                }
            }
            SessionMessage::Chat { sender, message } => {
                let sender = sender.map(|spec| spec.display_name().to_string());
                self.record_chat(sender, truncate_chat(&message).to_string());
            }
            SessionMessage::Roster(roster) => {
                self.host_roster = Some(roster.clone());
                self.events.push_back(PartyEvent::RosterUpdated(roster));
            }
            SessionMessage::ScreenMessage(text) => {
                self.events.push_back(PartyEvent::Notice(text));
            }
            SessionMessage::Game(payload) => {
                self.events
                    .push_back(PartyEvent::GamePayload { from: None, payload });
            }
            other => debug!("Ignoring {:?} from host", other),
        }
    }

    /// Opaque game data: to our host as a client, to one or all joined clients as host
    pub fn send_game_payload(
        &mut self,
        target: Option<ConnectionId>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let message = SessionMessage::Game(payload);

        if let Some(host) = &self.host {
            if target.is_some() {
                return Err(PartyError::HostOnly {
                    operation: "targeted game payloads",
                });
            }
            if !host.can_communicate() {
                return Err(PartyError::NotConnected {
                    operation: "send_game_payload",
                });
            }
            self.send_to_host(&message);
            return Ok(());
        }

        match target {
            Some(id) => {
                let peer = self
                    .clients
                    .get(id)
                    .filter(|peer| peer.can_communicate())
                    .ok_or(PartyError::UnknownClient(id))?;
                self.outbox.send(&peer.game_packet(&message), peer.address());
            }
            None => self.broadcast(&message),
        }
        Ok(())
    }
}
