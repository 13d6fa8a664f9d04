//! Integration tests for the party protocol
//!
//! These tests wire several `ConnectionMux` instances together through an
//! in-memory network. Packets travel between outboxes by address, time only
//! moves when a test advances it, and a drop rule can lose any packet.

use party::events::PartyEvent;
use party::peer::Peer;
use party::{ConnectionMux, OutboundPacket, Outbox, PartyConfig, PartyError};
use party_shared::{DenyReason, Packet, SessionMessage, PROTOCOL_VERSION_MIN};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const STEP: Duration = Duration::from_millis(100);

type DropRule = Box<dyn FnMut(&Packet) -> bool>;

struct SimNode {
    addr: SocketAddr,
    mux: ConnectionMux,
    outgoing: mpsc::UnboundedReceiver<OutboundPacket>,
    events: Vec<PartyEvent>,
}

impl SimNode {
    fn notices(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PartyEvent::Notice(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn chats(&self) -> Vec<(Option<&str>, &str)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PartyEvent::Chat { sender, message } => {
                    Some((sender.as_deref(), message.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    fn count_events(&self, matches: impl Fn(&PartyEvent) -> bool) -> usize {
        self.events.iter().filter(|event| matches(event)).count()
    }
}

/// Lossy in-memory network with a manual clock
struct SimNet {
    nodes: Vec<SimNode>,
    now: Instant,
    drop_rule: Option<DropRule>,
    /// Every decoded packet put on the wire: (from, to, packet)
    tap: Vec<(SocketAddr, SocketAddr, Packet)>,
}

impl SimNet {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            now: Instant::now(),
            drop_rule: None,
            tap: Vec::new(),
        }
    }

    fn add_node(&mut self, name: &str, max_party_size: u8) -> usize {
        let index = self.nodes.len();
        let config = PartyConfig {
            player_name: name.to_string(),
            party_name: format!("{}'s party", name),
            max_party_size,
            ..PartyConfig::default()
        };
        let (outbox, outgoing) = Outbox::channel();
        self.nodes.push(SimNode {
            addr: SocketAddr::from(([127, 0, 0, 1], 20_000 + index as u16)),
            mux: ConnectionMux::new(&config, outbox),
            outgoing,
            events: Vec::new(),
        });
        index
    }

    fn addr(&self, node: usize) -> SocketAddr {
        self.nodes[node].addr
    }

    fn mux(&mut self, node: usize) -> &mut ConnectionMux {
        &mut self.nodes[node].mux
    }

    fn drop_packets(&mut self, rule: impl FnMut(&Packet) -> bool + 'static) {
        self.drop_rule = Some(Box::new(rule));
    }

    /// Moves packets until the network is quiet
    fn deliver(&mut self) {
        let now = self.now;
        for _ in 0..100 {
            let mut in_flight = Vec::new();
            for node in &mut self.nodes {
                while let Ok(packet) = node.outgoing.try_recv() {
                    in_flight.push((node.addr, packet));
                }
            }
            if in_flight.is_empty() {
                break;
            }

            for (from, outbound) in in_flight {
                let packet = Packet::decode(&outbound.bytes).expect("mux sent garbage");
                self.tap.push((from, outbound.addr, packet.clone()));
                if let Some(rule) = self.drop_rule.as_mut() {
                    if rule(&packet) {
                        continue;
                    }
                }
                if let Some(node) = self.nodes.iter_mut().find(|n| n.addr == outbound.addr) {
                    node.mux.dispatch(&outbound.bytes, from, now);
                }
            }

            for node in &mut self.nodes {
                node.events.extend(node.mux.drain_events());
            }
        }
    }

    /// Advances the clock in small steps, ticking every node and delivering
    fn advance(&mut self, total: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.now += STEP;
            elapsed += STEP;
            let now = self.now;
            for node in &mut self.nodes {
                node.mux.tick(now);
            }
            self.deliver();
        }
    }

    fn join(&mut self, client: usize, host: usize) {
        let addr = self.addr(host);
        let now = self.now;
        self.mux(client).connect_to_host(addr, now);
        self.deliver();
    }

    fn leave(&mut self, client: usize) {
        let now = self.now;
        self.mux(client)
            .disconnect_from_host(now)
            .expect("client should be in a party");
        self.deliver();
    }

    fn sent(&self, matches: impl Fn(&Packet) -> bool) -> Vec<&Packet> {
        self.tap
            .iter()
            .map(|(_, _, packet)| packet)
            .filter(|packet| matches(packet))
            .collect()
    }
}

fn is_joined(net: &SimNet, client: usize) -> bool {
    net.nodes[client]
        .mux
        .host_peer()
        .is_some_and(|host| host.can_communicate() && host.party_name.is_some())
}

mod handshake_tests {
    use super::*;

    /// Tests the full join: request, accept, identification and host info
    #[test]
    fn join_completes_session_handshake() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);

        net.join(ann, host);

        assert!(is_joined(&net, ann));
        assert!(net.nodes[ann].events.contains(&PartyEvent::JoinedParty {
            connection_id: 0,
            party_name: "Hana's party".to_string(),
        }));
        assert!(net.nodes[host].events.contains(&PartyEvent::ClientJoined {
            connection_id: 0,
            name: "Ann".to_string(),
        }));
        assert_eq!(net.mux(host).connected_client_count(), 1);
        assert!(!net.mux(ann).is_hosting());
    }

    /// Tests that a retried request after a lost accept gets the same ConnectionID
    #[test]
    fn lost_accept_is_retried_idempotently() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);

        let mut dropped = false;
        net.drop_packets(move |packet| {
            if !dropped && matches!(packet, Packet::ClientAccept { .. }) {
                dropped = true;
                return true;
            }
            false
        });

        net.join(ann, host);
        assert!(!is_joined(&net, ann));

        net.advance(party::timing::HANDSHAKE_RETRY);
        assert!(is_joined(&net, ann));
        assert_eq!(net.mux(host).connected_client_count(), 1);

        let accepts = net.sent(|p| matches!(p, Packet::ClientAccept { .. }));
        assert_eq!(accepts.len(), 2);
        assert_eq!(accepts[0], accepts[1]);
    }

    /// Tests that a host of size 3 admits two clients and turns the third away
    #[test]
    fn party_full_denies_extra_client() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 3);
        let ann = net.add_node("Ann", 8);
        let bob = net.add_node("Bob", 8);
        let cat = net.add_node("Cat", 8);

        net.join(ann, host);
        net.join(bob, host);
        net.join(cat, host);

        assert!(is_joined(&net, ann));
        assert!(is_joined(&net, bob));
        assert!(net.mux(cat).host_peer().is_none());
        assert_eq!(net.nodes[cat].notices(), vec!["The party is full."]);
        assert_eq!(net.mux(host).connected_client_count(), 2);

        // Specific reason first, generic deny right behind it
        let denies = net.sent(|p| matches!(p, Packet::Deny { .. }));
        assert!(matches!(
            denies[..],
            [
                Packet::Deny {
                    reason: DenyReason::PartyFull,
                    ..
                },
                Packet::Deny {
                    reason: DenyReason::Generic,
                    ..
                }
            ]
        ));
    }

    /// Tests that a version mismatch falls back to the minimum version once
    #[test]
    fn version_mismatch_falls_back_to_minimum() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.mux(host)
            .set_accepted_protocol_versions(PROTOCOL_VERSION_MIN..=PROTOCOL_VERSION_MIN);

        net.join(ann, host);

        assert!(is_joined(&net, ann));
        let peer = net.mux(ann).host_peer().expect("joined");
        assert_eq!(peer.protocol_version, PROTOCOL_VERSION_MIN);
        assert!(peer.fell_back);
        assert!(!net.nodes[ann]
            .notices()
            .contains(&"The party is running an incompatible version."));
    }

    /// Tests that a second mismatch ends the attempt with one notice
    #[test]
    fn incompatible_host_is_reported_once() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.mux(host).set_accepted_protocol_versions(90..=90);

        net.join(ann, host);

        assert!(net.mux(ann).host_peer().is_none());
        assert_eq!(
            net.nodes[ann].notices(),
            vec!["The party is running an incompatible version."]
        );
        let requests = net.sent(|p| matches!(p, Packet::ClientRequest { .. }));
        assert_eq!(requests.len(), 2);
    }

    /// Tests that a node in someone else's party refuses to host
    #[test]
    fn client_refuses_to_host() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        let bob = net.add_node("Bob", 8);

        net.join(ann, host);
        net.join(bob, ann);

        assert!(net.mux(bob).host_peer().is_none());
        assert_eq!(
            net.nodes[bob].notices(),
            vec!["That player is already in another party."]
        );
    }

    /// Tests that joining an address nobody answers on times out
    #[test]
    fn unanswered_join_times_out() {
        let mut net = SimNet::new();
        let ann = net.add_node("Ann", 8);
        let nowhere: SocketAddr = "127.0.0.1:29999".parse().unwrap();

        let now = net.now;
        net.mux(ann).connect_to_host(nowhere, now);
        net.advance(party::timing::HANDSHAKE_TIMEOUT + STEP);

        assert!(net.mux(ann).host_peer().is_none());
        assert_eq!(
            net.nodes[ann].notices(),
            vec!["Connection to party timed out."]
        );
        let requests = net.sent(|p| matches!(p, Packet::ClientRequest { .. }));
        assert!(requests.len() >= 10);
    }
}

mod disconnect_tests {
    use super::*;
    use party::timing::{DISCONNECT_RETRY, DISCONNECT_TIMEOUT, KEEPALIVE_INTERVAL};

    /// Tests that leaving completes once on both sides even when acks are lost
    #[test]
    fn leave_survives_lost_acks() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.join(ann, host);

        let mut lost = 0;
        net.drop_packets(move |packet| {
            if matches!(packet, Packet::DisconnectFromClientAck { .. }) && lost < 2 {
                lost += 1;
                return true;
            }
            false
        });

        net.leave(ann);
        assert!(net.mux(ann).host_peer().is_some());
        assert_eq!(net.mux(host).connected_client_count(), 0);

        net.advance(DISCONNECT_RETRY * 3);

        assert!(net.mux(ann).host_peer().is_none());
        assert!(net.nodes[ann].notices().contains(&"Left the party."));
        assert_eq!(
            net.nodes[host].count_events(|e| matches!(e, PartyEvent::ClientLeft { .. })),
            1
        );
        let acks = net.sent(|p| matches!(p, Packet::DisconnectFromClientAck { .. }));
        assert_eq!(acks.len(), 3);
    }

    /// Tests that a client gives up waiting for an ack after the timeout
    #[test]
    fn leave_gives_up_without_acks() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.join(ann, host);
        net.drop_packets(|packet| matches!(packet, Packet::DisconnectFromClientAck { .. }));

        net.leave(ann);
        net.advance(DISCONNECT_TIMEOUT - STEP);
        assert!(net.mux(ann).host_peer().is_some());

        net.advance(STEP * 2);
        assert!(net.mux(ann).host_peer().is_none());
        assert!(net.nodes[ann].notices().contains(&"Left the party."));
    }

    /// Tests that a kicked client is told and answers with an ack
    #[test]
    fn host_kick_reaches_client() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.join(ann, host);

        let now = net.now;
        net.mux(host).disconnect_client(0, None, now).unwrap();
        net.deliver();

        assert!(net.mux(ann).host_peer().is_none());
        assert!(net.nodes[ann]
            .notices()
            .contains(&"You were removed from the party."));
        assert!(net.nodes[ann].events.contains(&PartyEvent::LeftParty));
        assert_eq!(
            net.sent(|p| matches!(p, Packet::DisconnectFromHostAck { connection_id: 0 }))
                .len(),
            1
        );
        assert!(net.nodes[host]
            .notices()
            .contains(&"Ann was removed from the party."));
    }

    /// Tests that a client that missed its kick is told again when it next speaks
    #[test]
    fn zombie_client_is_told_to_stop() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.join(ann, host);

        let mut dropped = false;
        net.drop_packets(move |packet| {
            if !dropped && matches!(packet, Packet::DisconnectFromHostRequest { .. }) {
                dropped = true;
                return true;
            }
            false
        });

        let now = net.now;
        net.mux(host).disconnect_client(0, None, now).unwrap();
        net.deliver();
        assert!(net.mux(ann).host_peer().is_some());

        net.advance(KEEPALIVE_INTERVAL + STEP);

        assert!(net.mux(ann).host_peer().is_none());
        assert!(net.nodes[ann]
            .notices()
            .contains(&"You were removed from the party."));
    }

    /// Tests that host packets tagged with an old request id are ignored after rejoining
    #[test]
    fn stale_host_packet_is_not_attributed_after_rejoin() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);

        net.join(ann, host);
        let old_request = net.mux(ann).host_peer().unwrap().request_id;
        net.leave(ann);
        assert!(net.mux(ann).host_peer().is_none());

        net.join(ann, host);
        let peer = net.mux(ann).host_peer().unwrap();
        let new_request = peer.request_id;
        assert_ne!(old_request, new_request);
        assert_eq!(peer.client_id, Some(1));

        let payload = SessionMessage::Game(vec![7, 7, 7]).to_payload();
        let from = net.addr(host);
        let now = net.now;
        let stale = Packet::HostGamePacket {
            request_id: old_request,
            payload: payload.clone(),
        };
        let fresh = Packet::HostGamePacket {
            request_id: new_request,
            payload,
        };

        net.mux(ann).dispatch(&stale.encode(), from, now);
        assert_eq!(net.mux(ann).drain_events().count(), 0);

        net.mux(ann).dispatch(&fresh.encode(), from, now);
        let events: Vec<_> = net.mux(ann).drain_events().collect();
        assert_eq!(
            events,
            vec![PartyEvent::GamePayload {
                from: None,
                payload: vec![7, 7, 7],
            }]
        );
    }

    /// Tests that a silent host is abandoned and a silent client evicted
    #[test]
    fn silence_tears_down_both_ends() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.join(ann, host);

        net.drop_packets(|_| true);
        net.advance(party::timing::PEER_TIMEOUT + STEP);

        assert!(net.mux(ann).host_peer().is_none());
        assert!(net.nodes[ann]
            .notices()
            .contains(&"Lost connection to party."));
        assert_eq!(net.mux(host).connected_client_count(), 0);
        assert!(net.nodes[host].notices().contains(&"Ann lost connection."));
    }
}

mod chat_tests {
    use super::*;

    fn party_of_three() -> (SimNet, usize, usize, usize) {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        let bob = net.add_node("Bob", 8);
        net.join(ann, host);
        net.join(bob, host);
        for node in &mut net.nodes {
            node.events.clear();
        }
        (net, host, ann, bob)
    }

    /// Tests that client chat is truncated at the first line break and relayed to everyone
    #[test]
    fn client_chat_reaches_whole_party() {
        let (mut net, host, ann, bob) = party_of_three();

        net.mux(ann).send_chat("hello\nworld", None, None).unwrap();
        net.deliver();

        for node in [host, ann, bob] {
            assert_eq!(net.nodes[node].chats(), vec![(Some("Ann"), "hello")]);
        }
        let history: Vec<_> = net.mux(host).chat_history().cloned().collect();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "hello");
    }

    /// Tests that the host's filter can veto a line before anyone sees it
    #[test]
    fn host_filter_vetoes_chat() {
        let (mut net, host, ann, bob) = party_of_three();
        net.mux(host).set_chat_filter(Some(Box::new(|line: &str, _: Option<u8>| {
            (!line.contains("spoiler")).then(|| line.to_string())
        })));

        net.mux(ann).send_chat("big spoiler ahead", None, None).unwrap();
        net.deliver();

        for node in [host, ann, bob] {
            assert!(net.nodes[node].chats().is_empty());
        }
    }

    /// Tests that the host can address chosen clients under another name
    #[test]
    fn host_targets_chat() {
        let (mut net, host, ann, bob) = party_of_three();

        net.mux(host)
            .send_chat("psst", Some(&[1][..]), Some("Server"))
            .unwrap();
        net.deliver();

        assert!(net.nodes[ann].chats().is_empty());
        assert_eq!(net.nodes[bob].chats(), vec![(Some("Server"), "psst")]);
        assert!(net.nodes[host].chats().is_empty());
    }

    /// Tests that clients cannot use host-only chat options
    #[test]
    fn client_cannot_target_chat() {
        let (mut net, _host, ann, _bob) = party_of_three();

        let result = net.mux(ann).send_chat("hi", Some(&[1][..]), None);
        assert!(matches!(result, Err(PartyError::HostOnly { .. })));
    }
}

mod kick_vote_tests {
    use super::*;

    /// Tests that the yes threshold follows the party size while a vote runs
    #[test]
    fn vote_passes_after_a_voter_leaves() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        let bob = net.add_node("Bob", 8);
        let cat = net.add_node("Cat", 8);
        let mal = net.add_node("Mal", 8);
        for client in [ann, bob, cat, mal] {
            net.join(client, host);
        }

        net.mux(ann).request_kick_vote(3).unwrap();
        net.deliver();
        assert!(net.nodes[bob]
            .notices()
            .contains(&"Ann started a vote to kick Mal. Type 1 to vote yes or 2 to vote no."));

        net.mux(bob).send_chat("1", None, None).unwrap();
        net.deliver();
        assert!(net.nodes[bob].notices().contains(&"Your vote was recorded."));

        // Two of three needed yes votes among four clients
        net.advance(STEP);
        assert!(is_joined(&net, mal));

        net.leave(cat);
        net.advance(STEP);

        assert!(net.mux(mal).host_peer().is_none());
        assert!(net.nodes[mal]
            .notices()
            .contains(&"You were removed from the party."));
        assert!(net.nodes[ann]
            .notices()
            .contains(&"The vote passed. Mal will be removed."));

        // The ban keeps the same process out
        net.join(mal, host);
        assert!(net.mux(mal).host_peer().is_none());
        assert!(net.nodes[mal].notices().contains(&"The party is full."));
    }

    /// Tests that a vote in a small party is refused with a reason
    #[test]
    fn small_party_cannot_vote() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        let bob = net.add_node("Bob", 8);
        net.join(ann, host);
        net.join(bob, host);

        net.mux(ann).request_kick_vote(1).unwrap();
        net.deliver();

        assert!(net.nodes[ann]
            .notices()
            .contains(&"Kick votes need at least 3 players."));
        assert!(is_joined(&net, bob));
    }
}

mod ban_tests {
    use super::*;

    /// Tests that a kick ban lasts exactly its duration
    #[test]
    fn ban_expires_at_deadline() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.join(ann, host);

        let now = net.now;
        net.mux(host)
            .disconnect_client(0, Some(Duration::from_secs(2)), now)
            .unwrap();
        net.deliver();

        net.advance(Duration::from_secs(1));
        net.join(ann, host);
        assert!(net.mux(ann).host_peer().is_none());
        assert!(net.nodes[ann].notices().contains(&"The party is full."));

        net.advance(Duration::from_secs(1));
        net.join(ann, host);
        assert!(is_joined(&net, ann));
    }
}

mod roster_tests {
    use super::*;
    use party::timing::ROSTER_INTERVAL;

    /// Tests that clients see membership changes through roster broadcasts
    #[test]
    fn roster_follows_membership() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        let bob = net.add_node("Bob", 8);
        net.join(ann, host);
        net.join(bob, host);

        net.advance(ROSTER_INTERVAL);
        let roster = net.mux(ann).roster();
        assert_eq!(roster.party_name, "Hana's party");
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.find(1).map(|e| e.spec.display_name()), Some("Bob"));

        net.leave(bob);
        net.advance(ROSTER_INTERVAL);
        assert_eq!(net.mux(ann).roster().len(), 2);
        assert_eq!(net.mux(host).public_party_info().size, 2);
    }

    /// Tests that renaming the party reaches joined clients
    #[test]
    fn rename_reaches_clients() {
        let mut net = SimNet::new();
        let host = net.add_node("Hana", 8);
        let ann = net.add_node("Ann", 8);
        net.join(ann, host);

        net.mux(host).set_party_name("Night Shift");
        net.advance(ROSTER_INTERVAL);

        let peer = net.mux(ann).host_peer().unwrap();
        assert_eq!(peer.party_name.as_deref(), Some("Night Shift"));
        assert_eq!(net.mux(ann).roster().party_name, "Night Shift");
    }
}
