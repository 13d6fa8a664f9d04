//! Party runtime: socket tasks around a single logic loop
//!
//! - the reader task owns the receive side of the socket and hands datagrams
//!   to the logic loop through a bounded channel, gated per source address
//! - the writer task drains the [`Outbox`] channel and does the actual sends
//! - the logic loop owns the [`ConnectionMux`] and is the only place protocol
//!   state is touched; it selects over datagrams, the tick interval and
//!   [`PartyCommand`]s from any number of [`PartyHandle`]s

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use party_shared::{ConnectionId, Roster};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::PartyConfig;
use crate::error::{PartyError, Result};
use crate::events::PartyEvent;
use crate::mux::ConnectionMux;
use crate::outbox::{OutboundPacket, Outbox};
use crate::policy::PublicPartyInfo;

/// Largest datagram the reader accepts
const MAX_DATAGRAM: usize = 65_536;

/// Datagram on its way from the reader to the logic loop
#[derive(Debug)]
pub struct Inbound {
    pub data: Vec<u8>,
    pub addr: SocketAddr,
}

/// Requests from the session or UI layer, executed inside the logic loop
#[derive(Debug)]
pub enum PartyCommand {
    ConnectToHost(SocketAddr),
    DisconnectFromHost {
        reply: oneshot::Sender<Result<()>>,
    },
    DisconnectClient {
        id: ConnectionId,
        ban: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
    SendChat {
        message: String,
        targets: Option<Vec<ConnectionId>>,
        sender_override: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    RequestKickVote {
        target: ConnectionId,
        reply: oneshot::Sender<Result<()>>,
    },
    SendGamePayload {
        target: Option<ConnectionId>,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetPartyName(String),
    SetPublicPartyEnabled(bool),
    SetMaxPartySize(u8),
    SetAdminList(Vec<String>),
    SetKickVotingEnabled(bool),
    GetConnectedClientCount(oneshot::Sender<usize>),
    GetRoster(oneshot::Sender<Roster>),
    GetPublicPartyInfo(oneshot::Sender<PublicPartyInfo>),
    Shutdown,
}

/// Per-source cap on datagrams waiting for the logic loop
#[derive(Debug)]
pub struct FloodGate {
    limit: usize,
    pending: Mutex<HashMap<IpAddr, usize>>,
}

impl FloodGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves a slot for `source`; false once it already has `limit` pending
    pub fn try_acquire(&self, source: IpAddr) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let count = pending.entry(source).or_insert(0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }

    pub fn release(&self, source: IpAddr) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = pending.get_mut(&source) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&source);
            }
        }
    }

    pub fn pending(&self, source: IpAddr) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get(&source).copied().unwrap_or(0)
    }
}

/// Cloneable way into a running [`PartyNode`]
#[derive(Debug, Clone)]
pub struct PartyHandle {
    commands: mpsc::UnboundedSender<PartyCommand>,
    paused: Arc<watch::Sender<bool>>,
}

impl PartyHandle {
    fn send(&self, command: PartyCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PartyError::ChannelClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> PartyCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| PartyError::ChannelClosed)
    }

    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.send(PartyCommand::ConnectToHost(addr))
    }

    pub async fn disconnect_from_host(&self) -> Result<()> {
        self.request(|reply| PartyCommand::DisconnectFromHost { reply })
            .await?
    }

    pub async fn disconnect_client(&self, id: ConnectionId, ban: Option<Duration>) -> Result<()> {
        self.request(|reply| PartyCommand::DisconnectClient { id, ban, reply })
            .await?
    }

    pub async fn send_chat(
        &self,
        message: &str,
        targets: Option<Vec<ConnectionId>>,
        sender_override: Option<String>,
    ) -> Result<()> {
        let message = message.to_string();
        self.request(|reply| PartyCommand::SendChat {
            message,
            targets,
            sender_override,
            reply,
        })
        .await?
    }

    pub async fn request_kick_vote(&self, target: ConnectionId) -> Result<()> {
        self.request(|reply| PartyCommand::RequestKickVote { target, reply })
            .await?
    }

    pub async fn send_game_payload(
        &self,
        target: Option<ConnectionId>,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.request(|reply| PartyCommand::SendGamePayload {
            target,
            payload,
            reply,
        })
        .await?
    }

    pub fn set_party_name(&self, name: &str) -> Result<()> {
        self.send(PartyCommand::SetPartyName(name.to_string()))
    }

    pub fn set_public_party_enabled(&self, enabled: bool) -> Result<()> {
        self.send(PartyCommand::SetPublicPartyEnabled(enabled))
    }

    pub fn set_max_party_size(&self, max_size: u8) -> Result<()> {
        self.send(PartyCommand::SetMaxPartySize(max_size))
    }

    pub fn set_admin_list(&self, ids: Vec<String>) -> Result<()> {
        self.send(PartyCommand::SetAdminList(ids))
    }

    pub fn set_kick_voting_enabled(&self, enabled: bool) -> Result<()> {
        self.send(PartyCommand::SetKickVotingEnabled(enabled))
    }

    pub async fn connected_client_count(&self) -> Result<usize> {
        self.request(PartyCommand::GetConnectedClientCount).await
    }

    pub async fn roster(&self) -> Result<Roster> {
        self.request(PartyCommand::GetRoster).await
    }

    pub async fn public_party_info(&self) -> Result<PublicPartyInfo> {
        self.request(PartyCommand::GetPublicPartyInfo).await
    }

    /// Stops reading the socket, e.g. while the app is suspended
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(PartyCommand::Shutdown)
    }
}

/// A bound party endpoint, ready to [`run`](PartyNode::run)
pub struct PartyNode {
    socket: Arc<UdpSocket>,
    mux: ConnectionMux,
    tick_interval: Duration,
    gate: Arc<FloodGate>,
    inbound_capacity: usize,
    outbound_rx: mpsc::UnboundedReceiver<OutboundPacket>,
    commands_rx: mpsc::UnboundedReceiver<PartyCommand>,
    events_tx: mpsc::UnboundedSender<PartyEvent>,
    paused_rx: watch::Receiver<bool>,
}

impl PartyNode {
    pub async fn bind(
        config: &PartyConfig,
    ) -> Result<(Self, PartyHandle, mpsc::UnboundedReceiver<PartyEvent>)> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(config.bind).await?);
        info!("Party endpoint listening on {}", socket.local_addr()?);

        let (outbox, outbound_rx) = Outbox::channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (paused_tx, paused_rx) = watch::channel(false);

        let node = PartyNode {
            socket,
            mux: ConnectionMux::new(config, outbox),
            tick_interval: config.tick_interval(),
            gate: Arc::new(FloodGate::new(config.flood_pending_limit)),
            inbound_capacity: config.flood_pending_limit.saturating_mul(4).max(256),
            outbound_rx,
            commands_rx,
            events_tx,
            paused_rx,
        };
        let handle = PartyHandle {
            commands: commands_tx,
            paused: Arc::new(paused_tx),
        };

        Ok((node, handle, events_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Access before running, e.g. to install a chat filter
    pub fn mux_mut(&mut self) -> &mut ConnectionMux {
        &mut self.mux
    }

    fn spawn_reader(&self, inbound_tx: mpsc::Sender<Inbound>) -> tokio::task::JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let gate = Arc::clone(&self.gate);
        let mut paused = self.paused_rx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                while *paused.borrow_and_update() {
                    if paused.changed().await.is_err() {
                        return;
                    }
                }

                tokio::select! {
                    changed = paused.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok((len, addr)) => {
                            if !gate.try_acquire(addr.ip()) {
                                debug!("Too many pending datagrams from {}, dropping", addr.ip());
                                continue;
                            }
                            let inbound = Inbound { data: buffer[..len].to_vec(), addr };
                            match inbound_tx.try_send(inbound) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    gate.release(addr.ip());
                                    debug!("Logic loop is behind, dropping datagram from {}", addr);
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => return,
                            }
                        }
                        Err(e) => {
                            debug!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        })
    }

    fn spawn_writer(
        &self,
        mut outbound_rx: mpsc::UnboundedReceiver<OutboundPacket>,
    ) -> tokio::task::JoinHandle<()> {
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                if let Err(e) = socket.send_to(&packet.bytes, packet.addr).await {
                    warn!("Failed to send to {}: {}", packet.addr, e);
                }
            }
        })
    }

    /// Runs until shut down through a handle or until every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel(self.inbound_capacity);
        let outbound_rx = std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);
        let reader = self.spawn_reader(inbound_tx);
        let writer = self.spawn_writer(outbound_rx);

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Party loop started");

        loop {
            tokio::select! {
                inbound = inbound_rx.recv() => {
                    let Some(Inbound { data, addr }) = inbound else {
                        error!("Reader task stopped");
                        break;
                    };
                    self.gate.release(addr.ip());
                    self.mux.dispatch(&data, addr, Instant::now());
                }
                _ = ticker.tick() => {
                    self.mux.tick(Instant::now());
                }
                command = self.commands_rx.recv() => {
                    match command {
                        Some(PartyCommand::Shutdown) | None => {
                            info!("Party loop shutting down");
                            break;
                        }
                        Some(command) => self.apply(command),
                    }
                }
            }

            self.forward_events();
        }

        self.mux.shutdown(Instant::now());
        self.forward_events();
        reader.abort();

        // Dropping the mux closes the outbox so the writer drains and exits
        drop(self.mux);
        if tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .is_err()
        {
            debug!("Writer did not drain in time");
        }
        Ok(())
    }

    fn forward_events(&mut self) {
        for event in self.mux.drain_events() {
            if self.events_tx.send(event).is_err() {
                debug!("Nobody is listening for party events");
                break;
            }
        }
    }

    fn apply(&mut self, command: PartyCommand) {
        let now = Instant::now();
        match command {
            PartyCommand::ConnectToHost(addr) => self.mux.connect_to_host(addr, now),
            PartyCommand::DisconnectFromHost { reply } => {
                let _ = reply.send(self.mux.disconnect_from_host(now));
            }
            PartyCommand::DisconnectClient { id, ban, reply } => {
                let _ = reply.send(self.mux.disconnect_client(id, ban, now));
            }
            PartyCommand::SendChat {
                message,
                targets,
                sender_override,
                reply,
            } => {
                let result =
                    self.mux
                        .send_chat(&message, targets.as_deref(), sender_override.as_deref());
                let _ = reply.send(result);
            }
            PartyCommand::RequestKickVote { target, reply } => {
                let _ = reply.send(self.mux.request_kick_vote(target));
            }
            PartyCommand::SendGamePayload {
                target,
                payload,
                reply,
            } => {
                let _ = reply.send(self.mux.send_game_payload(target, payload));
            }
            PartyCommand::SetPartyName(name) => self.mux.set_party_name(&name),
            PartyCommand::SetPublicPartyEnabled(enabled) => {
                self.mux.set_public_party_enabled(enabled)
            }
            PartyCommand::SetMaxPartySize(max_size) => self.mux.set_max_party_size(max_size),
            PartyCommand::SetAdminList(ids) => self.mux.set_admin_list(ids),
            PartyCommand::SetKickVotingEnabled(enabled) => {
                self.mux.set_kick_voting_enabled(enabled)
            }
            PartyCommand::GetConnectedClientCount(reply) => {
                let _ = reply.send(self.mux.connected_client_count());
            }
            PartyCommand::GetRoster(reply) => {
                let _ = reply.send(self.mux.roster());
            }
            PartyCommand::GetPublicPartyInfo(reply) => {
                let _ = reply.send(self.mux.public_party_info());
            }
            PartyCommand::Shutdown => {}
        }
    }
}
