use log::debug;
use party_shared::Packet;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Encoded datagram waiting for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub bytes: Vec<u8>,
    pub addr: SocketAddr,
}

/// Non-blocking send side handed to the multiplexer
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundPacket>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<OutboundPacket>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, packet: &Packet, addr: SocketAddr) {
        let bytes = packet.encode();
        if self.tx.send(OutboundPacket { bytes, addr }).is_err() {
            debug!("Writer is gone, dropping {:?} for {}", packet.tag(), addr);
        }
    }
}
