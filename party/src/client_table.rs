//! Host-side table of joined clients
//!
//! This module owns ConnectionID assignment:
//! - IDs live in `[0, 255]` and are reused after a client leaves
//! - allocation walks round-robin from a cursor that only moves forward, so a
//!   freshly freed ID is the last one handed out again
//! - every slot carries a generation counter so stale [`PeerHandle`]s never
//!   match a newer occupant of the same ID

use log::info;
use party_shared::{ConnectionId, RequestId, MAX_CONNECTIONS};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::peer::{ClientPeer, Peer};

/// Reference to a client that stays valid only for that client's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    pub id: ConnectionId,
    pub generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    peer: Option<ClientPeer>,
}

/// All ClientPeers of the local party, indexed by ConnectionID
#[derive(Debug)]
pub struct ClientTable {
    slots: Vec<Slot>,
    /// Where the next allocation search starts
    cursor: ConnectionId,
    len: usize,
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CONNECTIONS).map(|_| Slot::default()).collect(),
            cursor: 0,
            len: 0,
        }
    }

    /// Finds the client created by an earlier request from the same process
    pub fn find_by_uuid(&self, instance_uuid: &str) -> Option<ConnectionId> {
        self.iter()
            .find(|peer| peer.instance_uuid == instance_uuid)
            .map(|peer| peer.connection_id)
    }

    /// Registers a new client under the first free ID at or after the cursor
    ///
    /// Returns `None` when all IDs are taken.
    pub fn allocate(
        &mut self,
        addr: SocketAddr,
        instance_uuid: &str,
        request_id: RequestId,
        now: Instant,
    ) -> Option<ConnectionId> {
        for offset in 0..MAX_CONNECTIONS {
            let id = self.cursor.wrapping_add(offset as u8);
            let slot = &mut self.slots[id as usize];
            if slot.peer.is_some() {
                continue;
            }

            slot.generation = slot.generation.wrapping_add(1);
            slot.peer = Some(ClientPeer::new(id, addr, instance_uuid, request_id, now));
            self.cursor = id.wrapping_add(1);
            self.len += 1;
            info!("Client {} registered from {}", id, addr);
            return Some(id);
        }

        None
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ClientPeer> {
        self.slots[id as usize].peer.as_ref()
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ClientPeer> {
        self.slots[id as usize].peer.as_mut()
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<ClientPeer> {
        let peer = self.slots[id as usize].peer.take()?;
        self.len -= 1;
        info!("Client {} removed", id);
        Some(peer)
    }

    pub fn handle(&self, id: ConnectionId) -> Option<PeerHandle> {
        let slot = &self.slots[id as usize];
        slot.peer.as_ref().map(|_| PeerHandle {
            id,
            generation: slot.generation,
        })
    }

    /// True while the exact client the handle was taken from is still registered
    pub fn is_live(&self, handle: PeerHandle) -> bool {
        let slot = &self.slots[handle.id as usize];
        slot.peer.is_some() && slot.generation == handle.generation
    }

    pub fn get_live(&self, handle: PeerHandle) -> Option<&ClientPeer> {
        if self.is_live(handle) {
            self.get(handle.id)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientPeer> {
        self.slots.iter().filter_map(|slot| slot.peer.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientPeer> {
        self.slots.iter_mut().filter_map(|slot| slot.peer.as_mut())
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.iter().map(|peer| peer.connection_id).collect()
    }

    /// Clients that finished the session handshake
    pub fn communicating(&self) -> impl Iterator<Item = &ClientPeer> {
        self.iter().filter(|peer| peer.can_communicate())
    }

    pub fn communicating_count(&self) -> usize {
        self.communicating().count()
    }

    /// Clients we have not heard from within `timeout`
    pub fn silent_clients(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.iter()
            .filter(|peer| peer.is_silent(now, timeout))
            .map(|peer| peer.connection_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_table_creation() {
        let table = ClientTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_allocate_sequential_ids() {
        let mut table = ClientTable::new();
        let now = Instant::now();

        let id1 = table.allocate(test_addr(), "a", 1, now).unwrap();
        let id2 = table.allocate(test_addr2(), "b", 2, now).unwrap();

        assert_eq!(id1, 0);
        assert_eq!(id2, 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_freed_id_is_not_reused_immediately() {
        let mut table = ClientTable::new();
        let now = Instant::now();

        let first = table.allocate(test_addr(), "a", 1, now).unwrap();
        table.remove(first);

        let second = table.allocate(test_addr(), "b", 2, now).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_cursor_wraps_and_skips_taken_ids() {
        let mut table = ClientTable::new();
        let now = Instant::now();

        for i in 0..MAX_CONNECTIONS {
            let uuid = format!("uuid-{}", i);
            assert_eq!(
                table.allocate(test_addr(), &uuid, 0, now),
                Some(i as ConnectionId)
            );
        }
        assert!(table.allocate(test_addr(), "overflow", 0, now).is_none());

        table.remove(7);
        table.remove(3);
        assert_eq!(table.allocate(test_addr(), "x", 0, now), Some(3));
        assert_eq!(table.allocate(test_addr(), "y", 0, now), Some(7));
    }

    #[test]
    fn test_find_by_uuid() {
        let mut table = ClientTable::new();
        let now = Instant::now();

        let id = table.allocate(test_addr(), "uuid-a", 1, now).unwrap();
        table.allocate(test_addr2(), "uuid-b", 2, now).unwrap();

        assert_eq!(table.find_by_uuid("uuid-a"), Some(id));
        assert_eq!(table.find_by_uuid("uuid-z"), None);
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut table = ClientTable::new();
        assert!(table.remove(42).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_stale_handle_does_not_match_reused_id() {
        let mut table = ClientTable::new();
        let now = Instant::now();

        let id = table.allocate(test_addr(), "a", 1, now).unwrap();
        let handle = table.handle(id).unwrap();
        assert!(table.is_live(handle));

        table.remove(id);
        assert!(!table.is_live(handle));

        // Walk the cursor all the way round so the same ID comes back
        for i in 1..MAX_CONNECTIONS {
            table.allocate(test_addr(), &format!("filler-{}", i), 0, now);
        }
        let reused = table.allocate(test_addr(), "b", 2, now).unwrap();
        assert_eq!(reused, id);
        assert!(!table.is_live(handle));
        assert!(table.get_live(handle).is_none());
    }

    #[test]
    fn test_silent_clients() {
        let mut table = ClientTable::new();
        let start = Instant::now();

        let id = table.allocate(test_addr(), "a", 1, start).unwrap();
        let later = start + Duration::from_secs(3);
        let other = table.allocate(test_addr2(), "b", 2, later).unwrap();

        let silent = table.silent_clients(later, Duration::from_secs(2));
        assert_eq!(silent, vec![id]);
        assert!(!silent.contains(&other));
    }
}
