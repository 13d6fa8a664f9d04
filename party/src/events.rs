use party_shared::{ConnectionId, Roster};

/// Things the surrounding session or UI layer gets told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyEvent {
    /// One-line message for the local user
    Notice(String),
    /// Host answered our ClientInfo; we can now talk in the party
    JoinedParty {
        connection_id: ConnectionId,
        party_name: String,
    },
    /// Our HostPeer is gone, whatever the reason
    LeftParty,
    ClientJoined {
        connection_id: ConnectionId,
        name: String,
    },
    ClientLeft {
        connection_id: ConnectionId,
        name: String,
    },
    Chat {
        sender: Option<String>,
        message: String,
    },
    RosterUpdated(Roster),
    /// Opaque game data; `from` is `None` when it came from our host
    GamePayload {
        from: Option<ConnectionId>,
        payload: Vec<u8>,
    },
}
