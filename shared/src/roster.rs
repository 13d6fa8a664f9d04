use serde::{Deserialize, Serialize};

use crate::spec::PlayerSpec;

/// One member of the party as broadcast to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// `None` for the host itself
    pub client_id: Option<u8>,
    pub spec: PlayerSpec,
}

/// Snapshot of everyone who can currently communicate in the party
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub party_name: String,
    pub max_size: u8,
    pub entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, client_id: u8) -> Option<&RosterEntry> {
        self.entries
            .iter()
            .find(|entry| entry.client_id == Some(client_id))
    }
}
