//! Moderation and presence settings consulted by the multiplexer

use std::time::Duration;

use crate::ban::BanList;
use crate::chat::ChatHistory;
use crate::config::PartyConfig;
use crate::kick_vote::KickVoteState;

/// What the party advertises to the public party browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicParty {
    pub enabled: bool,
    pub name: String,
    /// Includes the host
    pub max_size: u8,
}

/// Advertisement snapshot including the live member count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicPartyInfo {
    pub enabled: bool,
    pub name: String,
    pub size: usize,
    pub max_size: u8,
}

#[derive(Debug)]
pub struct PartyPolicy {
    pub bans: BanList,
    pub kick_vote: KickVoteState,
    pub kick_voting_enabled: bool,
    /// Ban applied to the target of a successful kick vote
    pub kick_vote_ban: Duration,
    pub public_party: PublicParty,
    pub chat_history: ChatHistory,
    admin_public_ids: Vec<String>,
}

impl PartyPolicy {
    pub fn from_config(config: &PartyConfig) -> Self {
        Self {
            bans: BanList::new(),
            kick_vote: KickVoteState::new(),
            kick_voting_enabled: config.kick_voting_enabled,
            kick_vote_ban: config.kick_vote_ban(),
            public_party: PublicParty {
                enabled: config.public_party_enabled,
                name: config.party_name.clone(),
                max_size: config.max_party_size,
            },
            chat_history: ChatHistory::new(config.chat_history_len),
            admin_public_ids: config.admin_public_ids.clone(),
        }
    }

    /// Only stored here; the authentication layer does the checking
    pub fn admin_public_ids(&self) -> &[String] {
        &self.admin_public_ids
    }

    pub fn set_admin_public_ids(&mut self, ids: Vec<String>) {
        self.admin_public_ids = ids;
    }

    /// Most clients the party admits, leaving one place for the host
    pub fn client_capacity(&self) -> usize {
        usize::from(self.public_party.max_size).saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_follows_config() {
        let config = PartyConfig {
            party_name: "Crew".to_string(),
            max_party_size: 4,
            kick_voting_enabled: false,
            admin_public_ids: vec!["pb-7".to_string()],
            ..PartyConfig::default()
        };
        let policy = PartyPolicy::from_config(&config);

        assert_eq!(policy.public_party.name, "Crew");
        assert_eq!(policy.client_capacity(), 3);
        assert!(!policy.kick_voting_enabled);
        assert_eq!(policy.admin_public_ids(), ["pb-7".to_string()]);
        assert_eq!(policy.kick_vote_ban, Duration::from_secs(300));
    }
}
