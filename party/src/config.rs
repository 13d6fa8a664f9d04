//! Party configuration
//!
//! Loaded from an optional TOML file; every field has a default so the
//! binary runs without one. CLI flags override file values in `main`.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PartyError, Result};

/// Longest ban a successful kick vote may hand out
pub const MAX_KICK_VOTE_BAN_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    /// UDP address to bind
    pub bind: SocketAddr,
    pub player_name: String,
    pub account_id: Option<String>,
    pub party_name: String,
    /// Party size including the host
    pub max_party_size: u8,
    pub public_party_enabled: bool,
    pub kick_voting_enabled: bool,
    pub kick_vote_ban_secs: u64,
    /// Public account ids the authentication layer treats as admins
    pub admin_public_ids: Vec<String>,
    pub tick_interval_ms: u64,
    /// Datagrams from one source IP allowed to wait in the logic queue
    pub flood_pending_limit: usize,
    pub chat_history_len: usize,
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], party_shared::DEFAULT_PORT)),
            player_name: "Player".to_string(),
            account_id: None,
            party_name: "Party".to_string(),
            max_party_size: 8,
            public_party_enabled: false,
            kick_voting_enabled: true,
            kick_vote_ban_secs: 300,
            admin_public_ids: Vec::new(),
            tick_interval_ms: 50,
            flood_pending_limit: 64,
            chat_history_len: 40,
        }
    }
}

impl PartyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: PartyConfig =
            toml::from_str(text).map_err(|e| PartyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_party_size < 2 {
            return Err(PartyError::Config(
                "max_party_size must leave room for at least one client".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(PartyError::Config("tick_interval_ms must be positive".to_string()));
        }
        if self.kick_vote_ban_secs > MAX_KICK_VOTE_BAN_SECS {
            return Err(PartyError::Config(format!(
                "kick_vote_ban_secs must be at most {}",
                MAX_KICK_VOTE_BAN_SECS
            )));
        }
        if self.flood_pending_limit == 0 {
            return Err(PartyError::Config(
                "flood_pending_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn kick_vote_ban(&self) -> Duration {
        Duration::from_secs(self.kick_vote_ban_secs)
    }
}
