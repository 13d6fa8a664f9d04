//! Consensus kicking
//!
//! At most one vote runs at a time. The threshold is recomputed from the
//! current number of communicating clients every time the vote is evaluated,
//! so joins and leaves during a vote move the bar.

use party_shared::ConnectionId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::client_table::{ClientTable, PeerHandle};
use crate::peer::Peer;
use crate::timing::{KICK_VOTE_COOLDOWN, KICK_VOTE_DURATION};

/// Fewest communicating clients for which a vote may start
pub const MIN_VOTE_CLIENTS: usize = 3;

/// Yes votes required with `live` communicating clients
pub fn votes_needed(live: usize) -> usize {
    (live / 2 + 1).max(2)
}

/// Chat lines that count as ballots while a vote runs
pub fn parse_ballot(message: &str) -> Option<bool> {
    match message.trim() {
        "1" => Some(true),
        "2" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartVoteError {
    Disabled,
    InProgress,
    NotLive,
    SelfTarget,
    TooFewClients,
    Cooldown { remaining: Duration },
}

impl StartVoteError {
    pub fn message(&self) -> String {
        match self {
            StartVoteError::Disabled => "Kick votes are disabled in this party.".to_string(),
            StartVoteError::InProgress => "A kick vote is already in progress.".to_string(),
            StartVoteError::NotLive => "That player is not in the party.".to_string(),
            StartVoteError::SelfTarget => "You cannot vote to kick yourself.".to_string(),
            StartVoteError::TooFewClients => {
                format!("Kick votes need at least {} players.", MIN_VOTE_CLIENTS)
            }
            StartVoteError::Cooldown { remaining } => format!(
                "You must wait {}s before starting another kick vote.",
                remaining.as_secs().max(1)
            ),
        }
    }
}

/// How an in-flight vote ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResolution {
    Passed { target: PeerHandle },
    Expired { target: PeerHandle },
    Canceled { target: PeerHandle },
}

#[derive(Debug, Clone)]
pub struct KickVote {
    pub starter: PeerHandle,
    pub target: PeerHandle,
    pub end_time: Instant,
    ballots: HashMap<PeerHandle, bool>,
}

impl KickVote {
    /// Yes ballots from voters that are still communicating
    pub fn live_yes_count(&self, table: &ClientTable) -> usize {
        self.ballots
            .iter()
            .filter(|(voter, yes)| {
                **yes
                    && table
                        .get_live(**voter)
                        .is_some_and(|peer| peer.can_communicate())
            })
            .count()
    }
}

/// `None` is idle
#[derive(Debug, Default)]
pub struct KickVoteState {
    vote: Option<KickVote>,
}

impl KickVoteState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&KickVote> {
        self.vote.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.vote.is_some()
    }

    pub fn start(
        &mut self,
        table: &ClientTable,
        starter: ConnectionId,
        target: ConnectionId,
        enabled: bool,
        now: Instant,
    ) -> Result<&KickVote, StartVoteError> {
        if !enabled {
            return Err(StartVoteError::Disabled);
        }
        if self.vote.is_some() {
            return Err(StartVoteError::InProgress);
        }
        if starter == target {
            return Err(StartVoteError::SelfTarget);
        }

        let live = |id: ConnectionId| table.get(id).is_some_and(|peer| peer.can_communicate());
        if !live(starter) || !live(target) {
            return Err(StartVoteError::NotLive);
        }
        if table.communicating_count() < MIN_VOTE_CLIENTS {
            return Err(StartVoteError::TooFewClients);
        }
        if let Some(last) = table.get(starter).and_then(|peer| peer.last_kick_vote_start) {
            let since = now.saturating_duration_since(last);
            if since < KICK_VOTE_COOLDOWN {
                return Err(StartVoteError::Cooldown {
                    remaining: KICK_VOTE_COOLDOWN - since,
                });
            }
        }

        let (Some(starter), Some(target)) = (table.handle(starter), table.handle(target)) else {
            return Err(StartVoteError::NotLive);
        };

        let mut ballots = HashMap::new();
        ballots.insert(starter, true);

        Ok(self.vote.insert(KickVote {
            starter,
            target,
            end_time: now + KICK_VOTE_DURATION,
            ballots,
        }))
    }

    /// Records a ballot; false if there is no vote or the voter may not vote
    pub fn cast(&mut self, table: &ClientTable, voter: ConnectionId, yes: bool) -> bool {
        let Some(vote) = self.vote.as_mut() else {
            return false;
        };
        let Some(handle) = table.handle(voter) else {
            return false;
        };
        if handle == vote.target {
            return false;
        }
        vote.ballots.insert(handle, yes);
        true
    }

    /// Cancels the vote when its starter or target has gone away
    pub fn on_client_removed(&mut self, id: ConnectionId) -> Option<VoteResolution> {
        let vote = self.vote.as_ref()?;
        if vote.starter.id == id || vote.target.id == id {
            let target = vote.target;
            self.vote = None;
            return Some(VoteResolution::Canceled { target });
        }
        None
    }

    /// Periodic check; returns to idle whenever it resolves
    pub fn evaluate(&mut self, table: &ClientTable, now: Instant) -> Option<VoteResolution> {
        let vote = self.vote.as_ref()?;
        let target = vote.target;

        let resolution = if !table.is_live(vote.starter) || !table.is_live(target) {
            VoteResolution::Canceled { target }
        } else if now >= vote.end_time {
            VoteResolution::Expired { target }
        } else if vote.live_yes_count(table) >= votes_needed(table.communicating_count()) {
            VoteResolution::Passed { target }
        } else {
            return None;
        };

        self.vote = None;
        Some(resolution)
    }
}
