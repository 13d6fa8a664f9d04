use log::info;
use party_shared::PlayerSpec;
use std::time::{Duration, Instant};

/// One timed ban
#[derive(Debug, Clone)]
pub struct BanEntry {
    /// `None` when the duration runs past what `Instant` can represent
    pub expires_at: Option<Instant>,
    pub spec: Option<PlayerSpec>,
    /// Process the banned player was connecting from, when known
    pub instance_uuid: Option<String>,
}

/// Timed bans consulted whenever a client asks to join or identifies itself
///
/// Expired entries are dropped lazily by the lookups.
#[derive(Debug, Default)]
pub struct BanList {
    entries: Vec<BanEntry>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&mut self, spec: PlayerSpec, duration: Duration, now: Instant) {
        self.ban_peer(Some(spec), None, duration, now);
    }

    pub fn ban_peer(
        &mut self,
        spec: Option<PlayerSpec>,
        instance_uuid: Option<String>,
        duration: Duration,
        now: Instant,
    ) {
        if spec.is_none() && instance_uuid.is_none() {
            return;
        }
        info!(
            "Banning {} for {}s",
            spec.as_ref().map_or("unidentified client", |s| s.display_name()),
            duration.as_secs()
        );
        self.entries.push(BanEntry {
            expires_at: now.checked_add(duration),
            spec,
            instance_uuid,
        });
    }

    /// Exact identity match against unexpired bans
    pub fn is_banned(&mut self, spec: &PlayerSpec, now: Instant) -> bool {
        self.prune(now);
        self.entries
            .iter()
            .any(|entry| entry.spec.as_ref() == Some(spec))
    }

    pub fn is_instance_banned(&mut self, instance_uuid: &str, now: Instant) -> bool {
        self.prune(now);
        self.entries
            .iter()
            .any(|entry| entry.instance_uuid.as_deref() == Some(instance_uuid))
    }

    /// A ban ending exactly at `now` no longer applies
    pub fn prune(&mut self, now: Instant) {
        self.entries
            .retain(|entry| entry.expires_at.map_or(true, |expiry| expiry > now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ban_holds_until_expiry() {
        let mut bans = BanList::new();
        let start = Instant::now();
        let spec = PlayerSpec::from_name("Mallory");

        bans.ban(spec.clone(), Duration::from_secs(2), start);

        assert!(bans.is_banned(&spec, start));
        assert!(bans.is_banned(&spec, start + Duration::from_millis(1999)));
        assert!(!bans.is_banned(&spec, start + Duration::from_secs(2)));
        assert!(bans.is_empty());
    }

    #[test]
    fn test_ban_requires_exact_identity() {
        let mut bans = BanList::new();
        let now = Instant::now();

        bans.ban(PlayerSpec::new("Mallory", Some("acct-1")), Duration::from_secs(60), now);

        assert!(!bans.is_banned(&PlayerSpec::from_name("Mallory"), now));
        assert!(bans.is_banned(&PlayerSpec::new("Mallory", Some("acct-1")), now));
    }

    #[test]
    fn test_instance_ban() {
        let mut bans = BanList::new();
        let now = Instant::now();

        bans.ban_peer(None, Some("uuid-1".to_string()), Duration::from_secs(5), now);

        assert!(bans.is_instance_banned("uuid-1", now));
        assert!(!bans.is_instance_banned("uuid-2", now));
        assert!(!bans.is_instance_banned("uuid-1", now + Duration::from_secs(5)));
    }

    #[test]
    fn test_unrepresentable_duration_never_expires() {
        let mut bans = BanList::new();
        let now = Instant::now();
        let spec = PlayerSpec::from_name("Mallory");

        bans.ban(spec.clone(), Duration::from_secs(u64::MAX), now);

        assert!(bans.is_banned(&spec, now + Duration::from_secs(10 * 365 * 24 * 3600)));
        assert_eq!(bans.len(), 1);
    }

    #[test]
    fn test_empty_identity_is_ignored() {
        let mut bans = BanList::new();
        bans.ban_peer(None, None, Duration::from_secs(5), Instant::now());
        assert_eq!(bans.len(), 0);
    }
}
