//! Player identity blob shared between host and clients

use serde::{Deserialize, Serialize};

/// Upper bound on name + account characters carried in a spec
pub const MAX_SPEC_CHARS: usize = 50;

/// Marker appended to names cut down to fit [`MAX_SPEC_CHARS`]
pub const ELLIPSIS: char = '…';

/// Identity shown next to chat lines and in the roster
///
/// Two specs identify the same player when they compare equal; bans match on
/// this exact equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerSpec {
    pub name: String,
    pub account: Option<String>,
}

impl PlayerSpec {
    pub fn new(name: &str, account: Option<&str>) -> Self {
        let account = account.map(|a| a.chars().take(MAX_SPEC_CHARS / 2).collect::<String>());
        let budget = MAX_SPEC_CHARS - account.as_ref().map_or(0, |a| a.chars().count());

        let name = if name.chars().count() > budget {
            let mut cut: String = name.chars().take(budget.saturating_sub(1)).collect();
            cut.push(ELLIPSIS);
            cut
        } else {
            name.to_string()
        };

        Self { name, account }
    }

    /// Spec for a bare display name, used for host sender overrides
    pub fn from_name(name: &str) -> Self {
        Self::new(name, None)
    }

    /// Same identity cut down to the size `new` would have produced
    pub fn normalized(&self) -> Self {
        Self::new(&self.name, self.account.as_deref())
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Serialized form; always short enough for a one-byte length prefix
    pub fn to_blob(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        let spec: PlayerSpec = bincode::deserialize(blob).ok()?;
        let chars = spec.name.chars().count() + spec.account.as_ref().map_or(0, |a| a.chars().count());
        if chars > MAX_SPEC_CHARS {
            return None;
        }
        Some(spec)
    }
}
