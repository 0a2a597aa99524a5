use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ProtocolViolation;
use crate::protocol::TagValue;

pub const VALUE_CONFLICT: &str = "VALUE_CONFLICT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side wins when a conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Shadow,
    Live,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Shadow => "shadow",
            Resolution::Live => "live",
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shadow" => Ok(Resolution::Shadow),
            "live" => Ok(Resolution::Live),
            other => Err(anyhow::anyhow!("unknown resolution '{other}' (expected shadow or live)")),
        }
    }
}

/// Where a conflict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictOrigin {
    /// Divergence seen in tag updates.
    Detected,
    /// Declared by the broker in a `conflict` frame.
    Reported,
    /// Injected by `simulate_conflicts`.
    Simulated,
}

impl ConflictOrigin {
    pub fn is_simulated(&self) -> bool {
        matches!(self, ConflictOrigin::Simulated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub tag_name: String,
    pub shadow_value: TagValue,
    pub live_value: TagValue,
    /// Detection time, refreshed when the divergence is seen again.
    pub timestamp: DateTime<Utc>,
    pub conflict_type: String,
    pub description: Option<String>,
    pub resolved: bool,
    pub resolution: Option<Resolution>,
    pub origin: ConflictOrigin,
}

/// A divergence about to be recorded.
#[derive(Debug, Clone)]
pub struct Divergence {
    pub tag_name: String,
    pub shadow_value: TagValue,
    pub live_value: TagValue,
    pub timestamp: DateTime<Utc>,
    pub conflict_type: Option<String>,
    pub description: Option<String>,
    pub origin: ConflictOrigin,
}

/// Outcome of [`ConflictSet::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChange {
    Opened(ConflictId),
    Refreshed(ConflictId),
    /// A real divergence replaced an open simulated entry for the tag.
    Superseded { simulated: ConflictId, id: ConflictId },
    /// A simulated divergence met an open real conflict, which is kept as is.
    Held(ConflictId),
    /// Values match; any open conflict for the tag is left as it is.
    Unchanged,
}

/// Ordered conflict set holding at most one unresolved entry per tag.
/// Resolved entries stay for audit until a push commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictSet {
    entries: Vec<Conflict>,
}

impl ConflictSet {
    /// Record a divergence. Simulated and real (detected or reported)
    /// entries never merge: a real divergence replaces an open simulated
    /// entry, and a simulated one never touches an open real entry.
    pub fn observe(&mut self, divergence: Divergence) -> ConflictChange {
        if divergence.shadow_value.same_as(&divergence.live_value) {
            return ConflictChange::Unchanged;
        }

        let mut superseded = None;
        if let Some(pos) = self
            .entries
            .iter()
            .position(|c| !c.resolved && c.tag_name == divergence.tag_name)
        {
            let open = &mut self.entries[pos];
            match (open.origin.is_simulated(), divergence.origin.is_simulated()) {
                (false, true) => return ConflictChange::Held(open.id),
                (true, false) => superseded = Some(self.entries.remove(pos).id),
                _ => {
                    open.shadow_value = divergence.shadow_value;
                    open.live_value = divergence.live_value;
                    open.timestamp = divergence.timestamp;
                    if let Some(kind) = divergence.conflict_type {
                        open.conflict_type = kind;
                    }
                    if divergence.description.is_some() {
                        open.description = divergence.description;
                    }
                    return ConflictChange::Refreshed(open.id);
                }
            }
        }

        let id = ConflictId::new();
        self.entries.push(Conflict {
            id,
            tag_name: divergence.tag_name,
            shadow_value: divergence.shadow_value,
            live_value: divergence.live_value,
            timestamp: divergence.timestamp,
            conflict_type: divergence
                .conflict_type
                .unwrap_or_else(|| VALUE_CONFLICT.to_string()),
            description: divergence.description,
            resolved: false,
            resolution: None,
            origin: divergence.origin,
        });
        match superseded {
            Some(simulated) => ConflictChange::Superseded { simulated, id },
            None => ConflictChange::Opened(id),
        }
    }

    /// Mark one conflict resolved. Values are never touched.
    pub fn resolve(&mut self, id: ConflictId, resolution: Resolution) -> Result<&Conflict, ProtocolViolation> {
        let conflict = self
            .entries
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ProtocolViolation::UnknownConflict(id))?;
        if conflict.resolved {
            return Err(ProtocolViolation::AlreadyResolved(id));
        }
        conflict.resolved = true;
        conflict.resolution = Some(resolution);
        Ok(conflict)
    }

    pub fn get(&self, id: ConflictId) -> Option<&Conflict> {
        self.entries.iter().find(|c| c.id == id)
    }

    pub fn open_for(&self, tag_name: &str) -> Option<&Conflict> {
        self.entries
            .iter()
            .find(|c| !c.resolved && c.tag_name == tag_name)
    }

    /// Look up by full id or unambiguous id prefix.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<&Conflict> {
        let mut matches = self
            .entries
            .iter()
            .filter(|c| c.id.to_string().starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &Conflict> {
        self.entries.iter().filter(|c| !c.resolved)
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conflict> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop resolved entries, keeping anything still open.
    pub fn clear_resolved(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|c| !c.resolved);
        before - self.entries.len()
    }
}
