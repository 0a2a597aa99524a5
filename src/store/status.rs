use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::ConflictSet;
use crate::protocol::ExecutionMode;

/// Connection and runtime health plus the conflict set.
///
/// Only [`SyncStore`](super::SyncStore) mutates this; everyone else reads
/// clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub shadow_ok: bool,
    pub live_ok: bool,
    pub execution_mode: ExecutionMode,
    /// Last heartbeat round trip.
    pub latency_ms: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub conflicts: ConflictSet,
}

impl ConnectionStatus {
    /// Runtime health is unknown while offline and is reported as not ok.
    /// Conflicts and the last sync time survive the disconnect.
    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
        self.shadow_ok = false;
        self.live_ok = false;
        self.execution_mode = ExecutionMode::Unset;
        self.latency_ms = 0;
    }

    pub fn unresolved_count(&self) -> usize {
        self.conflicts.unresolved_count()
    }
}
