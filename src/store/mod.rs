//! Sync state store: the domain state machine.
//!
//! Every mutation of connection status, the conflict set, the event log and
//! the tag buffers goes through a named operation here. Callers share the
//! store as `Arc<Mutex<SyncStore>>` and never hold the lock across an
//! `.await`, so each operation applies completely before the next event.

pub mod conflict;
pub mod log;
pub mod samples;
pub mod status;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ProtocolViolation;
use crate::event::{EventPayload, SyncEvent};
use crate::protocol::{Runtime, TagValue};

pub use conflict::{
    Conflict, ConflictChange, ConflictId, ConflictOrigin, ConflictSet, Divergence, Resolution,
    VALUE_CONFLICT,
};
pub use log::EventLog;
pub use samples::{TagBuffer, TagSample};
pub use status::ConnectionStatus;

/// The store as shared between the event loop, the orchestrator and callers.
pub type SharedStore = Arc<Mutex<SyncStore>>;

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub event_log_capacity: usize,
    pub sample_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_log_capacity: log::DEFAULT_EVENT_LOG,
            sample_capacity: samples::DEFAULT_SAMPLE_CAPACITY,
        }
    }
}

/// Last known value of a tag on each runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagPair {
    pub shadow: Option<TagValue>,
    pub live: Option<TagValue>,
}

impl TagPair {
    fn set(&mut self, runtime: Runtime, value: TagValue) {
        match runtime {
            Runtime::Shadow => self.shadow = Some(value),
            Runtime::Live => self.live = Some(value),
        }
    }
}

/// A broken store invariant found by [`SyncStore::check_integrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    DuplicateOpenConflict { tag_name: String },
    ResolutionMismatch { id: ConflictId },
    NoDivergence { id: ConflictId, tag_name: String },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::DuplicateOpenConflict { tag_name } => {
                write!(f, "more than one open conflict for {tag_name}")
            }
            IntegrityIssue::ResolutionMismatch { id } => {
                write!(f, "conflict {id} has resolved flag and resolution out of step")
            }
            IntegrityIssue::NoDivergence { id, tag_name } => {
                write!(f, "conflict {id} on {tag_name} records matching values")
            }
        }
    }
}

#[derive(Debug)]
pub struct SyncStore {
    status: ConnectionStatus,
    tags: HashMap<String, TagPair>,
    events: EventLog,
    samples: TagBuffer,
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl SyncStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            status: ConnectionStatus::default(),
            tags: HashMap::new(),
            events: EventLog::with_capacity(config.event_log_capacity),
            samples: TagBuffer::with_capacity(config.sample_capacity),
        }
    }

    /// Apply one dispatched event and record it in the event log.
    pub fn apply(&mut self, event: &SyncEvent) {
        match &event.payload {
            EventPayload::Connected { client_id } => {
                if !self.status.connected {
                    info!(client_id = ?client_id, "sync session connected");
                }
                self.status.connected = true;
                self.status.latency_ms = 0;
            }
            EventPayload::Disconnected { reason } => {
                if self.status.connected {
                    warn!(%reason, "sync session disconnected");
                }
                self.status.mark_disconnected();
            }
            EventPayload::Heartbeat { latency_ms } => {
                self.status.latency_ms = *latency_ms;
            }
            EventPayload::TagUpdate {
                name,
                value,
                runtime,
            } => self.apply_tag_update(name, value, *runtime, event.timestamp),
            EventPayload::Conflict {
                tag_name,
                shadow_value,
                live_value,
                conflict_type,
                description,
            } => {
                let pair = self.tags.entry(tag_name.clone()).or_default();
                pair.shadow = Some(shadow_value.clone());
                pair.live = Some(live_value.clone());
                let change = self.status.conflicts.observe(Divergence {
                    tag_name: tag_name.clone(),
                    shadow_value: shadow_value.clone(),
                    live_value: live_value.clone(),
                    timestamp: event.timestamp,
                    conflict_type: conflict_type.clone(),
                    description: description.clone(),
                    origin: ConflictOrigin::Reported,
                });
                if change == ConflictChange::Unchanged {
                    debug!(tag = %tag_name, "broker reported a conflict with matching values; ignored");
                } else {
                    log_change(tag_name, change);
                }
            }
            EventPayload::StatusUpdate {
                shadow_ok,
                live_ok,
                execution_mode,
            } => {
                if let Some(ok) = shadow_ok {
                    self.status.shadow_ok = *ok;
                }
                if let Some(ok) = live_ok {
                    self.status.live_ok = *ok;
                }
                if let Some(mode) = execution_mode {
                    self.status.execution_mode = *mode;
                }
            }
            // recorded for observability; the orchestrator owns push state
            EventPayload::Resolved { .. }
            | EventPayload::PushRequest { .. }
            | EventPayload::PushResponse { .. } => {}
        }
        self.events.push(event.clone());
    }

    fn apply_tag_update(&mut self, name: &str, value: &TagValue, runtime: Runtime, at: DateTime<Utc>) {
        self.samples.push(TagSample {
            name: name.to_string(),
            value: value.clone(),
            runtime,
            timestamp: at,
        });

        let pair = self.tags.entry(name.to_string()).or_default();
        pair.set(runtime, value.clone());
        let (Some(shadow), Some(live)) = (pair.shadow.clone(), pair.live.clone()) else {
            return;
        };

        let change = self.status.conflicts.observe(Divergence {
            tag_name: name.to_string(),
            shadow_value: shadow,
            live_value: live,
            timestamp: at,
            conflict_type: None,
            description: None,
            origin: ConflictOrigin::Detected,
        });
        log_change(name, change);
    }

    /// Resolve one conflict in place and append an audit event.
    pub fn resolve_conflict(
        &mut self,
        id: ConflictId,
        resolution: Resolution,
    ) -> Result<Conflict, ProtocolViolation> {
        let resolved = match self.status.conflicts.resolve(id, resolution) {
            Ok(conflict) => conflict.clone(),
            Err(violation) => {
                warn!(conflict_id = %id, error = %violation, "resolution rejected");
                return Err(violation);
            }
        };
        info!(
            conflict_id = %id,
            tag = %resolved.tag_name,
            resolution = resolution.as_str(),
            "conflict resolved"
        );
        self.events.push(SyncEvent::new(EventPayload::Resolved {
            conflict_id: id,
            tag_name: resolved.tag_name.clone(),
            resolution,
        }));
        Ok(resolved)
    }

    /// Resolve every open conflict with the same side. Returns the ids resolved.
    pub fn resolve_all_conflicts(&mut self, resolution: Resolution) -> Vec<ConflictId> {
        let open: Vec<ConflictId> = self.status.conflicts.unresolved().map(|c| c.id).collect();
        open.into_iter()
            .filter(|id| self.resolve_conflict(*id, resolution).is_ok())
            .collect()
    }

    /// Inject synthetic conflicts for exercising resolution without a real
    /// divergence. Each is marked [`ConflictOrigin::Simulated`] and does not
    /// touch the tag values used for detection. Tags with an open detected or
    /// reported conflict are skipped. Returns the simulated entries opened or
    /// refreshed.
    pub fn simulate_conflicts(&mut self) -> Vec<ConflictId> {
        let now = Utc::now();
        let synthetic = [
            ("Tank_Level", TagValue::Number(50.0), TagValue::Number(48.0), "level drift"),
            ("Pump_Status", TagValue::Bool(true), TagValue::Bool(false), "pump state mismatch"),
            ("Mixer_Mode", TagValue::from("AUTO"), TagValue::from("MANUAL"), "mode mismatch"),
        ];
        let mut ids = Vec::new();
        for (tag, shadow, live, description) in synthetic {
            let change = self.status.conflicts.observe(Divergence {
                tag_name: tag.to_string(),
                shadow_value: shadow,
                live_value: live,
                timestamp: now,
                conflict_type: None,
                description: Some(description.to_string()),
                origin: ConflictOrigin::Simulated,
            });
            match change {
                ConflictChange::Opened(id) | ConflictChange::Refreshed(id) => ids.push(id),
                ConflictChange::Held(real) => {
                    debug!(%tag, conflict_id = %real, "real conflict open; simulation skipped")
                }
                ConflictChange::Superseded { .. } | ConflictChange::Unchanged => {}
            }
        }
        info!(count = ids.len(), "simulated conflicts injected");
        ids
    }

    /// Push is allowed only with zero open conflicts and a ready shadow runtime.
    pub fn check_push_gate(&self) -> Result<(), ProtocolViolation> {
        let count = self.status.conflicts.unresolved_count();
        if count > 0 {
            return Err(ProtocolViolation::UnresolvedConflicts { count });
        }
        if !self.status.shadow_ok {
            return Err(ProtocolViolation::ShadowNotReady);
        }
        Ok(())
    }

    pub fn record_push_request(&mut self, logic_id: &str) {
        self.events.push(SyncEvent::new(EventPayload::PushRequest {
            logic_id: logic_id.to_string(),
        }));
    }

    /// A push was accepted: stamp the sync time and drop the resolved
    /// conflicts. Conflicts opened while the push was in flight stay.
    pub fn commit_push(&mut self, logic_id: &str, at: DateTime<Utc>) {
        let cleared = self.status.conflicts.clear_resolved();
        self.status.last_sync_at = Some(at);
        info!(logic_id, cleared, "push committed");
        self.events.push(SyncEvent::at(
            EventPayload::PushResponse {
                logic_id: logic_id.to_string(),
                success: true,
                error: None,
            },
            at,
        ));
    }

    /// A push failed. State is left untouched so the operator can retry.
    pub fn record_push_failure(&mut self, logic_id: &str, error: &str) {
        self.events.push(SyncEvent::new(EventPayload::PushResponse {
            logic_id: logic_id.to_string(),
            success: false,
            error: Some(error.to_string()),
        }));
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn conflicts(&self) -> &ConflictSet {
        &self.status.conflicts
    }

    pub fn unresolved_conflicts(&self) -> Vec<&Conflict> {
        self.status.conflicts.unresolved().collect()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn samples(&self) -> &TagBuffer {
        &self.samples
    }

    pub fn tag(&self, name: &str) -> Option<&TagPair> {
        self.tags.get(name)
    }

    /// Verify the conflict-set invariants. Simulated conflicts are exempt
    /// from the divergence check.
    pub fn check_integrity(&self) -> Result<(), Vec<IntegrityIssue>> {
        let mut issues = Vec::new();
        let mut open_tags = std::collections::HashSet::new();

        for conflict in self.status.conflicts.iter() {
            if !conflict.resolved && !open_tags.insert(conflict.tag_name.as_str()) {
                issues.push(IntegrityIssue::DuplicateOpenConflict {
                    tag_name: conflict.tag_name.clone(),
                });
            }
            if conflict.resolved != conflict.resolution.is_some() {
                issues.push(IntegrityIssue::ResolutionMismatch { id: conflict.id });
            }
            if conflict.origin != ConflictOrigin::Simulated
                && conflict.shadow_value.same_as(&conflict.live_value)
            {
                issues.push(IntegrityIssue::NoDivergence {
                    id: conflict.id,
                    tag_name: conflict.tag_name.clone(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn log_change(tag: &str, change: ConflictChange) {
    match change {
        ConflictChange::Opened(id) => info!(%tag, conflict_id = %id, "conflict detected"),
        ConflictChange::Refreshed(id) => debug!(%tag, conflict_id = %id, "conflict refreshed"),
        ConflictChange::Superseded { simulated, id } => {
            info!(%tag, conflict_id = %id, %simulated, "conflict detected; simulated entry replaced")
        }
        ConflictChange::Held(_) | ConflictChange::Unchanged => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use proptest::prelude::*;

    fn tag_update(name: &str, value: impl Into<TagValue>, runtime: Runtime) -> SyncEvent {
        SyncEvent::new(EventPayload::TagUpdate {
            name: name.into(),
            value: value.into(),
            runtime,
        })
    }

    fn ready_store() -> SyncStore {
        let mut store = SyncStore::default();
        store.apply(&SyncEvent::new(EventPayload::Connected { client_id: None }));
        store.apply(&SyncEvent::new(EventPayload::StatusUpdate {
            shadow_ok: Some(true),
            live_ok: Some(true),
            execution_mode: None,
        }));
        store
    }

    #[test]
    fn test_tank_level_scenario() {
        let mut store = ready_store();
        store.apply(&tag_update("Tank_Level", 48.0, Runtime::Live));
        assert!(store.conflicts().is_empty());
        store.apply(&tag_update("Tank_Level", 50.0, Runtime::Shadow));

        let open = store.unresolved_conflicts();
        assert_eq!(open.len(), 1);
        let id = open[0].id;
        assert!(!open[0].resolved);
        assert_eq!(open[0].origin, ConflictOrigin::Detected);
        assert!(matches!(
            store.check_push_gate(),
            Err(ProtocolViolation::UnresolvedConflicts { count: 1 })
        ));

        let resolved = store.resolve_conflict(id, Resolution::Shadow).unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolution, Some(Resolution::Shadow));
        assert!(store.unresolved_conflicts().is_empty());
        assert_eq!(store.conflicts().len(), 1);
        assert!(store.check_push_gate().is_ok());
        assert_eq!(store.events().latest().unwrap().event_type, EventType::SyncStatus);
    }

    #[test]
    fn test_repeated_divergence_refreshes() {
        let mut store = ready_store();
        store.apply(&tag_update("Flow", 1.0, Runtime::Live));
        for v in [2.0, 3.0, 4.0] {
            store.apply(&tag_update("Flow", v, Runtime::Shadow));
        }
        assert_eq!(store.conflicts().len(), 1);
        assert_eq!(
            store.conflicts().iter().next().unwrap().shadow_value,
            TagValue::Number(4.0)
        );
        assert!(store.check_integrity().is_ok());
    }

    #[test]
    fn test_converged_tag_keeps_conflict_open() {
        let mut store = ready_store();
        store.apply(&tag_update("Valve", 10.0, Runtime::Shadow));
        store.apply(&tag_update("Valve", 12.0, Runtime::Live));
        let before = store.conflicts().clone();

        // live catches up with shadow before anyone resolves
        store.apply(&tag_update("Valve", 10.0, Runtime::Live));

        assert_eq!(store.conflicts(), &before);
        assert_eq!(store.unresolved_conflicts().len(), 1);
        assert_eq!(store.tag("Valve").unwrap().live, Some(TagValue::Number(10.0)));
    }

    #[test]
    fn test_resolve_all_leaves_values_untouched() {
        let mut store = ready_store();
        store.apply(&tag_update("TagA", 1.0, Runtime::Shadow));
        store.apply(&tag_update("TagA", 2.0, Runtime::Live));
        store.apply(&tag_update("TagB", true, Runtime::Shadow));
        store.apply(&tag_update("TagB", false, Runtime::Live));
        let before = store.conflicts().clone();

        let resolved = store.resolve_all_conflicts(Resolution::Live);
        assert_eq!(resolved.len(), 2);
        assert_eq!(store.status().unresolved_count(), 0);
        for (after, before) in store.conflicts().iter().zip(before.iter()) {
            assert_eq!(after.resolution, Some(Resolution::Live));
            assert_eq!(after.shadow_value, before.shadow_value);
            assert_eq!(after.live_value, before.live_value);
        }
    }

    #[test]
    fn test_broker_reported_conflict() {
        let mut store = ready_store();
        store.apply(&SyncEvent::new(EventPayload::Conflict {
            tag_name: "Motor_Speed".into(),
            shadow_value: 1500.0.into(),
            live_value: 1450.0.into(),
            conflict_type: Some("RANGE_CONFLICT".into()),
            description: None,
        }));
        let conflict = store.conflicts().open_for("Motor_Speed").unwrap();
        assert_eq!(conflict.origin, ConflictOrigin::Reported);
        assert_eq!(conflict.conflict_type, "RANGE_CONFLICT");

        // a tag update on the same divergence refreshes rather than duplicates
        store.apply(&tag_update("Motor_Speed", 1460.0, Runtime::Live));
        assert_eq!(store.conflicts().len(), 1);
    }

    #[test]
    fn test_disconnect_keeps_conflicts_and_blocks_push() {
        let mut store = ready_store();
        store.apply(&tag_update("X", 1.0, Runtime::Shadow));
        store.apply(&tag_update("X", 2.0, Runtime::Live));
        store.resolve_all_conflicts(Resolution::Shadow);
        store.apply(&SyncEvent::new(EventPayload::Heartbeat { latency_ms: 40 }));

        store.apply(&SyncEvent::new(EventPayload::Disconnected {
            reason: "io".into(),
        }));
        let status = store.status();
        assert!(!status.connected);
        assert!(!status.shadow_ok);
        assert_eq!(status.latency_ms, 0);
        assert_eq!(status.conflicts.len(), 1);
        assert_eq!(store.check_push_gate(), Err(ProtocolViolation::ShadowNotReady));

        store.apply(&SyncEvent::new(EventPayload::Connected { client_id: None }));
        assert_eq!(store.status().conflicts.len(), 1);
    }

    #[test]
    fn test_commit_clears_resolved_and_stamps_sync() {
        let mut store = ready_store();
        store.apply(&tag_update("X", 1.0, Runtime::Shadow));
        store.apply(&tag_update("X", 2.0, Runtime::Live));
        store.resolve_all_conflicts(Resolution::Shadow);

        let at = Utc::now();
        store.commit_push("logic-1", at);
        assert!(store.conflicts().is_empty());
        assert_eq!(store.status().last_sync_at, Some(at));
        assert_eq!(
            store.events().latest().unwrap().event_type,
            EventType::LogicPushResponse
        );
    }

    #[test]
    fn test_failure_leaves_state() {
        let mut store = ready_store();
        store.apply(&tag_update("X", 1.0, Runtime::Shadow));
        store.apply(&tag_update("X", 2.0, Runtime::Live));
        let before = store.status().clone();
        store.record_push_failure("logic-1", "locked");
        assert_eq!(store.status(), &before);
    }

    #[test]
    fn test_simulated_conflicts_exempt_from_divergence_check() {
        let mut store = SyncStore::default();
        let ids = store.simulate_conflicts();
        assert_eq!(ids.len(), 3);
        assert!(store
            .conflicts()
            .iter()
            .all(|c| c.origin == ConflictOrigin::Simulated));
        assert!(store.check_integrity().is_ok());
        // simulation never writes detection inputs
        assert!(store.tag("Tank_Level").is_none());
    }

    #[test]
    fn test_integrity_flags_non_divergent_detected_conflict() {
        let mut store = SyncStore::default();
        store.status.conflicts = serde_json::from_value(serde_json::json!([{
            "id": ConflictId::new(),
            "tag_name": "Bogus",
            "shadow_value": 1.0,
            "live_value": 1.0,
            "timestamp": Utc::now(),
            "conflict_type": VALUE_CONFLICT,
            "description": null,
            "resolved": false,
            "resolution": null,
            "origin": "detected"
        }]))
        .unwrap();
        let issues = store.check_integrity().unwrap_err();
        assert!(matches!(issues[0], IntegrityIssue::NoDivergence { .. }));
    }

    #[test]
    fn test_simulation_skips_tags_with_real_conflicts() {
        let mut store = ready_store();
        store.apply(&tag_update("Tank_Level", 70.0, Runtime::Shadow));
        store.apply(&tag_update("Tank_Level", 10.0, Runtime::Live));
        let real = store.conflicts().open_for("Tank_Level").unwrap().id;

        let ids = store.simulate_conflicts();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&real));

        let tank = store.conflicts().open_for("Tank_Level").unwrap();
        assert_eq!(tank.id, real);
        assert_eq!(tank.origin, ConflictOrigin::Detected);
        assert_eq!(tank.shadow_value, TagValue::Number(70.0));
        assert_eq!(tank.live_value, TagValue::Number(10.0));
        assert_eq!(store.unresolved_conflicts().len(), 3);
        assert!(store.check_integrity().is_ok());
    }

    #[test]
    fn test_real_divergence_takes_over_simulated_tag() {
        let mut store = ready_store();
        store.simulate_conflicts();
        let fake = store.conflicts().open_for("Tank_Level").unwrap().id;

        store.apply(&tag_update("Tank_Level", 70.0, Runtime::Shadow));
        store.apply(&tag_update("Tank_Level", 10.0, Runtime::Live));

        let tank = store.conflicts().open_for("Tank_Level").unwrap();
        assert_ne!(tank.id, fake);
        assert_eq!(tank.origin, ConflictOrigin::Detected);
        assert_eq!(tank.shadow_value, TagValue::Number(70.0));
        assert_eq!(tank.live_value, TagValue::Number(10.0));
        assert!(store.conflicts().get(fake).is_none());
        assert_eq!(store.unresolved_conflicts().len(), 3);
        assert!(store.check_integrity().is_ok());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Update { tag: usize, shadow: bool, value: u8 },
        Report { tag: usize, shadow: u8, live: u8 },
        ResolveFirst(bool),
        ResolveAll,
        Simulate,
        Commit,
    }

    const TAGS: [&str; 3] = ["Tank_Level", "Pump_Status", "Flow"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (0..TAGS.len(), any::<bool>(), 0u8..3)
                .prop_map(|(tag, shadow, value)| Op::Update { tag, shadow, value }),
            1 => (0..TAGS.len(), 0u8..3, 0u8..3).prop_map(|(tag, shadow, live)| Op::Report { tag, shadow, live }),
            2 => any::<bool>().prop_map(Op::ResolveFirst),
            1 => Just(Op::ResolveAll),
            1 => Just(Op::Simulate),
            1 => Just(Op::Commit),
        ]
    }

    proptest! {
        #[test]
        fn prop_no_tag_ever_has_two_open_conflicts(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut store = ready_store();
            for op in ops {
                match op {
                    Op::Update { tag, shadow, value } => {
                        let runtime = if shadow { Runtime::Shadow } else { Runtime::Live };
                        store.apply(&tag_update(TAGS[tag], f64::from(value), runtime));
                    }
                    Op::Report { tag, shadow, live } => {
                        store.apply(&SyncEvent::new(EventPayload::Conflict {
                            tag_name: TAGS[tag].into(),
                            shadow_value: f64::from(shadow).into(),
                            live_value: f64::from(live).into(),
                            conflict_type: None,
                            description: None,
                        }));
                    }
                    Op::ResolveFirst(shadow) => {
                        let side = if shadow { Resolution::Shadow } else { Resolution::Live };
                        let first = store.conflicts().unresolved().next().map(|c| c.id);
                        if let Some(id) = first {
                            prop_assert!(store.resolve_conflict(id, side).is_ok());
                        }
                    }
                    Op::ResolveAll => {
                        store.resolve_all_conflicts(Resolution::Live);
                    }
                    Op::Simulate => {
                        store.simulate_conflicts();
                    }
                    Op::Commit => {
                        if store.check_push_gate().is_ok() {
                            store.commit_push("logic-1", Utc::now());
                        }
                    }
                }

                for tag in TAGS {
                    let open = store.conflicts().unresolved().filter(|c| c.tag_name == tag).count();
                    prop_assert!(open <= 1, "{} open conflicts on {}", open, tag);
                }
                prop_assert!(store.check_integrity().is_ok(), "{:?}", store.check_integrity());
            }
        }
    }
}
