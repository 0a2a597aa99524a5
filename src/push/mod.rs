//! Push orchestration: the only path from shadow logic to the live runtime.
//!
//! Every push goes through the store's gate first. A gate failure is
//! returned to the caller before anything touches the network.

pub mod deploy;
pub mod preview;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::PushError;
use crate::protocol::{OutboundMessage, Runtime};
use crate::store::SharedStore;
use crate::transport::TransportSession;

pub use deploy::{DeploymentEndpoint, HttpDeployment, LocalDeployment, PushOutcome, StaticToken, TokenProvider};
pub use preview::{ChangePreview, ConfirmedPush, Preview};

/// A committed push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub logic_id: String,
    pub committed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PushOrchestrator {
    store: SharedStore,
    endpoint: Arc<dyn DeploymentEndpoint>,
    transport: Option<TransportSession>,
}

impl PushOrchestrator {
    pub fn new(store: SharedStore, endpoint: Arc<dyn DeploymentEndpoint>) -> Self {
        Self {
            store,
            endpoint,
            transport: None,
        }
    }

    /// Announce pushes to the broker over this session as well.
    pub fn with_transport(mut self, transport: TransportSession) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Route to conflict resolution while anything is open; otherwise diff
    /// live logic against shadow logic.
    pub async fn preview_changes(&self, logic_id: &str) -> Result<Preview, PushError> {
        let open: Vec<_> = {
            let store = self.store.lock();
            store.unresolved_conflicts().into_iter().cloned().collect()
        };
        if !open.is_empty() {
            info!(logic_id, open = open.len(), "preview deferred until conflicts are resolved");
            return Ok(Preview::ResolveConflicts(open));
        }

        let (shadow, live) = tokio::try_join!(
            self.endpoint.fetch_logic(logic_id, Runtime::Shadow),
            self.endpoint.fetch_logic(logic_id, Runtime::Live),
        )
        .map_err(PushError::Endpoint)?;
        Ok(Preview::Ready(ChangePreview::compute(logic_id, &live, &shadow)))
    }

    /// Commit shadow logic to live.
    ///
    /// Rejected with [`PushError::Policy`] while conflicts are open or the
    /// shadow runtime is not ready. Failures are never retried and leave the
    /// conflict set and readiness untouched.
    pub async fn push_to_live(&self, logic_id: &str) -> Result<PushReceipt, PushError> {
        {
            let mut store = self.store.lock();
            if let Err(violation) = store.check_push_gate() {
                warn!(logic_id, reason = %violation, "push blocked");
                return Err(PushError::Policy(violation));
            }
            store.record_push_request(logic_id);
        }

        if let Some(transport) = &self.transport {
            transport.send(OutboundMessage::LogicPushRequest {
                logic_id: logic_id.to_string(),
            });
        }

        info!(logic_id, "pushing shadow logic to live");
        match self.endpoint.push_to_live(logic_id).await {
            Ok(outcome) if outcome.success => {
                let committed_at = Utc::now();
                self.store.lock().commit_push(logic_id, committed_at);
                Ok(PushReceipt {
                    logic_id: logic_id.to_string(),
                    committed_at,
                })
            }
            Ok(outcome) => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "push rejected without a reason".to_string());
                error!(logic_id, %reason, "deployment endpoint rejected push");
                self.store.lock().record_push_failure(logic_id, &reason);
                Err(PushError::Remote(reason))
            }
            Err(err) => {
                error!(logic_id, error = %err, "push request failed");
                self.store.lock().record_push_failure(logic_id, &err.to_string());
                Err(PushError::Endpoint(err))
            }
        }
    }

    /// Run the push an operator approved through a preview.
    pub async fn commit(&self, confirmed: ConfirmedPush) -> Result<PushReceipt, PushError> {
        self.push_to_live(confirmed.logic_id()).await
    }
}
