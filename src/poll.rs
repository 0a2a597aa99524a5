//! Polling fallback for when the broker's push stream is unavailable.
//!
//! While the session is down, the poller pulls the tag snapshot on a fixed
//! interval and feeds changed values into the same dispatch path as broker
//! `tag_update` frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::protocol::{InboundMessage, Runtime, TagValue};
use crate::push::HttpDeployment;
use crate::store::TagSample;
use crate::transport::TransportSession;

/// Anything that can report the current value of every tag stream.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> BoxFuture<'_, anyhow::Result<Vec<TagSample>>>;
}

impl SnapshotSource for HttpDeployment {
    fn snapshot(&self) -> BoxFuture<'_, anyhow::Result<Vec<TagSample>>> {
        Box::pin(self.fetch_snapshot())
    }
}

pub struct TagPoller {
    source: Arc<dyn SnapshotSource>,
    period: Duration,
}

impl TagPoller {
    pub fn new(source: Arc<dyn SnapshotSource>, period: Duration) -> Self {
        Self { source, period }
    }

    /// Run until aborted. Ticks are skipped while `session` is connected, and
    /// the change filter is reset then so the next offline window starts
    /// from a full snapshot.
    pub fn spawn(
        self,
        session: TransportSession,
        injector: mpsc::UnboundedSender<InboundMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut seen: HashMap<(String, Runtime), TagValue> = HashMap::new();
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if session.is_connected() {
                    seen.clear();
                    continue;
                }
                let samples = match self.source.snapshot().await {
                    Ok(samples) => samples,
                    Err(err) => {
                        warn!(error = %err, "tag snapshot poll failed; retrying next tick");
                        continue;
                    }
                };
                let fresh = changed(&mut seen, samples);
                debug!(count = fresh.len(), "polled tag snapshot");
                for sample in fresh {
                    let frame = InboundMessage::TagUpdate {
                        name: sample.name,
                        value: sample.value,
                        runtime: sample.runtime,
                        timestamp: sample.timestamp,
                    };
                    if injector.send(frame).is_err() {
                        return;
                    }
                }
            }
        })
    }
}

/// Samples whose value differs from the last one seen for that stream.
fn changed(seen: &mut HashMap<(String, Runtime), TagValue>, samples: Vec<TagSample>) -> Vec<TagSample> {
    samples
        .into_iter()
        .filter(|sample| {
            let key = (sample.name.clone(), sample.runtime);
            match seen.get(&key) {
                Some(previous) if previous.same_as(&sample.value) => false,
                _ => {
                    seen.insert(key, sample.value.clone());
                    true
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, SessionConfig};
    use chrono::Utc;
    use parking_lot::Mutex;

    struct Scripted {
        rounds: Mutex<Vec<anyhow::Result<Vec<TagSample>>>>,
    }

    impl SnapshotSource for Scripted {
        fn snapshot(&self) -> BoxFuture<'_, anyhow::Result<Vec<TagSample>>> {
            let next = {
                let mut rounds = self.rounds.lock();
                if rounds.is_empty() {
                    Ok(Vec::new())
                } else {
                    rounds.remove(0)
                }
            };
            Box::pin(async move { next })
        }
    }

    fn sample(name: &str, value: f64, runtime: Runtime) -> TagSample {
        TagSample {
            name: name.to_string(),
            value: TagValue::Number(value),
            runtime,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_only_changed_values_pass() {
        let mut seen = HashMap::new();
        let first = changed(&mut seen, vec![sample("Tank_Level", 50.0, Runtime::Shadow)]);
        assert_eq!(first.len(), 1);
        let again = changed(
            &mut seen,
            vec![
                sample("Tank_Level", 50.0, Runtime::Shadow),
                sample("Tank_Level", 48.0, Runtime::Live),
            ],
        );
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].runtime, Runtime::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_while_disconnected_and_survives_errors() {
        let (connector, _broker) = MemoryConnector::new();
        let (session, _events) = TransportSession::new(Arc::new(connector), SessionConfig::default());
        let source = Arc::new(Scripted {
            rounds: Mutex::new(vec![
                Err(anyhow::anyhow!("snapshot endpoint down")),
                Ok(vec![sample("Flow", 3.5, Runtime::Live)]),
            ]),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = TagPoller::new(source, Duration::from_millis(500)).spawn(session, tx);

        let frame = rx.recv().await.unwrap();
        assert!(matches!(
            frame,
            InboundMessage::TagUpdate { ref name, runtime: Runtime::Live, .. } if name == "Flow"
        ));
        task.abort();
    }

    struct Steady(Vec<TagSample>);

    impl SnapshotSource for Steady {
        fn snapshot(&self) -> BoxFuture<'_, anyhow::Result<Vec<TagSample>>> {
            let samples = self.0.clone();
            Box::pin(async move { Ok(samples) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_offline_window_starts_from_full_snapshot() {
        let (connector, _broker) = MemoryConnector::new();
        let (session, _events) = TransportSession::new(Arc::new(connector), SessionConfig::default());
        let source = Arc::new(Steady(vec![sample("Tank_Level", 48.0, Runtime::Live)]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = TagPoller::new(source, Duration::from_millis(500)).spawn(session.clone(), tx);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, InboundMessage::TagUpdate { ref name, .. } if name == "Tank_Level"));

        session.open().await;
        assert!(session.is_connected());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());

        // the value never changed, yet the next offline window reports it again
        session.close();
        let again = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("no snapshot after reconnect window")
            .unwrap();
        assert!(matches!(
            again,
            InboundMessage::TagUpdate { ref name, runtime: Runtime::Live, .. } if name == "Tank_Level"
        ));
        task.abort();
    }
}
