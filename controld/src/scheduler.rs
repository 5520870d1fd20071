//! Periodic fan-out of controller state to every connected client.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BroadcastIntervals;
use crate::lifecycle::LifecycleController;
use crate::registry::ConnectionRegistry;

pub const STATUS_EVENT: &str = "status";
pub const BENCHMARKER_EVENT: &str = "benchmarkerConnected";
pub const VERSION_EVENT: &str = "version";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Intervals {
    pub status: Duration,
    pub benchmarker: Duration,
    pub version: Duration,
}

impl From<BroadcastIntervals> for Intervals {
    fn from(value: BroadcastIntervals) -> Self {
        Self {
            status: Duration::from_secs(value.status_secs),
            benchmarker: Duration::from_secs(value.benchmarker_secs),
            version: Duration::from_secs(value.version_secs),
        }
    }
}

/// The three broadcast timers. They run until [`Scheduler::shutdown`].
pub struct Scheduler {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(
        registry: Arc<ConnectionRegistry>,
        lifecycle: LifecycleController,
        intervals: Intervals,
    ) -> Self {
        let cancel = CancellationToken::new();

        let status = {
            let registry = registry.clone();
            let lifecycle = lifecycle.clone();
            every(intervals.status, cancel.clone(), move || {
                let registry = registry.clone();
                let payload = lifecycle.status().payload();
                async move {
                    registry.broadcast(STATUS_EVENT, &payload).await;
                }
            })
        };

        let benchmarker = {
            let registry = registry.clone();
            every(intervals.benchmarker, cancel.clone(), move || {
                let registry = registry.clone();
                async move {
                    let connected = registry.benchmarker_connected().await;
                    registry
                        .broadcast(BENCHMARKER_EVENT, &connected.to_string())
                        .await;
                }
            })
        };

        let version = every(intervals.version, cancel.clone(), move || {
            let registry = registry.clone();
            let lifecycle = lifecycle.clone();
            async move {
                let version = lifecycle.version().await.unwrap_or_else(|e| {
                    warn!("failed to read managed service version: {e}");
                    "unknown".to_string()
                });
                registry.broadcast(VERSION_EVENT, &version).await;
            }
        });

        Self {
            cancel,
            tasks: vec![status, benchmarker, version],
        }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("broadcast task ended abnormally: {e}");
            }
        }
        debug!("broadcast scheduler stopped");
    }
}

fn every<F, Fut>(period: Duration, cancel: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Branches;
    use crate::lifecycle::Timeouts;
    use crate::lifecycle::collaborator::{CollaboratorError, ServiceBuilder, ServiceSupervisor};
    use crate::registry::{ClientType, Event};

    struct Idle;

    #[async_trait::async_trait]
    impl ServiceSupervisor for Idle {
        async fn start(&self) -> Result<(), CollaboratorError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), CollaboratorError> {
            Ok(())
        }

        async fn version(&self) -> Result<String, CollaboratorError> {
            Ok("0.9.3".to_string())
        }
    }

    #[async_trait::async_trait]
    impl ServiceBuilder for Idle {
        async fn build(&self, _branches: &Branches) -> Result<(), CollaboratorError> {
            Ok(())
        }

        async fn branches(&self, _repository: &str) -> Result<Vec<String>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    async fn next_event(rx: &mut crate::registry::EventReceiver, name: &str) -> Event {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.event == name {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_ticks_reach_clients() {
        let registry = Arc::new(ConnectionRegistry::new());
        let lifecycle = LifecycleController::new(Arc::new(Idle), Arc::new(Idle), Timeouts::default());
        let (tx, mut rx) = ConnectionRegistry::channel();
        let id = registry.add_client(tx).await;
        registry
            .set_client_type(id, ClientType::Benchmarker)
            .await
            .unwrap();

        let scheduler = Scheduler::spawn(
            registry.clone(),
            lifecycle.clone(),
            Intervals {
                status: Duration::from_millis(10),
                benchmarker: Duration::from_millis(15),
                version: Duration::from_millis(20),
            },
        );

        assert_eq!(next_event(&mut rx, STATUS_EVENT).await.payload, "stopped");
        assert_eq!(next_event(&mut rx, BENCHMARKER_EVENT).await.payload, "true");
        assert_eq!(next_event(&mut rx, VERSION_EVENT).await.payload, "0.9.3");

        lifecycle.start().await.unwrap();
        loop {
            if next_event(&mut rx, STATUS_EVENT).await.payload == "running" {
                break;
            }
        }

        scheduler.shutdown().await;
    }

    #[test]
    fn test_intervals_from_config() {
        let intervals = Intervals::from(BroadcastIntervals::default());
        assert_eq!(intervals.status, Duration::from_secs(2));
        assert_eq!(intervals.benchmarker, Duration::from_secs(5));
        assert_eq!(intervals.version, Duration::from_secs(20));
    }
}
