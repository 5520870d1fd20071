//! Single-writer state machine around the managed service.
//!
//! At most one state-changing command runs at a time; a second command issued
//! while one is in flight is rejected with [`LifecycleError::Busy`] instead of
//! being queued. A command is in flight exactly while the published state is
//! transitional, so a reader that sees a settled state may issue the next
//! command straight away. Readers take snapshots from a `watch` channel and
//! never wait on a running transition.

pub mod collaborator;
pub mod process;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Branches;
use collaborator::{CollaboratorError, ServiceBuilder, ServiceSupervisor};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Updating,
    Failed,
}

impl LifecycleState {
    /// States only a running command can be in.
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping | Self::Updating)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Updating => "updating",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Restart,
    Update,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Update => "update",
        };
        f.write_str(name)
    }
}

/// What status readers see: the current state and the detail of the last
/// failed transition, cleared when the next transition begins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: LifecycleState,
    pub error: Option<String>,
}

impl StatusSnapshot {
    /// Payload of the periodic `status` event.
    pub fn payload(&self) -> String {
        match &self.error {
            Some(detail) => format!("{}: {}", self.state, detail),
            None => self.state.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("another lifecycle command is in progress")]
    Busy,

    #[error("cannot {command} while the service is {state}")]
    InvalidTransition {
        command: Command,
        state: LifecycleState,
    },

    #[error("{command} failed: {source}")]
    TransitionFailed {
        command: Command,
        #[source]
        source: CollaboratorError,
    },

    #[error("{command} timed out after {}s", .timeout.as_secs())]
    TimedOut { command: Command, timeout: Duration },

    #[error("{command} aborted: {reason}")]
    Aborted { command: Command, reason: String },
}

/// Upper bounds on collaborator calls.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub start: Duration,
    pub stop: Duration,
    pub update: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            start: Duration::from_secs(60),
            stop: Duration::from_secs(60),
            update: Duration::from_secs(10 * 60),
        }
    }
}

/// Cheap to clone; all clones drive the same state machine.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

struct Inner {
    supervisor: Arc<dyn ServiceSupervisor>,
    builder: Arc<dyn ServiceBuilder>,
    timeouts: Timeouts,
    status: watch::Sender<StatusSnapshot>,
}

impl LifecycleController {
    pub fn new(
        supervisor: Arc<dyn ServiceSupervisor>,
        builder: Arc<dyn ServiceBuilder>,
        timeouts: Timeouts,
    ) -> Self {
        let (status, _) = watch::channel(StatusSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                supervisor,
                builder,
                timeouts,
                status,
            }),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.snapshot()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.status.subscribe()
    }

    pub async fn version(&self) -> Result<String, CollaboratorError> {
        self.inner.supervisor.version().await
    }

    pub async fn start(&self) -> Result<StatusSnapshot, LifecycleError> {
        self.run(Command::Start, |inner| async move { inner.start().await })
            .await
    }

    pub async fn stop(&self) -> Result<StatusSnapshot, LifecycleError> {
        self.run(Command::Stop, |inner| async move { inner.stop().await })
            .await
    }

    pub async fn restart(&self) -> Result<StatusSnapshot, LifecycleError> {
        self.run(Command::Restart, |inner| async move { inner.restart().await })
            .await
    }

    pub async fn update(&self, branches: Branches) -> Result<StatusSnapshot, LifecycleError> {
        self.run(Command::Update, move |inner| async move {
            inner.update(&branches).await
        })
        .await
    }

    async fn run<F, Fut>(&self, command: Command, op: F) -> Result<StatusSnapshot, LifecycleError>
    where
        F: FnOnce(Arc<Inner>) -> Fut,
        Fut: Future<Output = Result<StatusSnapshot, LifecycleError>> + Send + 'static,
    {
        // Detached so that a caller going away cannot leave the state half-way.
        let task = tokio::spawn(op(self.inner.clone()));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                let err = LifecycleError::Aborted {
                    command,
                    reason: e.to_string(),
                };
                // A claimed transition stays transitional until it publishes,
                // so nothing newer can have been started in the meantime.
                if self.inner.state().is_transitional() {
                    self.inner.fail(LifecycleState::Failed, &err);
                }
                Err(err)
            }
        }
    }
}

impl Inner {
    fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    fn set(&self, state: LifecycleState) -> StatusSnapshot {
        info!("managed service is now {state}");
        let snapshot = StatusSnapshot { state, error: None };
        self.status.send_replace(snapshot.clone());
        snapshot
    }

    fn fail(&self, state: LifecycleState, err: &LifecycleError) {
        error!("{err}; managed service is now {state}");
        self.status.send_replace(StatusSnapshot {
            state,
            error: Some(err.to_string()),
        });
    }

    /// Atomically checks that `command` may run and publishes `next`.
    /// Returns the state the command started from.
    fn claim(
        &self,
        command: Command,
        allowed: &[LifecycleState],
        next: LifecycleState,
    ) -> Result<LifecycleState, LifecycleError> {
        let mut outcome = Err(LifecycleError::Busy);
        self.status.send_if_modified(|current| {
            if current.state.is_transitional() {
                return false;
            }
            if !allowed.contains(&current.state) {
                outcome = Err(LifecycleError::InvalidTransition {
                    command,
                    state: current.state,
                });
                return false;
            }
            outcome = Ok(current.state);
            *current = StatusSnapshot {
                state: next,
                error: None,
            };
            true
        });
        if outcome.is_ok() {
            info!("{command} accepted; managed service is now {next}");
        }
        outcome
    }

    async fn launch(&self, command: Command) -> Result<(), LifecycleError> {
        bounded(command, self.timeouts.start, self.supervisor.start()).await
    }

    async fn halt(&self, command: Command) -> Result<(), LifecycleError> {
        bounded(command, self.timeouts.stop, self.supervisor.stop()).await
    }

    async fn start(&self) -> Result<StatusSnapshot, LifecycleError> {
        use LifecycleState::*;
        self.claim(Command::Start, &[Stopped, Failed], Starting)?;

        if let Err(err) = self.launch(Command::Start).await {
            self.fail(settle(&err, Stopped), &err);
            return Err(err);
        }
        Ok(self.set(Running))
    }

    async fn stop(&self) -> Result<StatusSnapshot, LifecycleError> {
        use LifecycleState::*;
        self.claim(Command::Stop, &[Running], Stopping)?;

        if let Err(err) = self.halt(Command::Stop).await {
            self.fail(settle(&err, Running), &err);
            return Err(err);
        }
        Ok(self.set(Stopped))
    }

    async fn restart(&self) -> Result<StatusSnapshot, LifecycleError> {
        use LifecycleState::*;
        self.claim(Command::Restart, &[Running], Stopping)?;

        if let Err(err) = self.halt(Command::Restart).await {
            self.fail(Failed, &err);
            return Err(err);
        }
        self.set(Starting);
        if let Err(err) = self.launch(Command::Restart).await {
            self.fail(Failed, &err);
            return Err(err);
        }
        Ok(self.set(Running))
    }

    /// A running service is stopped for the build and started again after
    /// it; otherwise the service ends up stopped.
    async fn update(&self, branches: &Branches) -> Result<StatusSnapshot, LifecycleError> {
        use LifecycleState::*;
        let previous = self.claim(Command::Update, &[Stopped, Running, Failed], Updating)?;
        let was_running = previous == Running;

        let result: Result<(), LifecycleError> = async {
            if was_running {
                self.halt(Command::Update).await?;
            }
            bounded(
                Command::Update,
                self.timeouts.update,
                self.builder.build(branches),
            )
            .await?;
            if was_running {
                self.launch(Command::Update).await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = result {
            self.fail(Failed, &err);
            return Err(err);
        }
        Ok(self.set(if was_running { Running } else { Stopped }))
    }
}

/// A collaborator that never answered leaves the service in an unknown
/// condition; an explicit refusal leaves it where it was.
fn settle(err: &LifecycleError, fallback: LifecycleState) -> LifecycleState {
    match err {
        LifecycleError::TimedOut { .. } => LifecycleState::Failed,
        _ => fallback,
    }
}

async fn bounded<F>(command: Command, limit: Duration, call: F) -> Result<(), LifecycleError>
where
    F: Future<Output = Result<(), CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(LifecycleError::TransitionFailed { command, source }),
        Err(_) => Err(LifecycleError::TimedOut {
            command,
            timeout: limit,
        }),
    }
}
