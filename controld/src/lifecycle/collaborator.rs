use std::io;

use thiserror::Error;

use crate::config::Branches;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("the service is already running")]
    AlreadyRunning,

    #[error("the service is not running")]
    NotRunning,

    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("`{0}` did not finish in time")]
    Unresponsive(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Starts and stops the managed service process.
#[async_trait::async_trait]
pub trait ServiceSupervisor: Send + Sync {
    async fn start(&self) -> Result<(), CollaboratorError>;

    async fn stop(&self) -> Result<(), CollaboratorError>;

    /// Version string of the installed service build.
    async fn version(&self) -> Result<String, CollaboratorError>;
}

/// Fetches and builds new service artifacts.
#[async_trait::async_trait]
pub trait ServiceBuilder: Send + Sync {
    async fn build(&self, branches: &Branches) -> Result<(), CollaboratorError>;

    /// Branch names available for building from `repository`.
    async fn branches(&self, repository: &str) -> Result<Vec<String>, CollaboratorError>;
}
