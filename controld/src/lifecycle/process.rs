use std::io;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::collaborator::{CollaboratorError, ServiceBuilder, ServiceSupervisor};
use crate::config::Branches;

/// A freshly spawned service that exits within this window is treated as a
/// failed start.
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const BRANCH_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
const STDERR_TAIL_LINES: usize = 10;

/// Runs the managed service as a child process of the daemon.
#[derive(Debug)]
pub struct ProcessSupervisor {
    command: String,
    workdir: PathBuf,
    version_file: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ProcessSupervisor {
    pub fn new(
        command: impl Into<String>,
        workdir: impl Into<PathBuf>,
        version_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
            version_file: version_file.into(),
            child: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl ServiceSupervisor for ProcessSupervisor {
    async fn start(&self) -> Result<(), CollaboratorError> {
        if self.command.trim().is_empty() {
            return Err(CollaboratorError::NotConfigured("service command".to_string()));
        }

        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            if child.try_wait()?.is_none() {
                return Err(CollaboratorError::AlreadyRunning);
            }
        }

        // `exec` so that killing the child reaches the service itself, not the shell.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("exec {}", self.command))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!(pid = child.id(), "spawned managed service");

        tokio::time::sleep(STARTUP_GRACE).await;
        if let Some(status) = child.try_wait()? {
            return Err(CollaboratorError::CommandFailed {
                command: self.command.clone(),
                status: status.to_string(),
                stderr: String::new(),
            });
        }

        *slot = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        let mut slot = self.child.lock().await;
        let Some(mut child) = slot.take() else {
            return Err(CollaboratorError::NotRunning);
        };

        if let Some(status) = child.try_wait()? {
            warn!("managed service had already exited with {status}");
            return Ok(());
        }
        child.kill().await?;
        info!("managed service stopped");
        Ok(())
    }

    async fn version(&self) -> Result<String, CollaboratorError> {
        match tokio::fs::read_to_string(&self.version_file).await {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok("unknown".to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds the service by running an operator-supplied shell command with the
/// selected branches exported as `PDB_BRANCH` and `PUI_BRANCH`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: String,
    workdir: PathBuf,
}

impl CommandBuilder {
    pub fn new(command: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
        }
    }
}

#[async_trait::async_trait]
impl ServiceBuilder for CommandBuilder {
    async fn build(&self, branches: &Branches) -> Result<(), CollaboratorError> {
        if self.command.trim().is_empty() {
            return Err(CollaboratorError::NotConfigured("update command".to_string()));
        }

        info!(pdb = %branches.pdb, pui = %branches.pui, "building managed service");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workdir)
            .env("PDB_BRANCH", &branches.pdb)
            .env("PUI_BRANCH", &branches.pui)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        check_status(&self.command, output)?;
        Ok(())
    }

    async fn branches(&self, repository: &str) -> Result<Vec<String>, CollaboratorError> {
        if repository.trim().is_empty() {
            return Err(CollaboratorError::NotConfigured("repository".to_string()));
        }

        let lookup = Command::new("git")
            .args(["ls-remote", "--heads", repository])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(BRANCH_LOOKUP_TIMEOUT, lookup)
            .await
            .map_err(|_| CollaboratorError::Unresponsive("git ls-remote".to_string()))??;
        let output = check_status("git ls-remote", output)?;
        Ok(parse_heads(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn check_status(command: &str, output: Output) -> Result<Output, CollaboratorError> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    Err(CollaboratorError::CommandFailed {
        command: command.to_string(),
        status: output.status.to_string(),
        stderr: tail,
    })
}

/// Extracts branch names from `git ls-remote --heads` output.
fn parse_heads(listing: &str) -> Vec<String> {
    let mut names: Vec<String> = listing
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter_map(|(_, reference)| reference.trim().strip_prefix("refs/heads/"))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}
