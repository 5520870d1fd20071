use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Process-level settings resolved from the command line at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub config_path: PathBuf,
    pub passwd_path: PathBuf,
    pub web_root: Option<PathBuf>,
    pub service_cmd: String,
    pub service_workdir: PathBuf,
    pub update_cmd: String,
    pub version_file: PathBuf,
    pub start_timeout: Duration,
    pub update_timeout: Duration,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration patch: {0}")]
    InvalidPatch(String),
}

/// The two flags the session gate reads on every request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    pub enabled: bool,
    pub required_for_local_clients: bool,
}

/// Runtime configuration, exposed through `/config/get` and `/config/set`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    pub auth: AuthSection,
    pub branches: Branches,
    pub repositories: Repositories,
    pub broadcast: BroadcastIntervals,
    pub session_ttl_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            auth: AuthSection::default(),
            branches: Branches::default(),
            repositories: Repositories::default(),
            broadcast: BroadcastIntervals::default(),
            session_ttl_secs: 12 * 60 * 60,
        }
    }
}

impl ControlConfig {
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            enabled: self.auth.enable,
            required_for_local_clients: self.auth.local,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("broadcast.status_secs", self.broadcast.status_secs),
            ("broadcast.benchmarker_secs", self.broadcast.benchmarker_secs),
            ("broadcast.version_secs", self.broadcast.version_secs),
            ("session_ttl_secs", self.session_ttl_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::InvalidPatch(format!("{name} must be positive")));
            }
        }
        if self.branches.pdb.trim().is_empty() || self.branches.pui.trim().is_empty() {
            return Err(ConfigError::InvalidPatch("branch names must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Require authentication at all.
    pub enable: bool,
    /// Require authentication from loopback callers as well.
    pub local: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            enable: true,
            local: false,
        }
    }
}

/// Source branches the update command builds from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Branches {
    pub pdb: String,
    pub pui: String,
}

impl Default for Branches {
    fn default() -> Self {
        Self {
            pdb: "master".to_string(),
            pui: "master".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Repositories {
    pub pdb: String,
    pub pui: String,
}

impl Default for Repositories {
    fn default() -> Self {
        Self {
            pdb: "https://github.com/polypheny/Polypheny-DB.git".to_string(),
            pui: "https://github.com/polypheny/Polypheny-UI.git".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BroadcastIntervals {
    pub status_secs: u64,
    pub benchmarker_secs: u64,
    pub version_secs: u64,
}

impl Default for BroadcastIntervals {
    fn default() -> Self {
        Self {
            status_secs: 2,
            benchmarker_secs: 5,
            version_secs: 20,
        }
    }
}

/// Holds the runtime configuration and writes every accepted change back to
/// its file, if it has one.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<ControlConfig>,
}

impl ConfigStore {
    pub fn in_memory(config: ControlConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(config),
        }
    }

    /// Reads the configuration file, creating it with defaults when missing.
    /// A file that exists but cannot be parsed is an error.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let config: ControlConfig = serde_json::from_str(&contents)?;
                config.validate()?;
                config
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "configuration file {} does not exist, writing defaults",
                    path.display()
                );
                let config = ControlConfig::default();
                persist(&path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };
        info!("loaded configuration from {}", path.display());
        Ok(Self {
            path: Some(path),
            current: RwLock::new(config),
        })
    }

    pub async fn get(&self) -> ControlConfig {
        self.current.read().await.clone()
    }

    pub async fn auth(&self) -> AuthConfig {
        self.current.read().await.auth_config()
    }

    /// Merges a JSON merge-patch into the current configuration. The result
    /// must still describe a valid configuration, otherwise nothing changes.
    pub async fn apply_patch(&self, patch: Value) -> Result<ControlConfig, ConfigError> {
        if !patch.is_object() {
            return Err(ConfigError::InvalidPatch(
                "expected a JSON object".to_string(),
            ));
        }

        let mut current = self.current.write().await;
        let mut merged = serde_json::to_value(&*current)?;
        merge_patch(&mut merged, patch);
        let updated: ControlConfig = serde_json::from_value(merged)?;
        updated.validate()?;

        if let Some(path) = &self.path {
            persist(path, &updated).await?;
        }
        *current = updated.clone();
        info!("configuration updated");
        Ok(updated)
    }
}

fn merge_patch(target: &mut Value, patch: Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(fields) = target {
                for (key, value) in entries {
                    if value.is_null() {
                        fields.remove(&key);
                    } else {
                        merge_patch(fields.entry(key).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other,
    }
}

async fn persist(path: &Path, config: &ControlConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(config)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
