use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::utils::password::{check_password, gen_salt, hash_password};

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("malformed credential data: {0}")]
    Malformed(String),

    #[error("user {0} already exists")]
    UserExists(String),

    #[error("user {0} does not exist")]
    UnknownUser(String),

    #[error("invalid username {0:?}")]
    InvalidUsername(String),

    #[error("password hashing task failed: {0}")]
    Join(String),
}

/// The single shared set of operator accounts.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> bool;
}

#[derive(Clone, Debug)]
struct StoredCredential {
    salt: String,
    hash: String,
}

/// Accounts kept in a passwd-style file, one `username:salt:hash` per line.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    users: RwLock<BTreeMap<String, StoredCredential>>,
}

impl FileCredentialStore {
    /// Opens the credential file; a missing file means no accounts yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let users = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    pub async fn usernames(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    pub async fn add_user(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        if username.is_empty() || username.contains(':') || username.contains('\n') {
            return Err(CredentialError::InvalidUsername(username.to_string()));
        }

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(CredentialError::UserExists(username.to_string()));
        }

        let salt = gen_salt();
        let password = password.to_string();
        let hash = {
            let salt = salt.clone();
            tokio::task::spawn_blocking(move || hash_password(&salt, &password))
                .await
                .map_err(|e| CredentialError::Join(e.to_string()))??
        };
        users.insert(username.to_string(), StoredCredential { salt, hash });
        persist(&self.path, &users).await?;
        info!("added user {username}");
        Ok(())
    }

    pub async fn remove_user(&self, username: &str) -> Result<(), CredentialError> {
        let mut users = self.users.write().await;
        if users.remove(username).is_none() {
            return Err(CredentialError::UnknownUser(username.to_string()));
        }
        persist(&self.path, &users).await?;
        info!("removed user {username}");
        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialStore for FileCredentialStore {
    async fn verify(&self, username: &str, password: &str) -> bool {
        let Some(stored) = self.users.read().await.get(username).cloned() else {
            return false;
        };

        // bcrypt is deliberately slow, keep it off the async workers.
        let password = password.to_string();
        let checked = tokio::task::spawn_blocking(move || {
            check_password(&stored.salt, &stored.hash, &password)
        })
        .await;
        match checked {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                error!("failed to check password for {username}: {e}");
                false
            }
            Err(e) => {
                error!("password check task failed: {e}");
                false
            }
        }
    }
}

fn parse(contents: &str) -> Result<BTreeMap<String, StoredCredential>, CredentialError> {
    let mut users = BTreeMap::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, ':');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(user), Some(salt), Some(hash)) if !user.is_empty() => {
                users.insert(
                    user.to_string(),
                    StoredCredential {
                        salt: salt.to_string(),
                        hash: hash.to_string(),
                    },
                );
            }
            _ => {
                return Err(CredentialError::Malformed(format!(
                    "line {} is not `username:salt:hash`",
                    number + 1
                )));
            }
        }
    }
    Ok(users)
}

async fn persist(
    path: &Path,
    users: &BTreeMap<String, StoredCredential>,
) -> Result<(), CredentialError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents: String = users
        .iter()
        .map(|(user, c)| format!("{user}:{}:{}\n", c.salt, c.hash))
        .collect();
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
