use crate::client::CALL_TIMEOUT;
use crate::config::Config;
use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Key under which the refresh token is stored, in both stores.
pub const REFRESH_TOKEN_KEY: &str = "CRM_REFRESH_TOKEN";

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("store target not configured")]
    NotConfigured,
    #[error("remote store error: {0}")]
    Remote(String),
}

/// A persistence target for a rotated refresh token. Store failures are
/// reported to the caller as booleans, never as pipeline failures.
#[async_trait]
pub trait SecretStore: Send + Sync {
    fn name(&self) -> &'static str;
    async fn store(&self, secret: &str) -> Result<(), PersistError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistReason {
    NoRotation,
    Attempted,
}

/// Outcome of a persistence attempt for a rotated refresh token.
#[derive(Clone, Debug, Serialize)]
pub struct PersistStatus {
    pub primary_store_updated: bool,
    pub secondary_store_updated: bool,
    pub reason: PersistReason,
}

impl PersistStatus {
    pub fn no_rotation() -> Self {
        PersistStatus {
            primary_store_updated: false,
            secondary_store_updated: false,
            reason: PersistReason::NoRotation,
        }
    }
}

/// Durable key=value file. The whole line set is rewritten on update: the
/// key's line is replaced in place when present, appended when absent, and
/// every other line passes through untouched.
pub struct EnvFileStore {
    path: PathBuf,
    key: &'static str,
}

impl EnvFileStore {
    pub fn new(path: PathBuf) -> Self {
        EnvFileStore {
            path,
            key: REFRESH_TOKEN_KEY,
        }
    }
}

#[async_trait]
impl SecretStore for EnvFileStore {
    fn name(&self) -> &'static str {
        "env_file"
    }

    async fn store(&self, secret: &str) -> Result<(), PersistError> {
        let contents = fs::read_to_string(&self.path)?;
        let prefix = format!("{}=", self.key);

        let mut found = false;
        let mut lines: Vec<String> = contents
            .lines()
            .map(|line| {
                if line.trim_start().starts_with(&prefix) {
                    found = true;
                    format!("{}={secret}", self.key)
                } else {
                    line.to_owned()
                }
            })
            .collect();

        if !found {
            lines.push(format!("{}={secret}", self.key));
        }

        fs::write(&self.path, lines.join("\n") + "\n")?;
        Ok(())
    }
}

/// Remote function-configuration store: writes the rotated token into the
/// environment of a named function via its configuration API.
pub struct FunctionConfigStore {
    http: reqwest::Client,
    base_url: Option<Url>,
    function: Option<String>,
    key: &'static str,
}

impl FunctionConfigStore {
    pub fn new(base_url: Option<Url>, function: Option<String>) -> Self {
        FunctionConfigStore {
            http: reqwest::Client::new(),
            base_url,
            function,
            key: REFRESH_TOKEN_KEY,
        }
    }
}

#[async_trait]
impl SecretStore for FunctionConfigStore {
    fn name(&self) -> &'static str {
        "function_config"
    }

    async fn store(&self, secret: &str) -> Result<(), PersistError> {
        let (base, function) = match (&self.base_url, &self.function) {
            (Some(base), Some(function)) => (base, function),
            _ => return Err(PersistError::NotConfigured),
        };

        let mut url = base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["functions", function, "config", self.key]);
        }

        let response = self
            .http
            .put(url)
            .json(&secret)
            .timeout(CALL_TIMEOUT)
            .send()
            .await
            .map_err(|err| PersistError::Remote(err.to_string()))?;

        if !response.status().is_success() {
            return Err(PersistError::Remote(format!(
                "store returned {}",
                response.status().as_u16()
            )));
        }

        Ok(())
    }
}

/// The primary (durable file) and optional secondary (remote function
/// config) stores a rotation is persisted to.
pub struct SecretStores {
    primary: EnvFileStore,
    secondary: Option<FunctionConfigStore>,
}

impl SecretStores {
    pub fn from_config(config: &Config) -> Self {
        let secondary = config.persist_remote.then(|| {
            FunctionConfigStore::new(
                config.remote_store_url.clone(),
                config.remote_function.clone(),
            )
        });

        SecretStores {
            primary: EnvFileStore::new(config.env_file.clone()),
            secondary,
        }
    }

    pub fn new(primary: EnvFileStore, secondary: Option<FunctionConfigStore>) -> Self {
        SecretStores { primary, secondary }
    }

    /// Persists a rotated refresh token. No-op when nothing rotated; once
    /// rotation is confirmed the status reads `attempted` regardless of
    /// whether either write succeeded.
    pub async fn persist(&self, new_secret: &str, old_secret: &str) -> PersistStatus {
        if new_secret.is_empty() || new_secret == old_secret {
            return PersistStatus::no_rotation();
        }

        let primary_store_updated = match self.primary.store(new_secret).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    store = self.primary.name(),
                    error = %err,
                    "failed to persist rotated refresh token"
                );
                false
            }
        };

        let secondary_store_updated = match &self.secondary {
            Some(store) => match store.store(new_secret).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        store = store.name(),
                        error = %err,
                        "failed to persist rotated refresh token"
                    );
                    false
                }
            },
            None => false,
        };

        PersistStatus {
            primary_store_updated,
            secondary_store_updated,
            reason: PersistReason::Attempted,
        }
    }
}
