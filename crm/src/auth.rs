use crate::client::CALL_TIMEOUT;
use crate::config::Config;
use crate::persist::{PersistStatus, SecretStores};
use http::StatusCode;
use serde_json::Value;
use shared::mask;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

const GRANT_TYPE: &str = "refresh_token";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing client id / client secret / refresh token for refresh flow")]
    MissingCredentials,
    #[error("token endpoint returned {}: {}", .status.as_u16(), .details)]
    Upstream { status: StatusCode, details: String },
    #[error("token endpoint unreachable: {0}")]
    Network(String),
    #[error("access token not returned by provider")]
    MissingAccessToken,
}

/// Result of one refresh exchange, including whether the provider rotated
/// the refresh token and what happened when persisting it.
#[derive(Clone, Debug)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub new_refresh_token: Option<String>,
    pub rotated: bool,
    pub persist_status: PersistStatus,
}

/// Owns the refresh-token exchange and the current refresh token itself.
/// The token is seeded from configuration at startup, replaced only on a
/// confirmed rotation, and read by every subsequent refresh attempt; no
/// other component touches it.
pub struct Authenticator {
    http: reqwest::Client,
    auth_url: Url,
    client_id: Option<String>,
    client_secret: Option<String>,
    current_refresh: RwLock<Option<String>>,
    stores: SecretStores,
    debug: bool,
}

impl Authenticator {
    pub fn new(config: &Config, stores: SecretStores) -> Self {
        Authenticator {
            http: reqwest::Client::new(),
            auth_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            current_refresh: RwLock::new(config.refresh_token.clone()),
            stores,
            debug: config.debug,
        }
    }

    /// Whether a refresh token is available at all; gates the 401 retry.
    pub async fn has_refresh_token(&self) -> bool {
        self.current_refresh.read().await.is_some()
    }

    /// Exchanges the current refresh token for a new access token. When
    /// the provider rotates the refresh token, the rotated value is
    /// persisted and becomes the current one before this returns.
    pub async fn refresh(&self) -> Result<RefreshOutcome, AuthError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(AuthError::MissingCredentials);
        };
        let old_refresh = self
            .current_refresh
            .read()
            .await
            .clone()
            .ok_or(AuthError::MissingCredentials)?;

        if self.debug {
            tracing::debug!(refresh_token = %mask(&old_refresh, 8), "exchanging refresh token");
        }

        let params = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", old_refresh.as_str()),
            ("grant_type", GRANT_TYPE),
        ];

        let response = self
            .http
            .post(self.auth_url.clone())
            .form(&params)
            .timeout(CALL_TIMEOUT)
            .send()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(AuthError::Upstream { status, details });
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        let access_token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .ok_or(AuthError::MissingAccessToken)?;

        let new_refresh_token = payload
            .get("refresh_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_owned);

        let rotated = new_refresh_token
            .as_deref()
            .is_some_and(|token| token != old_refresh);

        let persist_status = match &new_refresh_token {
            Some(new_token) if rotated => {
                if self.debug {
                    tracing::debug!(refresh_token = %mask(new_token, 8), "refresh token rotated");
                }
                let status = self.stores.persist(new_token, &old_refresh).await;
                *self.current_refresh.write().await = Some(new_token.clone());
                status
            }
            _ => PersistStatus::no_rotation(),
        };

        Ok(RefreshOutcome {
            access_token,
            new_refresh_token,
            rotated,
            persist_status,
        })
    }
}
