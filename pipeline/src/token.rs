use crm::auth::{AuthError, Authenticator, RefreshOutcome};
use crm::config::Config;
use crm::persist::PersistStatus;
use serde::Serialize;
use shared::{DEFAULT_KEEP, mask};

/// Where the active access token came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Explicit,
    Refreshed,
    RefreshedAfterRetry,
}

/// The active access token for one pipeline run. Immutable; a retry after
/// a refresh produces a whole new credential instead of mutating this one.
#[derive(Clone, Debug)]
pub struct Credential {
    pub value: String,
    pub source: TokenSource,
    pub preview: String,
}

impl Credential {
    pub fn new(value: String, source: TokenSource) -> Self {
        let preview = mask(&value, DEFAULT_KEEP);
        Credential {
            value,
            source,
            preview,
        }
    }
}

/// Response block describing how the access token was obtained and what
/// the refresh flow did, if it ran.
#[derive(Clone, Debug, Serialize)]
pub struct TokenInfo {
    pub access_token_source: TokenSource,
    pub access_token_preview: String,
    pub refresh_token_rotated: bool,
    pub refresh_token_persist_status: Option<PersistStatus>,
}

impl TokenInfo {
    pub fn from_refresh(outcome: &RefreshOutcome, credential: &Credential) -> Self {
        TokenInfo {
            access_token_source: credential.source,
            access_token_preview: credential.preview.clone(),
            refresh_token_rotated: outcome.rotated,
            refresh_token_persist_status: Some(outcome.persist_status.clone()),
        }
    }
}

pub struct ResolvedToken {
    pub credential: Credential,
    pub info: TokenInfo,
}

/// Decides the active access token: an explicit configured token wins and
/// skips the refresh flow entirely; otherwise one refresh exchange is
/// performed. With neither available the pipeline cannot proceed.
pub async fn resolve_token(
    config: &Config,
    auth: &Authenticator,
) -> Result<ResolvedToken, AuthError> {
    if let Some(value) = &config.access_token {
        let credential = Credential::new(value.clone(), TokenSource::Explicit);
        let info = TokenInfo {
            access_token_source: TokenSource::Explicit,
            access_token_preview: credential.preview.clone(),
            refresh_token_rotated: false,
            refresh_token_persist_status: None,
        };
        return Ok(ResolvedToken { credential, info });
    }

    let outcome = auth.refresh().await?;
    let credential = Credential::new(outcome.access_token.clone(), TokenSource::Refreshed);
    let info = TokenInfo::from_refresh(&outcome, &credential);
    Ok(ResolvedToken { credential, info })
}
