use std::env;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

const DEFAULT_AUTH_URL: &str = "https://api.rd.services/oauth2/token";
const DEFAULT_CONTACTS_URL: &str = "https://api.rd.services/crm/v2/contacts";
const DEFAULT_DEALS_URL: &str = "https://api.rd.services/crm/v2/deals";
const DEFAULT_USERS_URL: &str = "https://api.rd.services/crm/v2/users";
const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid URL in {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
}

/// How the owner-rotation stage behaves for this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationMode {
    /// Feature flag unset; the stage is skipped entirely.
    Off,
    /// Picks replacement owners and reports them without calling the
    /// mutation endpoint.
    DryRun,
    /// Picks replacement owners and applies each change upstream.
    Apply,
}

/// Process configuration, read once at startup from environment-style
/// variables. Endpoint URLs have working defaults and are overridden in
/// tests to point at stub servers.
#[derive(Clone, Debug)]
pub struct Config {
    /// Explicit access token; when present the refresh flow is skipped.
    pub access_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Refresh token as configured at startup. The live value is owned by
    /// the `Authenticator` afterwards.
    pub refresh_token: Option<String>,
    pub auth_url: Url,
    pub contacts_url: Url,
    pub deals_url: Url,
    pub users_url: Url,
    /// Durable key=value file receiving rotated refresh tokens.
    pub env_file: PathBuf,
    pub debug: bool,
    pub rotation: RotationMode,
    /// Enables the remote function-config store for rotated tokens.
    pub persist_remote: bool,
    pub remote_store_url: Option<Url>,
    pub remote_function: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration through an arbitrary variable lookup,
    /// which keeps tests free of process-global environment mutation.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let flag = |name: &str| matches!(lookup(name).as_deref(), Some("1") | Some("true"));

        let url_var = |name: &'static str, default: &str| -> Result<Url, ConfigError> {
            let raw = var(name).unwrap_or_else(|| default.to_owned());
            Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { name, source })
        };

        let rotation = match var("CRM_OWNER_ROTATION").as_deref() {
            None | Some("0") | Some("off") => RotationMode::Off,
            Some("apply") => RotationMode::Apply,
            // "1" keeps the historically safe behavior of reporting only
            Some(_) => RotationMode::DryRun,
        };

        let remote_store_url = match var("CRM_REMOTE_STORE_URL") {
            Some(raw) => Some(Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl {
                name: "CRM_REMOTE_STORE_URL",
                source,
            })?),
            None => None,
        };

        Ok(Config {
            access_token: var("CRM_ACCESS_TOKEN"),
            client_id: var("CRM_CLIENT_ID"),
            client_secret: var("CRM_CLIENT_SECRET"),
            refresh_token: var("CRM_REFRESH_TOKEN"),
            auth_url: url_var("CRM_AUTH_URL", DEFAULT_AUTH_URL)?,
            contacts_url: url_var("CRM_CONTACTS_URL", DEFAULT_CONTACTS_URL)?,
            deals_url: url_var("CRM_DEALS_URL", DEFAULT_DEALS_URL)?,
            users_url: url_var("CRM_USERS_URL", DEFAULT_USERS_URL)?,
            env_file: PathBuf::from(var("CRM_ENV_FILE").unwrap_or_else(|| DEFAULT_ENV_FILE.to_owned())),
            debug: flag("CRM_DEBUG"),
            rotation,
            persist_remote: flag("CRM_PERSIST_REMOTE"),
            remote_store_url,
            remote_function: var("CRM_REMOTE_FUNCTION"),
        })
    }
}
