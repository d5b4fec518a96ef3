use crate::config::Config;
use reqwest::RequestBuilder;
use std::time::Duration;
use url::Url;

/// Fixed per-call network timeout at the transport boundary.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size for contact and deal searches.
pub const PAGE_SIZE: &str = "25";

/// HTTP client for the provider's contacts, deals and users endpoints.
/// Cheap to clone; fan-out stages clone it into their tasks.
#[derive(Clone)]
pub struct CrmClient {
    pub(crate) http: reqwest::Client,
    pub(crate) contacts_url: Url,
    pub(crate) deals_url: Url,
    pub(crate) users_url: Url,
}

impl CrmClient {
    pub fn new(config: &Config) -> Self {
        CrmClient {
            http: reqwest::Client::new(),
            contacts_url: config.contacts_url.clone(),
            deals_url: config.deals_url.clone(),
            users_url: config.users_url.clone(),
        }
    }

    pub(crate) fn get(&self, url: Url, token: &str) -> RequestBuilder {
        self.http.get(url).bearer_auth(token).timeout(CALL_TIMEOUT)
    }

    pub(crate) fn put(&self, url: Url, token: &str) -> RequestBuilder {
        self.http.put(url).bearer_auth(token).timeout(CALL_TIMEOUT)
    }
}

/// Appends `id` as a path segment, for item endpoints like `<users>/<id>`.
pub(crate) fn item_url(base: &Url, id: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(id);
    }
    url
}
