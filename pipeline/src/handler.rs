use crate::contacts::find_contacts;
use crate::deals::find_deals;
use crate::errors::PipelineError;
use crate::event::parse_event;
use crate::owners::enrich_owners;
use crate::response::{ContactErrorResponse, Reply, ResolveResponse, SearchMode};
use crate::rotation::rotate_owners;
use crate::token::resolve_token;
use crm::auth::Authenticator;
use crm::client::CrmClient;
use crm::config::Config;
use crm::persist::SecretStores;
use serde_json::Value;
use shared::normalize_phone;

/// One process-wide instance: configuration, the provider client and the
/// authenticator (which owns the live refresh token). Everything else is
/// request-scoped.
pub struct App {
    pub config: Config,
    client: CrmClient,
    auth: Authenticator,
}

impl App {
    pub fn new(config: Config) -> Self {
        let client = CrmClient::new(&config);
        let auth = Authenticator::new(&config, SecretStores::from_config(&config));
        App {
            config,
            client,
            auth,
        }
    }

    /// Runs one full resolution pass for a trigger payload. Never panics
    /// outward: anything unexpected becomes a 500 reply.
    pub async fn handle(&self, event: Value) -> Reply {
        if self.config.debug {
            tracing::debug!(%event, "received event");
        }
        match self.run(&event).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(error = %err, "request failed");
                Reply::internal_error(err.to_string())
            }
        }
    }

    async fn run(&self, event: &Value) -> Result<Reply, PipelineError> {
        let body = parse_event(event)?;

        let Some(phone_raw) = body.phone else {
            return Ok(Reply::bad_request("contact.phone not found"));
        };
        let phone = normalize_phone(&phone_raw);
        let email = body.email;
        let search_mode = if email.is_some() {
            SearchMode::PhoneEmail
        } else {
            SearchMode::PhoneOnly
        };

        let resolved = resolve_token(&self.config, &self.auth).await?;

        let stage = find_contacts(
            &self.client,
            &self.auth,
            resolved.credential,
            &phone,
            email.as_deref(),
        )
        .await;
        let token = stage.info_patch.unwrap_or(resolved.info);

        let page = match stage.outcome {
            Ok(page) => page,
            Err(detail) => {
                // partial response: token info plus the contact error,
                // without touching deals or owners
                return Ok(Reply::ok(&ContactErrorResponse {
                    phone_normalized: phone,
                    input_email: email,
                    search_mode,
                    token,
                    error: detail.message,
                    error_status: detail.status,
                    error_details: detail.details,
                    refresh_error: stage.refresh_error,
                }));
            }
        };

        let access_token = stage.credential.value;
        let deals = find_deals(&self.client, &access_token, &page.contacts).await;
        let mut by_contact = deals.by_contact;

        let rotation = rotate_owners(
            &self.client,
            &access_token,
            self.config.rotation,
            &mut by_contact,
        )
        .await;

        enrich_owners(&self.client, &access_token, &mut by_contact).await;

        Ok(Reply::ok(&ResolveResponse {
            phone_normalized: phone,
            input_email: email,
            search_mode,
            token,
            contacts_found: page.total,
            contacts: page.contacts,
            deals_contacts_checked: deals.contacts_checked,
            deals_contacts_with_deals: deals.contacts_with_deals,
            owner_rotation_enabled: rotation.enabled,
            owner_changes: rotation.enabled.then_some(rotation.changes),
            deals_by_contact_id: by_contact,
        }))
    }
}
