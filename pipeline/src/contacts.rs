use crate::token::{Credential, TokenInfo, TokenSource};
use crm::auth::Authenticator;
use crm::client::CrmClient;
use crm::contacts::ContactsPage;
use crm::errors::ErrorDetail;

/// Result of the contact lookup stage. The credential is handed back so
/// later stages use the refreshed one when the retry path ran.
pub struct ContactsStage {
    pub credential: Credential,
    /// Replaces the resolver's token block when a 401 forced a refresh.
    pub info_patch: Option<TokenInfo>,
    pub outcome: Result<ContactsPage, ErrorDetail>,
    /// Set when the 401-triggered refresh itself failed; the original
    /// business error is still carried in `outcome`.
    pub refresh_error: Option<String>,
}

impl ContactsStage {
    fn no_retry(credential: Credential, outcome: Result<ContactsPage, ErrorDetail>) -> Self {
        ContactsStage {
            credential,
            info_patch: None,
            outcome,
            refresh_error: None,
        }
    }
}

/// Contact search with the single 401-triggered refresh fallback: on an
/// unauthorized response, and only when a refresh token is configured,
/// refresh once and retry once. The retry's result stands either way;
/// every other error is returned as-is.
pub async fn find_contacts(
    client: &CrmClient,
    auth: &Authenticator,
    credential: Credential,
    phone: &str,
    email: Option<&str>,
) -> ContactsStage {
    let first = client.search_contacts(&credential.value, phone, email).await;

    let err = match first {
        Ok(page) => return ContactsStage::no_retry(credential, Ok(page)),
        Err(err) => err,
    };

    if !err.is_unauthorized() || !auth.has_refresh_token().await {
        return ContactsStage::no_retry(credential, Err(err.into()));
    }

    match auth.refresh().await {
        Ok(outcome) => {
            let credential = Credential::new(
                outcome.access_token.clone(),
                TokenSource::RefreshedAfterRetry,
            );
            let info_patch = Some(TokenInfo::from_refresh(&outcome, &credential));
            let retry = client.search_contacts(&credential.value, phone, email).await;
            ContactsStage {
                credential,
                info_patch,
                outcome: retry.map_err(ErrorDetail::from),
                refresh_error: None,
            }
        }
        Err(refresh_err) => {
            tracing::warn!(error = %refresh_err, "refresh after 401 failed");
            ContactsStage {
                credential,
                info_patch: None,
                outcome: Err(err.into()),
                refresh_error: Some(refresh_err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::StubCrm;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn credential() -> Credential {
        Credential::new("stale-token".into(), TokenSource::Explicit)
    }

    #[tokio::test]
    async fn success_needs_no_retry() {
        let stub = StubCrm::spawn().await;
        stub.state.script_contacts(vec![(
            200,
            json!({"contacts": [{"id": 1, "name": "Ana"}]}),
        )]);
        let (client, auth) = stub.client_and_auth();

        let stage = find_contacts(&client, &auth, credential(), "5511", None).await;

        let page = stage.outcome.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(stub.state.contacts_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.state.auth_calls.load(Ordering::SeqCst), 0);
        assert!(stage.info_patch.is_none());
        assert_eq!(stage.credential.source, TokenSource::Explicit);
    }

    #[tokio::test]
    async fn unauthorized_refreshes_once_and_retries_once() {
        let stub = StubCrm::spawn().await;
        stub.state.script_contacts(vec![
            (401, json!({"error": "unauthorized"})),
            (200, json!({"contacts": [{"id": 7}]})),
        ]);
        let (client, auth) = stub.client_and_auth();

        let stage = find_contacts(&client, &auth, credential(), "5511", None).await;

        assert_eq!(stub.state.auth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.state.contacts_calls.load(Ordering::SeqCst), 2);
        let page = stage.outcome.unwrap();
        assert_eq!(page.contacts[0].id.as_deref(), Some("7"));
        assert_eq!(stage.credential.source, TokenSource::RefreshedAfterRetry);
        let info = stage.info_patch.unwrap();
        assert_eq!(info.access_token_source, TokenSource::RefreshedAfterRetry);
    }

    #[tokio::test]
    async fn retry_failure_is_returned_without_further_retries() {
        let stub = StubCrm::spawn().await;
        stub.state.script_contacts(vec![
            (401, json!({"error": "unauthorized"})),
            (401, json!({"error": "still unauthorized"})),
        ]);
        let (client, auth) = stub.client_and_auth();

        let stage = find_contacts(&client, &auth, credential(), "5511", None).await;

        assert_eq!(stub.state.auth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.state.contacts_calls.load(Ordering::SeqCst), 2);
        let detail = stage.outcome.unwrap_err();
        assert_eq!(detail.status, Some(401));
    }

    #[tokio::test]
    async fn non_auth_errors_are_never_retried() {
        let stub = StubCrm::spawn().await;
        stub.state
            .script_contacts(vec![(500, json!({"error": "boom"}))]);
        let (client, auth) = stub.client_and_auth();

        let stage = find_contacts(&client, &auth, credential(), "5511", None).await;

        assert_eq!(stub.state.contacts_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.state.auth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stage.outcome.unwrap_err().status, Some(500));
    }

    #[tokio::test]
    async fn unauthorized_without_refresh_token_is_returned_as_is() {
        let stub = StubCrm::spawn().await;
        stub.state
            .script_contacts(vec![(401, json!({"error": "unauthorized"}))]);
        let mut config = stub.config(None);
        config.refresh_token = None;
        let (client, auth) = StubCrm::client_and_auth_for(&config);

        let stage = find_contacts(&client, &auth, credential(), "5511", None).await;

        assert_eq!(stub.state.contacts_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.state.auth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stage.outcome.unwrap_err().status, Some(401));
        assert!(stage.refresh_error.is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_original_error_and_records_refresh_error() {
        let stub = StubCrm::spawn().await;
        stub.state
            .script_contacts(vec![(401, json!({"error": "unauthorized"}))]);
        stub.state
            .set_auth_response(400, json!({"error": "invalid_grant"}));
        let (client, auth) = stub.client_and_auth();

        let stage = find_contacts(&client, &auth, credential(), "5511", None).await;

        assert_eq!(stub.state.auth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.state.contacts_calls.load(Ordering::SeqCst), 1);
        let detail = stage.outcome.unwrap_err();
        assert_eq!(detail.status, Some(401));
        let refresh_error = stage.refresh_error.unwrap();
        assert!(refresh_error.contains("invalid_grant"));
        assert!(stage.info_patch.is_none());
    }
}
