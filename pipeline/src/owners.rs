use crate::deals::{DealsByContact, DealsEntry, FAN_OUT_LIMIT};
use crm::client::CrmClient;
use crm::types::OwnerInfo;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Joins owner name/email onto every deal. The distinct owner ids across
/// all deal lists are fetched concurrently and independently; a failed
/// lookup degrades that owner to null fields instead of failing the
/// stage. Error entries in the mapping are left untouched.
pub async fn enrich_owners(client: &CrmClient, token: &str, by_contact: &mut DealsByContact) {
    let mut seen = HashSet::new();
    let mut owner_ids = Vec::new();
    for entry in by_contact.values() {
        let DealsEntry::Deals(deals) = entry else {
            continue;
        };
        for deal in deals {
            if let Some(owner_id) = &deal.owner_id {
                if seen.insert(owner_id.clone()) {
                    owner_ids.push(owner_id.clone());
                }
            }
        }
    }

    let semaphore = Arc::new(Semaphore::new(FAN_OUT_LIMIT));
    let mut join_set = JoinSet::new();
    for owner_id in owner_ids {
        let client = client.clone();
        let token = token.to_owned();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = client.fetch_user(&token, &owner_id).await;
            (owner_id, result)
        });
    }

    let mut owners: HashMap<String, OwnerInfo> = HashMap::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((owner_id, Ok(info))) => {
                owners.insert(owner_id, info);
            }
            Ok((owner_id, Err(err))) => {
                tracing::warn!(owner_id = %owner_id, error = %err, "owner lookup failed");
                owners.insert(owner_id, OwnerInfo::default());
            }
            Err(join_err) => tracing::error!("owner lookup task panicked: {join_err}"),
        }
    }

    for entry in by_contact.values_mut() {
        let DealsEntry::Deals(deals) = entry else {
            continue;
        };
        for deal in deals {
            let info = deal.owner_id.as_ref().and_then(|id| owners.get(id));
            deal.owner_name = Some(info.and_then(|o| o.name.clone()));
            deal.owner_email = Some(info.and_then(|o| o.email.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::StubCrm;
    use crm::errors::{CrmError, ErrorDetail};
    use crm::types::Deal;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn deal(id: &str, owner_id: Option<&str>) -> Deal {
        Deal {
            id: Some(id.to_owned()),
            name: None,
            total_price: None,
            status: None,
            owner_id: owner_id.map(str::to_owned),
            contact_ids: None,
            owner_name: None,
            owner_email: None,
        }
    }

    fn mapping(entries: Vec<(&str, DealsEntry)>) -> DealsByContact {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect()
    }

    #[tokio::test]
    async fn joins_owner_fields_onto_deals() {
        let stub = StubCrm::spawn().await;
        stub.state.set_user(
            "u1",
            200,
            json!({"data": {"name": "Ana", "email": "ana@x.com"}}),
        );
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![(
            "42",
            DealsEntry::Deals(vec![deal("d1", Some("u1"))]),
        )]);
        enrich_owners(&client, "token", &mut by_contact).await;

        let DealsEntry::Deals(deals) = &by_contact["42"] else {
            panic!("expected deals");
        };
        assert_eq!(deals[0].owner_name, Some(Some("Ana".to_owned())));
        assert_eq!(deals[0].owner_email, Some(Some("ana@x.com".to_owned())));
    }

    #[tokio::test]
    async fn distinct_owner_ids_are_fetched_once() {
        let stub = StubCrm::spawn().await;
        stub.state
            .set_user("u1", 200, json!({"data": {"name": "Ana"}}));
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![
            (
                "1",
                DealsEntry::Deals(vec![deal("d1", Some("u1")), deal("d2", Some("u1"))]),
            ),
            ("2", DealsEntry::Deals(vec![deal("d3", Some("u1"))])),
        ]);
        enrich_owners(&client, "token", &mut by_contact).await;

        assert_eq!(stub.state.users_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_owner_lookup_yields_null_fields() {
        let stub = StubCrm::spawn().await;
        stub.state.set_user("u9", 404, json!({"error": "gone"}));
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![(
            "1",
            DealsEntry::Deals(vec![deal("d1", Some("u9"))]),
        )]);
        enrich_owners(&client, "token", &mut by_contact).await;

        let DealsEntry::Deals(deals) = &by_contact["1"] else {
            panic!("expected deals");
        };
        assert_eq!(deals[0].owner_name, Some(None));
        assert_eq!(deals[0].owner_email, Some(None));
    }

    #[tokio::test]
    async fn deals_without_owner_get_null_fields_without_a_fetch() {
        let stub = StubCrm::spawn().await;
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![("1", DealsEntry::Deals(vec![deal("d1", None)]))]);
        enrich_owners(&client, "token", &mut by_contact).await;

        assert_eq!(stub.state.users_calls.load(Ordering::SeqCst), 0);
        let DealsEntry::Deals(deals) = &by_contact["1"] else {
            panic!("expected deals");
        };
        assert_eq!(deals[0].owner_name, Some(None));
    }

    #[tokio::test]
    async fn error_entries_are_ignored() {
        let stub = StubCrm::spawn().await;
        let (client, _auth) = stub.client_and_auth();

        let detail = ErrorDetail::from(CrmError::Network("down".into()));
        let mut by_contact = mapping(vec![("1", DealsEntry::Error(detail))]);
        enrich_owners(&client, "token", &mut by_contact).await;

        assert_eq!(stub.state.users_calls.load(Ordering::SeqCst), 0);
        assert!(matches!(&by_contact["1"], DealsEntry::Error(_)));
    }
}
