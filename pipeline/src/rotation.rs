use crate::deals::{DealsByContact, DealsEntry};
use crm::client::CrmClient;
use crm::config::RotationMode;
use crm::errors::ErrorDetail;
use serde::Serialize;
use serde_json::Value;
use shared::pick_random_excluding;

/// One rotation decision for one deal. Reasons: `missing_deal_id_or_owner_id`,
/// `no_other_visible_user`, `list_visible_users_failed`, `dry_run`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct OwnerChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
}

pub struct RotationStage {
    pub enabled: bool,
    pub changes: Vec<OwnerChange>,
}

impl RotationStage {
    fn disabled() -> Self {
        RotationStage {
            enabled: false,
            changes: Vec::new(),
        }
    }
}

/// Reassigns each deal to a random visible user other than its current
/// owner. `DryRun` only reports the picks; `Apply` drives the owner
/// update and rewrites the in-memory owner id on success, so a later
/// enrichment pass sees the new assignment.
pub async fn rotate_owners(
    client: &CrmClient,
    token: &str,
    mode: RotationMode,
    by_contact: &mut DealsByContact,
) -> RotationStage {
    if mode == RotationMode::Off {
        return RotationStage::disabled();
    }

    let mut changes = Vec::new();

    let users = match client.list_visible_users(token).await {
        Ok(users) => users,
        Err(err) => {
            let detail = ErrorDetail::from(err);
            changes.push(OwnerChange {
                changed: false,
                reason: Some("list_visible_users_failed"),
                error: Some(detail.message),
                error_status: detail.status,
                error_details: detail.details,
                ..OwnerChange::default()
            });
            return RotationStage {
                enabled: true,
                changes,
            };
        }
    };

    let user_ids: Vec<String> = users.into_iter().map(|user| user.id).collect();

    for (contact_id, entry) in by_contact.iter_mut() {
        let DealsEntry::Deals(deals) = entry else {
            continue;
        };
        for deal in deals {
            let (deal_id, current_owner) = match (deal.id.clone(), deal.owner_id.clone()) {
                (Some(deal_id), Some(owner_id)) => (deal_id, owner_id),
                _ => {
                    changes.push(OwnerChange {
                        deal_id: deal.id.clone(),
                        contact_id: Some(contact_id.clone()),
                        changed: false,
                        reason: Some("missing_deal_id_or_owner_id"),
                        ..OwnerChange::default()
                    });
                    continue;
                }
            };

            let Some(new_owner) = pick_random_excluding(&user_ids, &current_owner) else {
                changes.push(OwnerChange {
                    deal_id: Some(deal_id),
                    contact_id: Some(contact_id.clone()),
                    changed: false,
                    reason: Some("no_other_visible_user"),
                    ..OwnerChange::default()
                });
                continue;
            };
            let new_owner = new_owner.to_owned();

            if mode == RotationMode::Apply {
                match client.update_deal_owner(token, &deal_id, &new_owner).await {
                    Ok(()) => {
                        deal.owner_id = Some(new_owner.clone());
                        changes.push(OwnerChange {
                            deal_id: Some(deal_id),
                            contact_id: Some(contact_id.clone()),
                            changed: true,
                            from_owner_id: Some(current_owner),
                            to_owner_id: Some(new_owner),
                            ..OwnerChange::default()
                        });
                    }
                    Err(err) => {
                        let detail = ErrorDetail::from(err);
                        changes.push(OwnerChange {
                            deal_id: Some(deal_id),
                            contact_id: Some(contact_id.clone()),
                            changed: false,
                            from_owner_id: Some(current_owner),
                            to_owner_id: Some(new_owner),
                            error: Some(detail.message),
                            error_status: detail.status,
                            error_details: detail.details,
                            ..OwnerChange::default()
                        });
                    }
                }
            } else {
                changes.push(OwnerChange {
                    deal_id: Some(deal_id),
                    contact_id: Some(contact_id.clone()),
                    changed: false,
                    reason: Some("dry_run"),
                    from_owner_id: Some(current_owner),
                    to_owner_id: Some(new_owner),
                    ..OwnerChange::default()
                });
            }
        }
    }

    RotationStage {
        enabled: true,
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::StubCrm;
    use crm::types::Deal;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn deal(id: Option<&str>, owner_id: Option<&str>) -> Deal {
        Deal {
            id: id.map(str::to_owned),
            name: None,
            total_price: None,
            status: None,
            owner_id: owner_id.map(str::to_owned),
            contact_ids: None,
            owner_name: None,
            owner_email: None,
        }
    }

    fn mapping(entries: Vec<(&str, Vec<Deal>)>) -> DealsByContact {
        entries
            .into_iter()
            .map(|(k, deals)| (k.to_owned(), DealsEntry::Deals(deals)))
            .collect()
    }

    fn visible_users(ids: &[&str]) -> serde_json::Value {
        json!({
            "data": ids
                .iter()
                .map(|id| json!({"id": id, "name": id, "email": format!("{id}@x.com")}))
                .collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn off_mode_skips_everything() {
        let stub = StubCrm::spawn().await;
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![("1", vec![deal(Some("d1"), Some("u1"))])]);
        let stage = rotate_owners(&client, "token", RotationMode::Off, &mut by_contact).await;

        assert!(!stage.enabled);
        assert!(stage.changes.is_empty());
        assert_eq!(stub.state.visible_users_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dry_run_reports_picks_without_updates() {
        let stub = StubCrm::spawn().await;
        stub.state
            .set_visible_users(200, visible_users(&["u1", "u2", "u3"]));
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![("1", vec![deal(Some("d1"), Some("u1"))])]);
        let stage = rotate_owners(&client, "token", RotationMode::DryRun, &mut by_contact).await;

        assert!(stage.enabled);
        assert_eq!(stage.changes.len(), 1);
        let change = &stage.changes[0];
        assert!(!change.changed);
        assert_eq!(change.reason, Some("dry_run"));
        assert_eq!(change.from_owner_id.as_deref(), Some("u1"));
        let to_owner = change.to_owner_id.as_deref().unwrap();
        assert_ne!(to_owner, "u1");
        assert!(stub.state.deal_updates().is_empty());

        // owner untouched in dry-run
        let DealsEntry::Deals(deals) = &by_contact["1"] else {
            panic!("expected deals");
        };
        assert_eq!(deals[0].owner_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn apply_updates_the_deal_and_the_in_memory_owner() {
        let stub = StubCrm::spawn().await;
        stub.state.set_visible_users(200, visible_users(&["u1", "u2"]));
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![("1", vec![deal(Some("d1"), Some("u1"))])]);
        let stage = rotate_owners(&client, "token", RotationMode::Apply, &mut by_contact).await;

        let change = &stage.changes[0];
        assert!(change.changed);
        assert_eq!(change.from_owner_id.as_deref(), Some("u1"));
        assert_eq!(change.to_owner_id.as_deref(), Some("u2"));

        let updates = stub.state.deal_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "d1");
        assert_eq!(updates[0].1, json!({"deal": {"user_id": "u2"}}));

        let DealsEntry::Deals(deals) = &by_contact["1"] else {
            panic!("expected deals");
        };
        assert_eq!(deals[0].owner_id.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn apply_failure_keeps_the_old_owner() {
        let stub = StubCrm::spawn().await;
        stub.state.set_visible_users(200, visible_users(&["u1", "u2"]));
        stub.state.set_update_status(422);
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![("1", vec![deal(Some("d1"), Some("u1"))])]);
        let stage = rotate_owners(&client, "token", RotationMode::Apply, &mut by_contact).await;

        let change = &stage.changes[0];
        assert!(!change.changed);
        assert_eq!(change.error_status, Some(422));
        assert!(change.error.is_some());

        let DealsEntry::Deals(deals) = &by_contact["1"] else {
            panic!("expected deals");
        };
        assert_eq!(deals[0].owner_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn lone_visible_user_cannot_rotate() {
        let stub = StubCrm::spawn().await;
        stub.state.set_visible_users(200, visible_users(&["u1"]));
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![("1", vec![deal(Some("d1"), Some("u1"))])]);
        let stage = rotate_owners(&client, "token", RotationMode::DryRun, &mut by_contact).await;

        assert_eq!(stage.changes[0].reason, Some("no_other_visible_user"));
        assert!(!stage.changes[0].changed);
    }

    #[tokio::test]
    async fn missing_ids_are_reported_per_deal() {
        let stub = StubCrm::spawn().await;
        stub.state.set_visible_users(200, visible_users(&["u1", "u2"]));
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![(
            "1",
            vec![deal(None, Some("u1")), deal(Some("d2"), None)],
        )]);
        let stage = rotate_owners(&client, "token", RotationMode::DryRun, &mut by_contact).await;

        assert_eq!(stage.changes.len(), 2);
        for change in &stage.changes {
            assert_eq!(change.reason, Some("missing_deal_id_or_owner_id"));
            assert!(!change.changed);
        }
        assert_eq!(stage.changes[1].deal_id.as_deref(), Some("d2"));
    }

    #[tokio::test]
    async fn visible_user_listing_failure_short_circuits() {
        let stub = StubCrm::spawn().await;
        stub.state
            .set_visible_users(502, json!({"error": "bad gateway"}));
        let (client, _auth) = stub.client_and_auth();

        let mut by_contact = mapping(vec![("1", vec![deal(Some("d1"), Some("u1"))])]);
        let stage = rotate_owners(&client, "token", RotationMode::Apply, &mut by_contact).await;

        assert!(stage.enabled);
        assert_eq!(stage.changes.len(), 1);
        assert_eq!(stage.changes[0].reason, Some("list_visible_users_failed"));
        assert_eq!(stage.changes[0].error_status, Some(502));
        assert!(stub.state.deal_updates().is_empty());
    }
}
