use crm::client::CrmClient;
use crm::errors::ErrorDetail;
use crm::types::{Contact, Deal};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Upper bound on simultaneous outstanding provider calls per fan-out
/// stage, so a large contact or owner set cannot stampede the provider.
pub const FAN_OUT_LIMIT: usize = 8;

/// Per-contact result: either that contact's deals or the error its
/// lookup hit. Contacts with zero deals get no entry at all.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DealsEntry {
    Deals(Vec<Deal>),
    Error(ErrorDetail),
}

pub type DealsByContact = IndexMap<String, DealsEntry>;

pub struct DealsStage {
    pub by_contact: DealsByContact,
    /// Distinct contact ids queried.
    pub contacts_checked: usize,
    /// Keys present in the mapping, error entries included.
    pub contacts_with_deals: usize,
}

/// Fans deal searches out across the distinct contact ids and joins once
/// all have settled. Each lookup is independent: one contact's failure
/// becomes its own error entry and never cancels the siblings.
pub async fn find_deals(client: &CrmClient, token: &str, contacts: &[Contact]) -> DealsStage {
    let mut seen = HashSet::new();
    let mut contact_ids = Vec::new();
    for contact in contacts {
        if let Some(id) = &contact.id {
            if seen.insert(id.clone()) {
                contact_ids.push(id.clone());
            }
        }
    }

    let semaphore = Arc::new(Semaphore::new(FAN_OUT_LIMIT));
    let mut join_set = JoinSet::new();
    for contact_id in &contact_ids {
        let client = client.clone();
        let token = token.to_owned();
        let contact_id = contact_id.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = client.search_deals(&token, &contact_id).await;
            (contact_id, result)
        });
    }

    let mut settled: HashMap<String, DealsEntry> = HashMap::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((contact_id, Ok(page))) => {
                // zero deals: the contact stays out of the mapping entirely
                if !page.deals.is_empty() {
                    settled.insert(contact_id, DealsEntry::Deals(page.deals));
                }
            }
            Ok((contact_id, Err(err))) => {
                settled.insert(contact_id, DealsEntry::Error(err.into()));
            }
            Err(join_err) => tracing::error!("deal lookup task panicked: {join_err}"),
        }
    }

    // keyed in query order regardless of completion order
    let mut by_contact = DealsByContact::new();
    for contact_id in &contact_ids {
        if let Some(entry) = settled.remove(contact_id) {
            by_contact.insert(contact_id.clone(), entry);
        }
    }

    let contacts_with_deals = by_contact.len();
    DealsStage {
        by_contact,
        contacts_checked: contact_ids.len(),
        contacts_with_deals,
    }
}
