use crate::client::{CrmClient, PAGE_SIZE};
use crate::errors::{CrmError, CrmResult};
use crate::types::Contact;
use serde_json::Value;

/// One page of normalized contact search results.
#[derive(Clone, Debug)]
pub struct ContactsPage {
    pub contacts: Vec<Contact>,
    pub total: usize,
}

impl CrmClient {
    /// Searches contacts by normalized phone, narrowed by email when one
    /// was supplied. Results may arrive under `contacts` or `data`
    /// depending on the provider version; both are accepted.
    pub async fn search_contacts(
        &self,
        token: &str,
        phone: &str,
        email: Option<&str>,
    ) -> CrmResult<ContactsPage> {
        let filter = match email {
            Some(email) => format!("phone:{phone} AND email:{email}"),
            None => format!("phone:{phone}"),
        };

        let response = self
            .get(self.contacts_url.clone(), token)
            .query(&[
                ("filter", filter.as_str()),
                ("page[number]", "1"),
                ("page[size]", PAGE_SIZE),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrmError::from_response(response).await);
        }

        let payload = response.json::<Value>().await?;
        let raw = payload
            .get("contacts")
            .and_then(Value::as_array)
            .or_else(|| payload.get("data").and_then(Value::as_array));

        let contacts: Vec<Contact> = raw
            .map(|records| {
                records
                    .iter()
                    .filter(|record| record.is_object())
                    .map(Contact::from_provider)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ContactsPage {
            total: contacts.len(),
            contacts,
        })
    }
}
