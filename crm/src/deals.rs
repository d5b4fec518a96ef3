use crate::client::{CrmClient, PAGE_SIZE, item_url};
use crate::errors::{CrmError, CrmResult};
use crate::types::Deal;
use serde_json::{Value, json};

/// Deal searches only consider deals a human would still act on.
pub const DEAL_STATUS_FILTER: &str = "(status:ongoing OR status:paused)";

/// One page of deals for a single contact.
#[derive(Clone, Debug)]
pub struct DealsPage {
    pub deals: Vec<Deal>,
    pub total: usize,
}

impl CrmClient {
    pub async fn search_deals(&self, token: &str, contact_id: &str) -> CrmResult<DealsPage> {
        let filter = format!("contact_id:{contact_id} AND {DEAL_STATUS_FILTER}");

        let response = self
            .get(self.deals_url.clone(), token)
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
        let deals: Vec<Deal> = payload
            .get("data")
            .and_then(Value::as_array)
            .map(|records| records.iter().map(Deal::from_provider).collect())
            .unwrap_or_default();

        Ok(DealsPage {
            total: deals.len(),
            deals,
        })
    }

    /// Reassigns a deal to a new owner.
    pub async fn update_deal_owner(
        &self,
        token: &str,
        deal_id: &str,
        owner_id: &str,
    ) -> CrmResult<()> {
        let response = self
            .put(item_url(&self.deals_url, deal_id), token)
            .json(&json!({"deal": {"user_id": owner_id}}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrmError::from_response(response).await);
        }

        Ok(())
    }
}
