use crate::client::{CrmClient, item_url};
use crate::errors::{CrmError, CrmResult};
use crate::types::{OwnerInfo, VisibleUser, id_string, string_field};
use serde_json::Value;

impl CrmClient {
    /// Fetches one user by id. The provider wraps the record in a `data`
    /// envelope; missing fields degrade to `None` rather than failing.
    pub async fn fetch_user(&self, token: &str, user_id: &str) -> CrmResult<OwnerInfo> {
        let response = self
            .get(item_url(&self.users_url, user_id), token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrmError::from_response(response).await);
        }

        let payload = response.json::<Value>().await?;
        let data = payload.get("data");

        Ok(OwnerInfo {
            name: string_field(data.and_then(|d| d.get("name"))),
            email: string_field(data.and_then(|d| d.get("email"))),
        })
    }

    /// Lists users eligible for assignment. Rows without an id are
    /// discarded, matching the provider's occasional placeholder entries.
    pub async fn list_visible_users(&self, token: &str) -> CrmResult<Vec<VisibleUser>> {
        let response = self
            .get(self.users_url.clone(), token)
            .query(&[
                ("filter", "is:visible:true"),
                ("page[number]", "1"),
                ("page[size]", "200"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrmError::from_response(response).await);
        }

        let payload = response.json::<Value>().await?;
        let users = payload
            .get("data")
            .and_then(Value::as_array)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|record| {
                        let id = id_string(record.get("id"))?;
                        Some(VisibleUser {
                            id,
                            name: string_field(record.get("name")),
                            email: string_field(record.get("email")),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(users)
    }
}
