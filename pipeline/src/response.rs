use crate::deals::DealsByContact;
use crate::rotation::OwnerChange;
use crate::token::TokenInfo;
use crm::types::Contact;
use http::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SearchMode {
    #[serde(rename = "phone_only")]
    PhoneOnly,
    #[serde(rename = "phone+email")]
    PhoneEmail,
}

/// Success-path response body.
#[derive(Serialize)]
pub struct ResolveResponse {
    pub phone_normalized: String,
    pub input_email: Option<String>,
    pub search_mode: SearchMode,
    #[serde(flatten)]
    pub token: TokenInfo,
    pub contacts_found: usize,
    pub contacts: Vec<Contact>,
    pub deals_contacts_checked: usize,
    pub deals_contacts_with_deals: usize,
    pub owner_rotation_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_changes: Option<Vec<OwnerChange>>,
    pub deals_by_contact_id: DealsByContact,
}

/// Body returned when the contact search itself failed (after the one
/// permitted retry). Carried with HTTP 200: business errors ride in the
/// body, not the transport status.
#[derive(Serialize)]
pub struct ContactErrorResponse {
    pub phone_normalized: String,
    pub input_email: Option<String>,
    pub search_mode: SearchMode,
    #[serde(flatten)]
    pub token: TokenInfo,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_error: Option<String>,
}

/// What the entry surface sends back: a transport status plus a JSON body.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn ok(body: &impl Serialize) -> Reply {
        Reply {
            status: StatusCode::OK,
            body: serde_json::to_value(body)
                .unwrap_or_else(|err| json!({"error": err.to_string()})),
        }
    }

    pub fn bad_request(message: &str) -> Reply {
        Reply {
            status: StatusCode::BAD_REQUEST,
            body: json!({"error": message}),
        }
    }

    pub fn internal_error(message: String) -> Reply {
        Reply {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({"error": message}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_mode_serialization() {
        assert_eq!(
            serde_json::to_value(SearchMode::PhoneOnly).unwrap(),
            json!("phone_only")
        );
        assert_eq!(
            serde_json::to_value(SearchMode::PhoneEmail).unwrap(),
            json!("phone+email")
        );
    }

    #[test]
    fn bad_request_shape() {
        let reply = Reply::bad_request("contact.phone not found");
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, json!({"error": "contact.phone not found"}));
    }
}
