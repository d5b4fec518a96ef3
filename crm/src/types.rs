use serde::Serialize;
use serde_json::Value;

/// Normalized projection of a provider contact record. `id` is the join
/// key to deals; provider ids may be numbers or strings and are carried
/// as strings.
#[derive(Clone, Debug, Serialize)]
pub struct Contact {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    pub fn from_provider(record: &Value) -> Contact {
        Contact {
            id: id_string(record.get("id")),
            name: string_field(record.get("name")),
            email: first_entry(record.get("emails"), "email"),
            phone: first_entry(record.get("phones"), "phone"),
        }
    }
}

/// Essential fields of a provider deal. The owner name/email pair is
/// absent until the enrichment stage fills it in (possibly with nulls
/// when the owner lookup failed).
#[derive(Clone, Debug, Serialize)]
pub struct Deal {
    pub id: Option<String>,
    pub name: Option<String>,
    pub total_price: Option<Value>,
    pub status: Option<String>,
    pub owner_id: Option<String>,
    pub contact_ids: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<Option<String>>,
}

impl Deal {
    pub fn from_provider(record: &Value) -> Deal {
        Deal {
            id: id_string(record.get("id")),
            name: string_field(record.get("name")),
            total_price: record
                .get("total_price")
                .filter(|v| !v.is_null())
                .or_else(|| record.get("amount").filter(|v| !v.is_null()))
                .cloned(),
            status: string_field(record.get("status")),
            owner_id: id_string(record.get("owner_id"))
                .or_else(|| id_string(record.get("owner").and_then(|owner| owner.get("id")))),
            contact_ids: record.get("contact_ids").filter(|v| !v.is_null()).cloned(),
            owner_name: None,
            owner_email: None,
        }
    }
}

/// Name/email pair for a deal owner, as resolved by the user fetch.
#[derive(Clone, Debug, Default)]
pub struct OwnerInfo {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// A user eligible for deal assignment per provider visibility rules.
#[derive(Clone, Debug)]
pub struct VisibleUser {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Provider ids arrive as strings or numbers depending on the endpoint.
pub(crate) fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn string_field(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_owned)
}

/// First element of a provider list field, unwrapping `{key: value}`
/// entries; contacts carry `emails`/`phones` as arrays of such objects.
pub(crate) fn first_entry(list: Option<&Value>, key: &str) -> Option<String> {
    let first = list?.as_array()?.first()?;
    match first {
        Value::Object(map) => map.get(key).and_then(Value::as_str).map(str::to_owned),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
