use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("invalid event payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("event body is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Canonical input extracted from whatever shape the trigger delivered.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventBody {
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Resolves the trigger payload to the canonical body. Accepts a raw JSON
/// string, a gateway-style envelope carrying a `body` string (optionally
/// base64-encoded), or an already-decoded object. Everything after this
/// boundary works with [`EventBody`] only.
pub fn parse_event(event: &Value) -> Result<EventBody, EventError> {
    let body = match event {
        Value::String(raw) => serde_json::from_str(raw)?,
        Value::Object(envelope) => {
            let is_base64 = envelope
                .get("isBase64Encoded")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            match envelope.get("body") {
                Some(Value::String(body)) if is_base64 => {
                    let decoded = String::from_utf8(BASE64.decode(body.as_bytes())?)?;
                    serde_json::from_str(&decoded)?
                }
                Some(Value::String(body)) => serde_json::from_str(body)?,
                Some(body) if !body.is_null() => body.clone(),
                _ => event.clone(),
            }
        }
        other => other.clone(),
    };

    Ok(extract(&body))
}

fn extract(body: &Value) -> EventBody {
    let contact = body.get("contact");
    EventBody {
        phone: contact.and_then(|c| c.get("phone")).and_then(scalar_string),
        email: contact
            .and_then(|c| c.get("email"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .filter(|email| !email.is_empty()),
    }
}

/// Phones occasionally arrive as bare numbers; both forms are accepted.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
