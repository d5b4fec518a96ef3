use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Result alias for provider calls.
pub type CrmResult<T> = Result<T, CrmError>;

/// Failure of a single provider call. `Upstream` carries the status and
/// whatever body the provider sent back; `Network` means no response was
/// received at all (connect failure, timeout, or an undecodable body).
#[derive(Error, Debug)]
pub enum CrmError {
    #[error("API returned {}", .status.as_u16())]
    Upstream {
        status: StatusCode,
        details: Option<Value>,
    },
    #[error("{0}")]
    Network(String),
}

impl CrmError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CrmError::Upstream { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    /// Builds the `Upstream` variant from a non-2xx response, capturing the
    /// provider's JSON body when it has one.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let details = response.json::<Value>().await.ok();
        CrmError::Upstream { status, details }
    }
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        CrmError::Network(err.to_string())
    }
}

/// Business-error shape carried inside fan-out result maps and response
/// bodies. One item's `ErrorDetail` never aborts sibling work.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorDetail {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<CrmError> for ErrorDetail {
    fn from(err: CrmError) -> Self {
        match err {
            CrmError::Upstream { status, details } => ErrorDetail {
                error: true,
                message: format!("API returned {}", status.as_u16()),
                status: Some(status.as_u16()),
                details,
            },
            CrmError::Network(message) => ErrorDetail {
                error: true,
                message,
                status: None,
                details: None,
            },
        }
    }
}
