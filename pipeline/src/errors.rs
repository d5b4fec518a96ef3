use crate::event::EventError;
use crm::auth::AuthError;
use thiserror::Error;

/// Failures that abort the whole request. Per-item provider errors never
/// reach this type; they are carried inside the response body instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}
