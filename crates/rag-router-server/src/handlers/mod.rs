pub mod chat;
pub mod dify;
pub mod health;
pub mod rag;
pub mod system;

use crate::models::MAX_MESSAGE_LENGTH;
use crate::utils::error::ApiError;

/// Reject blank or oversized user text before it reaches a backend.
pub(crate) fn validate_text(field: &str, text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    let length = text.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "{} is too long ({} > {} characters)",
            field, length, MAX_MESSAGE_LENGTH
        )));
    }
    Ok(())
}
