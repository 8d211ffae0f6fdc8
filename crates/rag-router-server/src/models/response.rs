use serde::{Deserialize, Serialize};

/// JSON envelope returned by every API endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Error envelope that still carries a payload, e.g. a failed health report.
    pub fn error_with_data(code: u16, message: impl Into<String>, data: T) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}
