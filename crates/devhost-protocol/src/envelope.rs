//! Uniform result envelope for externally exposed operations.
//!
//! Every operation crossing the devhost boundary resolves to this shape:
//! a success flag plus either data or an error message. Nothing raises an
//! unhandled failure across the boundary.

use serde::{Deserialize, Serialize};

/// Result envelope: success flag + data or error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying data.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response carrying an error message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for ApiResponse<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope() {
        let resp = ApiResponse::ok(42);
        assert!(resp.success);
        assert_eq!(resp.data, Some(42));
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_err_envelope() {
        let resp: ApiResponse<()> = ApiResponse::err("boom");
        assert!(!resp.success);
        assert!(resp.data.is_none());
        assert_eq!(resp.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_from_result() {
        let resp: ApiResponse<u16> = Ok::<_, std::io::Error>(8080).into();
        assert!(resp.success);
        let resp: ApiResponse<u16> =
            Err::<u16, _>(std::io::Error::other("no such port")).into();
        assert_eq!(resp.error.as_deref(), Some("no such port"));
    }
}
