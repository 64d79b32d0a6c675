//! Proxy API error types

use thiserror::Error;

/// Errors that can occur when talking to the proxy API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Connection refused, timeout, TLS failure
    #[error("network error: {0}")]
    Network(String),

    /// 404 from the proxy (e.g. OpenID not configured)
    #[error("endpoint not found: {0}")]
    NotFound(String),

    /// Any other non-success HTTP status
    #[error("proxy returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Create an HTTP error from a status and response body
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ApiError::Http {
            status,
            message: message.into(),
        }
    }

    /// HTTP status code if the proxy answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound(_) => Some(404),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this is a client-side rejection (4xx), e.g. an invalid token
    pub fn is_rejection(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::http(status.as_u16(), err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::NotFound("/openid/auth_info".into()).status(), Some(404));
        assert_eq!(ApiError::http(401, "invalid token").status(), Some(401));
        assert_eq!(ApiError::Network("refused".into()).status(), None);
    }

    #[test]
    fn test_rejection_only_for_4xx() {
        assert!(ApiError::http(400, "bad").is_rejection());
        assert!(ApiError::NotFound("x".into()).is_rejection());
        assert!(!ApiError::http(502, "bad gateway").is_rejection());
        assert!(!ApiError::Decode("eof".into()).is_rejection());
    }

    #[test]
    fn test_display() {
        let err = ApiError::http(403, "token expired");
        assert_eq!(err.to_string(), "proxy returned 403: token expired");
    }
}
