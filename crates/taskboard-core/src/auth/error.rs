use std::sync::Arc;

use thiserror::Error;

use crate::api::ApiError;

/// Failures surfaced by the session layer.
///
/// `Clone` because a single refresh outcome is handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal only: callers see the immediate refresh it triggers.
    #[error("Malformed access token: {0}")]
    MalformedToken(String),

    #[error(transparent)]
    Api(Arc<ApiError>),
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        SessionError::Api(Arc::new(err))
    }
}

impl SessionError {
    /// Classify a failed login exchange.
    pub fn from_login_failure(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => {
                SessionError::InvalidCredentials("Incorrect email or password".to_string())
            }
            ApiError::BadRequest(msg) | ApiError::AccessDenied(msg) => {
                SessionError::InvalidCredentials(msg)
            }
            other if other.is_transient() => SessionError::ServiceUnavailable(other.to_string()),
            ApiError::InvalidResponse(msg) => SessionError::ServiceUnavailable(msg),
            other => SessionError::InvalidCredentials(other.to_string()),
        }
    }

    /// Whether the caller has to log in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, SessionError::SessionExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failure_classification() {
        assert!(matches!(
            SessionError::from_login_failure(ApiError::Unauthorized),
            SessionError::InvalidCredentials(_)
        ));
        assert!(matches!(
            SessionError::from_login_failure(ApiError::BadRequest("Email is required".into())),
            SessionError::InvalidCredentials(msg) if msg == "Email is required"
        ));
        assert!(matches!(
            SessionError::from_login_failure(ApiError::ServerError("boom".into())),
            SessionError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            SessionError::from_login_failure(ApiError::Timeout),
            SessionError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            SessionError::from_login_failure(ApiError::NotFound("user".into())),
            SessionError::InvalidCredentials(_)
        ));
    }

    #[test]
    fn test_requires_login() {
        assert!(SessionError::SessionExpired.requires_login());
        assert!(!SessionError::ServiceUnavailable("down".into()).requires_login());
    }
}
