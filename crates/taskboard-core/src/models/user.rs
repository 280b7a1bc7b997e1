use serde::{Deserialize, Serialize};

use crate::auth::TokenPair;

/// Profile snapshot returned by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id", alias = "userId")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(rename = "isVerified", default)]
    pub is_verified: Option<bool>,
    /// Anything else the service sends (organization membership, roles, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Cheap local checks so obviously bad input never costs a round trip.
    pub fn validate(&self) -> Result<(), String> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err("Email is required".to_string());
        }
        if !email.contains('@') {
            return Err("Email address is not valid".to_string());
        }
        if self.password.is_empty() {
            return Err("Password is required".to_string());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of a successful login or refresh-token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_response() {
        let json = r#"{
            "accessToken": "aaa.bbb.ccc",
            "refreshToken": "rrr",
            "user": {"_id": "64f0c2", "email": "a@b.com", "name": "Ada", "isVerified": true, "role": "admin"}
        }"#;
        let resp: AuthResponse = serde_json::from_str(json).expect("auth response should parse");
        assert_eq!(resp.tokens.access_token, "aaa.bbb.ccc");
        assert_eq!(resp.tokens.refresh_token, "rrr");

        let user = resp.user.expect("user present");
        assert_eq!(user.id, "64f0c2");
        assert_eq!(user.display_name(), "Ada");
        assert_eq!(user.is_verified, Some(true));
        assert_eq!(user.extra.get("role").and_then(|v| v.as_str()), Some("admin"));
    }

    #[test]
    fn test_auth_response_without_user() {
        let json = r#"{"accessToken": "a", "refreshToken": "r"}"#;
        let resp: AuthResponse = serde_json::from_str(json).expect("auth response should parse");
        assert!(resp.user.is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = UserProfile {
            id: "1".into(),
            email: "a@b.com".into(),
            name: Some("  ".into()),
            avatar: None,
            is_verified: None,
            extra: Default::default(),
        };
        assert_eq!(user.display_name(), "a@b.com");
    }

    #[test]
    fn test_credentials_validate() {
        assert!(Credentials::new("a@b.com", "x").validate().is_ok());
        assert!(Credentials::new("", "x").validate().is_err());
        assert!(Credentials::new("not-an-email", "x").validate().is_err());
        assert!(Credentials::new("a@b.com", "").validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("a@b.com", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
