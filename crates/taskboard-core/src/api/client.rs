use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::models::{AuthResponse, Credentials, UserProfile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh-token";
const ME_PATH: &str = "/auth/me";
const REGISTER_PATH: &str = "/auth/register";
const VERIFY_OTP_PATH: &str = "/auth/verify-otp";
const RESEND_OTP_PATH: &str = "/auth/resend-otp";
const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

/// The network operations the session layer depends on.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Exchange credentials for a token pair.
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError>;

    /// Exchange a refresh token for a new token pair.
    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError>;

    /// Fetch the profile of whoever `access_token` belongs to. `None` sends
    /// the request without credentials.
    async fn me(&self, access_token: Option<&str>) -> Result<UserProfile, ApiError>;
}

/// `/auth/me` answers either with the bare profile or wrapped in an envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum MeResponse {
    User { user: UserProfile },
    Data { data: UserProfile },
    Bare(UserProfile),
}

impl From<MeResponse> for UserProfile {
    fn from(resp: MeResponse) -> Self {
        match resp {
            MeResponse::User { user } => user,
            MeResponse::Data { data } => data,
            MeResponse::Bare(user) => user,
        }
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

/// HTTP client for the auth service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, self.url(path))
            .header(header::ACCEPT, "application/json");
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        debug!(path, "POST");
        self.send(self.request(Method::POST, path, None).json(body))
            .await
    }

    /// Send an arbitrary JSON request to the API, optionally with a bearer
    /// token. Meant to be wrapped by the session's request gate.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<T, ApiError> {
        debug!(%method, path, authenticated = token.is_some(), "API request");
        let mut builder = self.request(method, path, token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder).await
    }

    // ===== Account endpoints (opaque passthrough) =====

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<Value, ApiError> {
        self.post(
            REGISTER_PATH,
            &json!({ "name": name, "email": email, "password": password }),
        )
        .await
    }

    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<Value, ApiError> {
        self.post(VERIFY_OTP_PATH, &json!({ "email": email, "otp": otp }))
            .await
    }

    pub async fn resend_otp(&self, email: &str) -> Result<Value, ApiError> {
        self.post(RESEND_OTP_PATH, &json!({ "email": email })).await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Value, ApiError> {
        self.post(FORGOT_PASSWORD_PATH, &json!({ "email": email }))
            .await
    }

    pub async fn reset_password(
        &self,
        email: &str,
        otp: &str,
        new_password: &str,
    ) -> Result<Value, ApiError> {
        self.post(
            RESET_PASSWORD_PATH,
            &json!({ "email": email, "otp": otp, "newPassword": new_password }),
        )
        .await
    }
}

#[async_trait]
impl AuthService for AuthClient {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        self.post(LOGIN_PATH, credentials).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        self.post(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await
    }

    async fn me(&self, access_token: Option<&str>) -> Result<UserProfile, ApiError> {
        let resp: MeResponse = self
            .send(self.request(Method::GET, ME_PATH, access_token))
            .await?;
        Ok(resp.into())
    }
}
