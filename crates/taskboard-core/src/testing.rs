//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;

use crate::api::{ApiError, AuthService};
use crate::auth::TokenPair;
use crate::models::{AuthResponse, Credentials, UserProfile};

/// Unsigned JWT-shaped token with the given `exp` and `sub`.
pub(crate) fn token_expiring_at(exp: i64, sub: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": sub, "exp": exp, "iat": exp - 3600 }).to_string(),
    );
    format!("{header}.{payload}.signature")
}

/// Token that expires `secs` from now (negative for the past).
pub(crate) fn token_expiring_in(secs: i64, sub: &str) -> String {
    token_expiring_at(Utc::now().timestamp() + secs, sub)
}

pub(crate) fn test_user() -> UserProfile {
    UserProfile {
        id: "user-1".to_string(),
        email: "a@b.com".to_string(),
        name: Some("Ada".to_string()),
        avatar: None,
        is_verified: Some(true),
        extra: Default::default(),
    }
}

pub(crate) fn auth_response(tokens: TokenPair) -> AuthResponse {
    AuthResponse {
        tokens,
        user: Some(test_user()),
    }
}

/// Scriptable `AuthService`.
///
/// Queued responses are consumed in order; once a queue is empty login and
/// refresh hand out fresh one-hour tokens numbered by call count.
#[derive(Default)]
pub(crate) struct MockAuthService {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    /// Refresh tokens presented to `refresh`, in order.
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    /// Bearer tokens presented to `me`, in order.
    pub me_tokens_seen: Mutex<Vec<Option<String>>>,
    login_responses: Mutex<VecDeque<Result<AuthResponse, ApiError>>>,
    refresh_responses: Mutex<VecDeque<Result<AuthResponse, ApiError>>>,
    me_responses: Mutex<VecDeque<Result<UserProfile, ApiError>>>,
    refresh_delay: Duration,
}

impl MockAuthService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every refresh take `delay` (tokio time) before answering.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn push_login(&self, response: Result<AuthResponse, ApiError>) {
        self.login_responses.lock().unwrap().push_back(response);
    }

    pub fn push_refresh(&self, response: Result<AuthResponse, ApiError>) {
        self.refresh_responses.lock().unwrap().push_back(response);
    }

    pub fn push_me(&self, response: Result<UserProfile, ApiError>) {
        self.me_responses.lock().unwrap().push_back(response);
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn me_count(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    pub fn login_count(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    fn fresh_response(prefix: &str, n: usize) -> AuthResponse {
        auth_response(TokenPair::new(
            token_expiring_in(3600, &format!("{prefix}-{n}")),
            format!("{prefix}-refresh-{n}"),
        ))
    }
}

#[async_trait]
impl AuthService for MockAuthService {
    async fn login(&self, _credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let queued = self.login_responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(Self::fresh_response("login", n)))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        let queued = self.refresh_responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(Self::fresh_response("refreshed", n)))
    }

    async fn me(&self, access_token: Option<&str>) -> Result<UserProfile, ApiError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        self.me_tokens_seen
            .lock()
            .unwrap()
            .push(access_token.map(str::to_string));
        let queued = self.me_responses.lock().unwrap().pop_front();
        match queued {
            Some(response) => response,
            None if access_token.is_some() => Ok(test_user()),
            None => Err(ApiError::Unauthorized),
        }
    }
}
