use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::api::{ApiError, AuthClient, AuthService};
use crate::config::Config;
use crate::models::{Credentials, UserProfile};

use super::clock::TokenClock;
use super::exchanger::CredentialExchanger;
use super::gate::RequestGate;
use super::refresher::SilentRefresher;
use super::storage::TokenStorage;
use super::store::{SessionEvent, SessionStore};
use super::{SessionError, TokenPair};

/// Where the session stands right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedOut,
    Active,
    Refreshing,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::LoggedOut => "logged out",
            SessionStatus::Active => "active",
            SessionStatus::Refreshing => "refreshing",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the session lifecycle: login, silent refresh, gated requests, logout.
pub struct SessionManager {
    service: Arc<dyn AuthService>,
    store: Arc<SessionStore>,
    refresher: Arc<SilentRefresher>,
    exchanger: CredentialExchanger,
    gate: RequestGate,
}

impl SessionManager {
    pub fn new(
        service: Arc<dyn AuthService>,
        storage: Box<dyn TokenStorage>,
        clock: TokenClock,
    ) -> Self {
        let store = Arc::new(SessionStore::new(storage));
        let refresher = SilentRefresher::new(service.clone(), store.clone(), clock);
        let exchanger =
            CredentialExchanger::new(service.clone(), store.clone(), refresher.clone());
        let gate = RequestGate::new(store.clone(), refresher.clone());

        Self {
            service,
            store,
            refresher,
            exchanger,
            gate,
        }
    }

    /// Build a manager talking HTTP to the configured auth service.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = AuthClient::new(&config.api_base_url, config.request_timeout())?;
        Ok(Self::new(
            Arc::new(client),
            config.open_storage()?,
            TokenClock::new(config.refresh_skew()),
        ))
    }

    /// Log in and return the user's profile. The profile comes from the login
    /// response, or from `/auth/me` if the service left it out.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        let response = self
            .exchanger
            .login(&Credentials::new(email.trim(), password))
            .await?;
        match response.user {
            Some(user) => Ok(user),
            None => self.current_user().await,
        }
    }

    /// End the session. Safe to call repeatedly.
    pub fn logout(&self) {
        if self.store.clear() {
            self.store.emit(SessionEvent::LoggedOut);
            info!("Logged out");
        }
    }

    /// Pick up a session persisted by an earlier run. Tokens that are expired
    /// or unreadable get refreshed on the next tick.
    pub fn restore(&self) -> bool {
        let Some((epoch, tokens)) = self.store.restore() else {
            return false;
        };
        let delay = self.refresher.arm(epoch, &tokens.access_token);
        self.store.emit(SessionEvent::LoggedIn);
        info!(epoch, refresh_in_secs = delay.as_secs(), "Restored saved session");
        true
    }

    pub async fn refresh(&self) -> Result<TokenPair, SessionError> {
        self.refresher.refresh().await
    }

    /// Send a request through the gate. See [`RequestGate::send`].
    pub async fn send<T, F, Fut>(&self, request: F) -> Result<T, SessionError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.gate.send(request).await
    }

    /// "Who am I" for the current session.
    pub async fn current_user(&self) -> Result<UserProfile, SessionError> {
        self.gate
            .send(|token| {
                let service = self.service.clone();
                async move { service.me(token.as_deref()).await }
            })
            .await
    }

    pub fn status(&self) -> SessionStatus {
        if !self.store.is_active() {
            SessionStatus::LoggedOut
        } else if self.refresher.is_refreshing() {
            SessionStatus::Refreshing
        } else {
            SessionStatus::Active
        }
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.store.tokens()
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.store.has_pending_timer()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }
}
