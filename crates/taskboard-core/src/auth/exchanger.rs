use std::sync::Arc;

use tracing::{info, warn};

use crate::api::AuthService;
use crate::models::{AuthResponse, Credentials};

use super::refresher::SilentRefresher;
use super::store::{SessionEvent, SessionStore};
use super::SessionError;

/// Turns email/password into a live session with one network call.
pub struct CredentialExchanger {
    service: Arc<dyn AuthService>,
    store: Arc<SessionStore>,
    refresher: Arc<SilentRefresher>,
}

impl CredentialExchanger {
    pub fn new(
        service: Arc<dyn AuthService>,
        store: Arc<SessionStore>,
        refresher: Arc<SilentRefresher>,
    ) -> Self {
        Self {
            service,
            store,
            refresher,
        }
    }

    /// Log in. Failures are reported as-is; there is no automatic retry.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, SessionError> {
        credentials
            .validate()
            .map_err(SessionError::InvalidCredentials)?;

        let response = self.service.login(credentials).await.map_err(|e| {
            warn!(error = %e, "Login failed");
            SessionError::from_login_failure(e)
        })?;

        let epoch = self.store.begin(response.tokens.clone());
        let delay = self.refresher.arm(epoch, &response.tokens.access_token);
        self.store.emit(SessionEvent::LoggedIn);
        info!(
            epoch,
            refresh_in_secs = delay.as_secs(),
            "Logged in"
        );
        Ok(response)
    }
}
