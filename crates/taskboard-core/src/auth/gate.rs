use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::ApiError;

use super::refresher::SilentRefresher;
use super::store::SessionStore;
use super::SessionError;

/// Attaches the current access token to outbound requests and recovers from
/// a single 401 by refreshing and resending once.
///
/// The gate knows nothing about the transport: a request is a closure that
/// receives the bearer token (or `None`) and performs one attempt.
pub struct RequestGate {
    store: Arc<SessionStore>,
    refresher: Arc<SilentRefresher>,
}

impl RequestGate {
    pub fn new(store: Arc<SessionStore>, refresher: Arc<SilentRefresher>) -> Self {
        Self { store, refresher }
    }

    pub async fn send<T, F, Fut>(&self, mut request: F) -> Result<T, SessionError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let Some((epoch, tokens)) = self.store.current() else {
            // No session: let the server reject it if it must
            return request(None).await.map_err(SessionError::from);
        };

        let sent = tokens.access_token;
        match request(Some(sent.clone())).await {
            Err(ApiError::Unauthorized) => {}
            other => return other.map_err(SessionError::from),
        }

        // Someone else may have rotated the pair while this request was out
        let rotated = self
            .store
            .access_token()
            .is_some_and(|current| current != sent);
        if rotated {
            debug!(epoch, "Request rejected with a superseded token, retrying");
        } else {
            debug!(epoch, "Request rejected as unauthorized, refreshing session");
            self.refresher.refresh().await?;
        }

        // Re-read: the store is the only source of the current pair
        let Some((epoch, tokens)) = self.store.current() else {
            return Err(SessionError::SessionExpired);
        };

        match request(Some(tokens.access_token)).await {
            Err(ApiError::Unauthorized) => {
                warn!(epoch, "Request still unauthorized after refresh, ending session");
                self.refresher.expire(epoch);
                Err(SessionError::SessionExpired)
            }
            other => other.map_err(SessionError::from),
        }
    }
}
