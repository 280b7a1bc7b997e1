//! Single-flight exchange of the refresh token for a new pair.
//!
//! However many callers ask for a refresh while one is running, they all
//! await the same shared future and exactly one network call is made. A
//! failed refresh ends the session; it is never retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::AuthService;

use super::clock::TokenClock;
use super::store::{SessionEvent, SessionStore};
use super::{SessionError, TokenPair};

type RefreshOutcome = Result<TokenPair, SessionError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    /// Session the flight belongs to; only callers of that session join it.
    epoch: u64,
    future: SharedRefresh,
}

pub struct SilentRefresher {
    service: Arc<dyn AuthService>,
    store: Arc<SessionStore>,
    clock: TokenClock,
    in_flight: Mutex<Option<InFlight>>,
    flights: AtomicU64,
}

impl SilentRefresher {
    pub fn new(
        service: Arc<dyn AuthService>,
        store: Arc<SessionStore>,
        clock: TokenClock,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            store,
            clock,
            in_flight: Mutex::new(None),
            flights: AtomicU64::new(0),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a refresh of the live session is running.
    pub fn is_refreshing(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|flight| self.store.is_current(flight.epoch))
    }

    /// Refresh the live session, joining the refresh already in flight if
    /// there is one. Every failure resolves to `SessionExpired`.
    pub async fn refresh(self: &Arc<Self>) -> RefreshOutcome {
        self.join_or_start().await
    }

    fn join_or_start(self: &Arc<Self>) -> SharedRefresh {
        let mut slot = self.slot();
        let Some((epoch, current)) = self.store.current() else {
            debug!("No session to refresh");
            return future::ready(Err(SessionError::SessionExpired))
                .boxed()
                .shared();
        };

        if let Some(flight) = slot.as_ref().filter(|flight| flight.epoch == epoch) {
            debug!(flight = flight.id, epoch, "Joining refresh already in flight");
            return flight.future.clone();
        }
        // A flight left over from an ended session is abandoned here; its
        // result is refused by the store when it lands.

        let id = self.flights.fetch_add(1, Ordering::Relaxed) + 1;
        let this = Arc::clone(self);
        let future = async move {
            let outcome = this.exchange(epoch, current).await;
            this.finish(id);
            outcome
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            epoch,
            future: future.clone(),
        });
        future
    }

    fn finish(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
    }

    async fn exchange(self: &Arc<Self>, epoch: u64, current: TokenPair) -> RefreshOutcome {
        debug!(epoch, "Refreshing session");
        let response = match self.service.refresh(&current.refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, epoch, "Token refresh failed, ending session");
                self.expire(epoch);
                return Err(SessionError::SessionExpired);
            }
        };

        let tokens = response.tokens;
        if !self.store.replace(epoch, tokens.clone()) {
            debug!(epoch, "Session ended while refreshing, discarding new tokens");
            return Err(SessionError::SessionExpired);
        }

        self.arm(epoch, &tokens.access_token);
        self.store.emit(SessionEvent::Refreshed);
        info!(epoch, "Session refreshed");
        Ok(tokens)
    }

    /// End session `epoch` after an unrecoverable auth failure. No-op if that
    /// session is already gone.
    pub fn expire(&self, epoch: u64) -> bool {
        if !self.store.clear_if(epoch) {
            return false;
        }
        self.store.emit(SessionEvent::Expired);
        self.store.emit(SessionEvent::LoggedOut);
        true
    }

    /// Arm the token clock so session `epoch` refreshes itself before
    /// `access_token` expires.
    pub fn arm(self: &Arc<Self>, epoch: u64, access_token: &str) -> Duration {
        let refresher = Arc::downgrade(self);
        self.clock
            .schedule(&self.store, epoch, access_token, move || async move {
                let Some(refresher) = refresher.upgrade() else {
                    return;
                };
                if let Err(e) = refresher.refresh().await {
                    debug!(error = %e, "Scheduled refresh did not complete");
                }
            })
    }
}
