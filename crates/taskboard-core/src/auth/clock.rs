use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::store::SessionStore;
use super::token::AccessClaims;

/// Default lead time before `exp` at which the refresh fires (5 minutes).
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);

/// Keeps the single pending refresh timer for the live session.
#[derive(Debug, Clone, Copy)]
pub struct TokenClock {
    skew: Duration,
}

impl Default for TokenClock {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_SKEW)
    }
}

impl TokenClock {
    pub fn new(skew: Duration) -> Self {
        Self { skew }
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// How long to wait before refreshing `access_token`, measured from `now`.
    ///
    /// `exp*1000 - now - skew`, clamped at zero. A token whose `exp` cannot be
    /// decoded counts as already expired.
    pub fn delay_until_refresh(&self, access_token: &str, now: DateTime<Utc>) -> Duration {
        let claims = match AccessClaims::decode(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Access token unreadable, refreshing immediately");
                return Duration::ZERO;
            }
        };

        let skew_ms = i64::try_from(self.skew.as_millis()).unwrap_or(i64::MAX);
        let fire_in_ms = claims
            .exp
            .saturating_mul(1000)
            .saturating_sub(now.timestamp_millis())
            .saturating_sub(skew_ms);

        if fire_in_ms <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fire_in_ms as u64)
        }
    }

    /// Arm the refresh timer for session `epoch`, replacing any pending one.
    ///
    /// `on_fire` runs on its own task once the delay elapses, even when the
    /// delay is zero it runs on a later tick, never inline. Returns the delay.
    pub fn schedule<F, Fut>(
        &self,
        store: &SessionStore,
        epoch: u64,
        access_token: &str,
        on_fire: F,
    ) -> Duration
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay_until_refresh(access_token, Utc::now());
        let deadline = Instant::now() + delay;

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            debug!(epoch, "Refresh timer fired");
            // Detached so that rearming the clock from inside the refresh
            // cannot abort the refresh itself.
            tokio::spawn(on_fire());
        });

        if store.set_timer(epoch, timer.abort_handle(), deadline) {
            debug!(epoch, delay_secs = delay.as_secs(), "Refresh timer armed");
        }
        delay
    }
}
