//! Process-wide holder of the current session.
//!
//! All reads and writes of the token pair and the pending refresh timer go
//! through [`SessionStore`]. Components never keep their own copy of the pair
//! past a single operation.
//!
//! Every session gets an epoch. Async work captures the epoch when it starts
//! and passes it back when it writes, so results belonging to a session that
//! has since ended are refused.
//!
//! Storage I/O (which may be a blocking keychain call) runs outside the state
//! lock. A separate I/O lock keeps the persisted copy in the same order as the
//! in-memory transitions.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::storage::TokenStorage;
use super::TokenPair;

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    /// A refresh failed; always followed by `LoggedOut`.
    Expired,
    LoggedOut,
}

struct PendingTimer {
    handle: AbortHandle,
    deadline: Instant,
}

#[derive(Default)]
struct StoreState {
    tokens: Option<TokenPair>,
    timer: Option<PendingTimer>,
    epoch: u64,
}

impl StoreState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

pub struct SessionStore {
    state: Mutex<StoreState>,
    /// Held around each transition plus its storage write; never by readers.
    io: Mutex<()>,
    storage: Box<dyn TokenStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn TokenStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(StoreState::default()),
            io: Mutex::new(()),
            storage,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn io_lock(&self) -> MutexGuard<'_, ()> {
        self.io.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Reads =====

    pub fn tokens(&self) -> Option<TokenPair> {
        self.lock().tokens.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().tokens.as_ref().map(|t| t.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().tokens.as_ref().map(|t| t.refresh_token.clone())
    }

    /// Epoch and pair of the live session, read together.
    pub fn current(&self) -> Option<(u64, TokenPair)> {
        let state = self.lock();
        state.tokens.clone().map(|tokens| (state.epoch, tokens))
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn is_active(&self) -> bool {
        self.lock().tokens.is_some()
    }

    /// Whether `epoch` still names the live session.
    pub fn is_current(&self, epoch: u64) -> bool {
        let state = self.lock();
        state.epoch == epoch && state.tokens.is_some()
    }

    pub fn has_pending_timer(&self) -> bool {
        self.lock()
            .timer
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// When the pending refresh timer fires, if one is armed.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.lock()
            .timer
            .as_ref()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.deadline)
    }

    // ===== Writes =====

    /// Start a new session with `tokens`, ending whatever was there before.
    /// Returns the new session's epoch.
    pub fn begin(&self, tokens: TokenPair) -> u64 {
        let _io = self.io_lock();
        let epoch = {
            let mut state = self.lock();
            state.cancel_timer();
            state.epoch += 1;
            state.tokens = Some(tokens.clone());
            state.epoch
        };
        debug!(epoch, "Session started");
        self.persist(&tokens);
        epoch
    }

    /// Swap in a refreshed pair, provided session `epoch` is still live.
    pub fn replace(&self, epoch: u64, tokens: TokenPair) -> bool {
        let _io = self.io_lock();
        {
            let mut state = self.lock();
            if state.epoch != epoch || state.tokens.is_none() {
                return false;
            }
            state.cancel_timer();
            state.tokens = Some(tokens.clone());
        }
        self.persist(&tokens);
        true
    }

    /// Install the pending refresh timer for session `epoch`, cancelling the
    /// previous one. A timer for a session that has ended is aborted.
    pub fn set_timer(&self, epoch: u64, handle: AbortHandle, deadline: Instant) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch || state.tokens.is_none() {
            handle.abort();
            return false;
        }
        state.cancel_timer();
        state.timer = Some(PendingTimer { handle, deadline });
        true
    }

    /// Destroy the session: tokens, timer and persisted copy. Idempotent.
    /// Returns whether there was a session to end.
    pub fn clear(&self) -> bool {
        let _io = self.io_lock();
        let had_session = Self::end_session(&mut self.lock());
        self.wipe();
        had_session
    }

    /// Like [`clear`](Self::clear), but only if session `epoch` is still live.
    pub fn clear_if(&self, epoch: u64) -> bool {
        let _io = self.io_lock();
        let had_session = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return false;
            }
            Self::end_session(&mut state)
        };
        self.wipe();
        had_session
    }

    fn end_session(state: &mut StoreState) -> bool {
        state.cancel_timer();
        let had_session = state.tokens.take().is_some();
        if had_session {
            state.epoch += 1;
            debug!(epoch = state.epoch, "Session cleared");
        }
        had_session
    }

    fn wipe(&self) {
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    /// Load a persisted pair into a fresh session.
    pub fn restore(&self) -> Option<(u64, TokenPair)> {
        let tokens = match self.storage.load() {
            Ok(tokens) => tokens?,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session");
                return None;
            }
        };
        let epoch = self.begin(tokens.clone());
        Some((epoch, tokens))
    }

    fn persist(&self, tokens: &TokenPair) {
        if let Err(e) = self.storage.save(tokens) {
            warn!(error = %e, "Failed to persist session tokens");
        }
    }

    // ===== Events =====

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{MemoryStorage, TokenStorage};
    use std::sync::{Arc, OnceLock, Weak};
    use std::time::Duration;

    struct SharedStorage(Arc<MemoryStorage>);

    impl TokenStorage for SharedStorage {
        fn load(&self) -> anyhow::Result<Option<TokenPair>> {
            self.0.load()
        }
        fn save(&self, tokens: &TokenPair) -> anyhow::Result<()> {
            self.0.save(tokens)
        }
        fn clear(&self) -> anyhow::Result<()> {
            self.0.clear()
        }
    }

    fn store_with_backing() -> (SessionStore, Arc<MemoryStorage>) {
        let backing = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(Box::new(SharedStorage(backing.clone())));
        (store, backing)
    }

    fn idle_timer() -> AbortHandle {
        tokio::spawn(std::future::pending::<()>()).abort_handle()
    }

    #[test]
    fn test_begin_persists_and_bumps_epoch() {
        let (store, backing) = store_with_backing();
        assert!(!store.is_active());

        let first = store.begin(TokenPair::new("a1", "r1"));
        let second = store.begin(TokenPair::new("a2", "r2"));
        assert!(second > first);
        assert!(!store.is_current(first));
        assert!(store.is_current(second));
        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(backing.load().unwrap(), Some(TokenPair::new("a2", "r2")));
    }

    #[test]
    fn test_replace_refuses_stale_epoch() {
        let (store, _) = store_with_backing();
        let old = store.begin(TokenPair::new("a1", "r1"));
        let current = store.begin(TokenPair::new("a2", "r2"));

        assert!(!store.replace(old, TokenPair::new("stale", "stale")));
        assert_eq!(store.access_token().as_deref(), Some("a2"));

        assert!(store.replace(current, TokenPair::new("a3", "r3")));
        assert_eq!(store.refresh_token().as_deref(), Some("r3"));
        // Replacing keeps the same session
        assert!(store.is_current(current));
    }

    #[test]
    fn test_replace_after_clear_is_refused() {
        let (store, _) = store_with_backing();
        let epoch = store.begin(TokenPair::new("a1", "r1"));
        store.clear();
        assert!(!store.replace(epoch, TokenPair::new("late", "late")));
        assert!(store.tokens().is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent_and_cancels_timer() {
        let (store, backing) = store_with_backing();
        let epoch = store.begin(TokenPair::new("a1", "r1"));
        let deadline = Instant::now() + Duration::from_secs(60);
        assert!(store.set_timer(epoch, idle_timer(), deadline));
        assert!(store.has_pending_timer());
        assert_eq!(store.timer_deadline(), Some(deadline));

        assert!(store.clear());
        assert!(store.tokens().is_none());
        assert!(!store.has_pending_timer());
        assert!(backing.load().unwrap().is_none());

        assert!(!store.clear());
        assert!(store.tokens().is_none());
        assert!(!store.has_pending_timer());
    }

    #[tokio::test]
    async fn test_set_timer_replaces_previous() {
        let (store, _) = store_with_backing();
        let epoch = store.begin(TokenPair::new("a1", "r1"));

        let first = tokio::spawn(std::future::pending::<()>());
        let now = Instant::now();
        store.set_timer(epoch, first.abort_handle(), now + Duration::from_secs(10));
        store.set_timer(epoch, idle_timer(), now + Duration::from_secs(20));

        let err = first.await.expect_err("first timer should be aborted");
        assert!(err.is_cancelled());
        assert_eq!(store.timer_deadline(), Some(now + Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_set_timer_for_ended_session_aborts_it() {
        let (store, _) = store_with_backing();
        let epoch = store.begin(TokenPair::new("a1", "r1"));
        store.clear();

        let timer = tokio::spawn(std::future::pending::<()>());
        assert!(!store.set_timer(epoch, timer.abort_handle(), Instant::now()));
        assert!(timer.await.unwrap_err().is_cancelled());
        assert!(!store.has_pending_timer());
    }

    #[test]
    fn test_clear_if_only_touches_matching_session() {
        let (store, _) = store_with_backing();
        let old = store.begin(TokenPair::new("a1", "r1"));
        store.begin(TokenPair::new("a2", "r2"));

        assert!(!store.clear_if(old));
        assert!(store.is_active());
    }

    #[test]
    fn test_restore_loads_persisted_pair() {
        let (store, backing) = store_with_backing();
        assert!(store.restore().is_none());

        backing.save(&TokenPair::new("a1", "r1")).unwrap();
        let (epoch, tokens) = store.restore().expect("pair restored");
        assert_eq!(tokens.access_token, "a1");
        assert!(store.is_current(epoch));
    }

    #[test]
    fn test_events_reach_subscribers() {
        let (store, _) = store_with_backing();
        let mut rx = store.subscribe();
        store.emit(SessionEvent::LoggedIn);
        store.emit(SessionEvent::LoggedOut);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::LoggedIn);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::LoggedOut);
    }

    /// Reads the store back from inside each storage call.
    #[derive(Default)]
    struct ReadingStorage {
        store: OnceLock<Weak<SessionStore>>,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl ReadingStorage {
        fn observe(&self) {
            let token = self
                .store
                .get()
                .and_then(Weak::upgrade)
                .and_then(|store| store.access_token());
            self.seen.lock().unwrap().push(token);
        }
    }

    impl TokenStorage for Arc<ReadingStorage> {
        fn load(&self) -> anyhow::Result<Option<TokenPair>> {
            Ok(None)
        }
        fn save(&self, _tokens: &TokenPair) -> anyhow::Result<()> {
            self.observe();
            Ok(())
        }
        fn clear(&self) -> anyhow::Result<()> {
            self.observe();
            Ok(())
        }
    }

    #[test]
    fn test_storage_io_runs_outside_state_lock() {
        let storage = Arc::new(ReadingStorage::default());
        let store = Arc::new(SessionStore::new(Box::new(storage.clone())));
        storage.store.set(Arc::downgrade(&store)).unwrap();

        let epoch = store.begin(TokenPair::new("a1", "r1"));
        store.replace(epoch, TokenPair::new("a2", "r2"));
        store.clear();

        // Each write already sees the state it is persisting
        assert_eq!(
            storage.seen.lock().unwrap().clone(),
            vec![Some("a1".to_string()), Some("a2".to_string()), None]
        );
    }
}
