//! Authentication session lifecycle.
//!
//! This module provides:
//! - `SessionManager`: login, silent refresh, gated requests and logout
//! - `SessionStore`: the single process-wide holder of the token pair and
//!   the pending refresh timer
//! - `TokenClock`: refreshes 5 minutes before the access token's `exp`
//! - `SilentRefresher`: single-flight refresh-token exchange
//! - `RequestGate`: bearer attach plus one refresh-and-retry on 401
//! - `TokenStorage`: file, keychain or in-memory persistence of the pair
//!
//! A failed refresh always ends the session; callers are expected to send
//! the user back to login.

pub mod clock;
pub mod error;
pub mod exchanger;
pub mod gate;
pub mod manager;
pub mod refresher;
pub mod storage;
pub mod store;
pub mod token;

pub use clock::{TokenClock, DEFAULT_REFRESH_SKEW};
pub use error::SessionError;
pub use exchanger::CredentialExchanger;
pub use gate::RequestGate;
pub use manager::{SessionManager, SessionStatus};
pub use refresher::SilentRefresher;
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, TokenStorage};
pub use store::{SessionEvent, SessionStore};
pub use token::{AccessClaims, TokenPair};
