//! Taskboard client core.
//!
//! Client side of the Taskboard authentication protocol: credential login,
//! access/refresh token rotation with a proactive refresh timer, a request
//! gate that transparently recovers from an expired access token, and
//! durable session persistence.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use taskboard_core::{Config, SessionManager};
//!
//! let config = Config::load()?;
//! let session = SessionManager::from_config(&config)?;
//! if !session.restore() {
//!     session.login("a@b.com", "secret").await?;
//! }
//! let me = session.current_user().await?;
//! println!("Hello, {}", me.display_name());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, AuthClient, AuthService};
pub use auth::{SessionError, SessionEvent, SessionManager, SessionStatus, TokenPair};
pub use config::{Config, StorageBackend};
pub use models::{AuthResponse, Credentials, UserProfile};
