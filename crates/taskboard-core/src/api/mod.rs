//! REST client for the Taskboard authentication service.
//!
//! `AuthClient` talks HTTP via `reqwest`; the rest of the crate only sees the
//! [`AuthService`] trait so the session layer can be driven by any transport
//! (and by in-memory fakes in tests).
//!
//! Access tokens are JWT bearer tokens obtained from `/auth/login` and
//! renewed through `/auth/refresh-token`.

pub mod client;
pub mod error;

pub use client::{AuthClient, AuthService};
pub use error::ApiError;
