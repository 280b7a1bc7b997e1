//! Data models exchanged with the Taskboard authentication service.
//!
//! - `UserProfile`: read-only "who am I" snapshot
//! - `Credentials`: email/password login request
//! - `AuthResponse`: token pair plus profile returned by login and refresh

pub mod user;

pub use user::{AuthResponse, Credentials, UserProfile};
