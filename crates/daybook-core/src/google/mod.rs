//! Google Calendar + Tasks integration.
//!
//! `client` is the typed REST adapter the sync engine talks to, `wire` holds
//! the serde shapes of the provider payloads, and `auth` implements the
//! OAuth2 flow and keyring-backed token storage.

pub mod auth;
pub mod client;
pub mod wire;

pub use auth::{KeyringTokenSource, OAuthTokens};
pub use client::{ApiError, EventsQuery, GoogleClient, StaticTokenSource, TokenSource};
