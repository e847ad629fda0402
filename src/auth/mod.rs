//! Session-backed JWT authentication.
//!
//! Credentials live in the [`credentials::CredentialStore`], sessions in the
//! [`sessions::SessionStore`] which is the source of truth for revocation.
//! The [`cache::SessionCache`] only accelerates lookups.

pub mod access;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod models;
pub mod password;
pub mod redis_cache;
pub mod repo;
pub mod service;
pub mod sessions;
pub mod token;
pub(crate) mod utils;

pub use access::{require_permission, require_role};
pub use config::AuthConfig;
pub use error::{AuthError, StoreError};
pub use service::{AuthService, ClientInfo, LoginOutcome, Principal, Registration, TokenPair};
pub use token::TokenCodec;
