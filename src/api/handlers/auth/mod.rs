//! Auth handlers: registration, login, token rotation, logout and password
//! reset.
//!
//! Every protected handler resolves its caller through
//! [`principal::require_auth`], which delegates to the auth service so that
//! revocation is honoured on every request.

pub mod login;
pub mod logout;
pub mod me;
pub mod password_reset;
pub(crate) mod principal;
pub mod refresh;
pub mod register;
pub mod types;
pub(crate) mod utils;
