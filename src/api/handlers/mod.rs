//! API handlers for the authentication service.

pub mod admin;
pub mod auth;
pub mod health;
pub mod root;
