//! # ZTIAM (ZeroTrust IAM Analyzer authentication service)
//!
//! `ztiam` issues and verifies the bearer tokens that guard the analyzer API.
//! It owns credential verification, account lockout, session bookkeeping and
//! role/permission checks for every protected request.
//!
//! ## Sessions
//!
//! Every successful login creates exactly one session row holding the `jti` of
//! the access token and the `jti` of the refresh token issued with it.
//!
//! - **Rotation:** a refresh replaces both identifiers on the same row with a
//!   compare-and-swap on the current refresh `jti`, so a refresh token can be
//!   exchanged once. Replays and losing concurrent refreshes are rejected.
//! - **Expiry:** the stored `expires_at` tracks the access-token window. The
//!   refresh token is bounded only by its own signed `exp`.
//! - **Revocation:** logout flips `is_revoked`; rows are never deleted here.
//!
//! ## Session cache
//!
//! A Redis read-through cache keyed by `session:{access_jti}` short-circuits
//! the store on the hot path. It is never authoritative: entries are dropped
//! before any revocation or rotation hits the store and are written only after
//! the store accepted a new session. Cache outages degrade to store-only checks.
//!
//! ## Authorization
//!
//! Role and permission checks always use roles resolved from the credential
//! store on the current request, never the role snapshot embedded in the token.
//! Authentication failures are a uniform `401`; the concrete reason is logged.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
