//! Session authentication for protected requests and channel handshakes.
//!
//! Every protected call runs the full check end to end: extract the
//! credential, verify its Ed25519 signature and expiry, then fetch the
//! account fresh from the directory and reject suspended accounts. There is
//! no session cache, so a suspension or credential revocation is observed
//! on the very next call; the cost is one directory read per request.
//!
//! # Credential sources
//!
//! Credentials are extracted from either the `sparq_session` cookie or the
//! `Authorization: Bearer` header; when both are present the cookie wins.
//! The WebSocket upgrade additionally accepts a `token` query parameter,
//! handled at the route layer.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use thiserror::Error;
use tracing::{debug, trace};

use crate::directory::{DirectoryClient, DirectoryError};
use crate::token::{self, TokenError};
use crate::types::Identity;

/// Name of the session cookie set by the login flow.
pub const SESSION_COOKIE: &str = "sparq_session";

/// Errors produced by the session authenticator.
///
/// The HTTP layer collapses the 401 family to one uniform message so the
/// response never reveals which sub-check failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented in any accepted location.
    #[error("no credential presented")]
    NoCredential,

    /// The credential failed signature verification or is expired.
    #[error("invalid or expired credential")]
    InvalidOrExpired,

    /// The credential verified but references an identity the directory
    /// does not know.
    #[error("unknown identity")]
    UnknownIdentity,

    /// The account is currently suspended.
    #[error("account suspended")]
    Suspended,

    /// The caller is authenticated but does not hold the admin role.
    #[error("admin role required")]
    NotAdmin,

    /// The directory could not be reached; not a client failure.
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

impl From<TokenError> for AuthError {
    fn from(_: TokenError) -> Self {
        // Forged, malformed and expired tokens are indistinguishable to the
        // caller.
        Self::InvalidOrExpired
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Self::UnknownIdentity,
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Extracts a session credential from request headers.
///
/// The cookie takes precedence over the bearer header.
#[must_use]
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE).or_else(|| bearer_token(headers))
}

/// Reads a named cookie from the `Cookie` header(s).
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, val)) = pair.trim().split_once('=') {
                if key == name && !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
    }
    None
}

/// Reads a bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Verifies credentials and resolves them to live identities.
///
/// Cheap to clone; shares the directory client.
#[derive(Debug, Clone)]
pub struct SessionAuthenticator {
    directory: Arc<DirectoryClient>,
    verifying_key: VerifyingKey,
}

impl SessionAuthenticator {
    /// Creates an authenticator from the directory client and the login
    /// service's verifying key.
    pub fn new(directory: Arc<DirectoryClient>, verifying_key: VerifyingKey) -> Self {
        Self {
            directory,
            verifying_key,
        }
    }

    /// Authenticates a credential and returns the live identity.
    ///
    /// Runs the full pipeline: signature and expiry check, fresh account
    /// fetch, suspension check. No lock is held across the directory read.
    ///
    /// # Errors
    ///
    /// See [`AuthError`]; all variants are terminal for the request.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let credential = credential.ok_or(AuthError::NoCredential)?;

        let claims = token::verify_session_token(credential, &self.verifying_key, Utc::now())?;
        trace!(user_id = %claims.sub, "Session token verified");

        let identity = self.directory.fetch_account(&claims.sub).await?;

        if identity.suspended {
            debug!(user_id = %identity.id, "Rejecting suspended account");
            return Err(AuthError::Suspended);
        }

        Ok(identity)
    }

    /// Authenticates a credential and additionally requires the admin role.
    pub async fn authenticate_admin(
        &self,
        credential: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let identity = self.authenticate(credential).await?;

        if !identity.is_admin() {
            debug!(user_id = %identity.id, "Rejecting non-admin caller");
            return Err(AuthError::NotAdmin);
        }

        Ok(identity)
    }
}
