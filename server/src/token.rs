//! Credential verification for session tokens and producer signatures.
//!
//! Two Ed25519 surfaces live here:
//!
//! - **Session tokens**: the login service issues bearer credentials of the
//!   form `base64url(claims).base64url(signature)` where `claims` is a JSON
//!   document carrying the subject user id and an expiry instant, and the
//!   signature covers the raw claims bytes. The server verifies against the
//!   login service's registered public key and checks expiry; tokens are
//!   never stored server-side.
//! - **Producer signatures**: internal event producers (match service,
//!   message service) sign the raw request body of event submissions and
//!   present the signature in a header, verified against per-producer
//!   registered public keys.
//!
//! # Example
//!
//! ```rust
//! use base64::prelude::*;
//! use chrono::Utc;
//! use ed25519_dalek::{Signer, SigningKey};
//! use sparq_server::token::{verify_session_token, SessionClaims};
//!
//! // The login service signs claims with its private key...
//! let signing_key = SigningKey::from_bytes(&[7u8; 32]);
//! let claims = serde_json::to_vec(&SessionClaims {
//!     sub: "user-1".to_string(),
//!     exp: Utc::now().timestamp() + 600,
//! })
//! .unwrap();
//! let signature = signing_key.sign(&claims);
//! let token = format!(
//!     "{}.{}",
//!     BASE64_URL_SAFE_NO_PAD.encode(&claims),
//!     BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes()),
//! );
//!
//! // ...and the server verifies with the matching public key.
//! let verified = verify_session_token(&token, &signing_key.verifying_key(), Utc::now());
//! assert_eq!(verified.unwrap().sub, "user-1");
//! ```

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from session token verification.
///
/// All variants collapse to the same user-visible rejection; the split
/// exists for logging and tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not two base64url sections joined by a dot, or the
    /// claims are not the expected JSON document.
    #[error("malformed session token")]
    Malformed,

    /// The signature does not match the claims bytes and registered key.
    #[error("invalid session token signature")]
    InvalidSignature,

    /// The token's expiry instant is in the past.
    #[error("session token expired")]
    Expired,
}

/// Errors decoding a configured Ed25519 public key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key contains invalid base64.
    #[error("invalid base64 encoding for public key")]
    InvalidBase64,

    /// The decoded bytes are not a valid Ed25519 public key.
    #[error("invalid public key format")]
    InvalidKey,
}

/// Errors from producer signature verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The producer id is not registered.
    #[error("unknown producer: {0}")]
    UnknownProducer(String),

    /// The signature was well-formed but did not match the message and key.
    #[error("invalid signature")]
    InvalidSignature,

    /// Base64 decoding failed for the named field.
    #[error("invalid base64 encoding for {0}")]
    InvalidBase64(String),

    /// The registered public key is malformed.
    #[error("invalid public key format")]
    InvalidPublicKey,
}

/// Claims carried inside a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// The durable user id the credential was issued for.
    pub sub: String,

    /// Expiry instant as unix seconds.
    pub exp: i64,
}

impl SessionClaims {
    /// Returns `true` if the claims are expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Decodes a base64-encoded Ed25519 public key from configuration.
pub fn decode_verifying_key(key_base64: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = BASE64_STANDARD
        .decode(key_base64)
        .map_err(|_| KeyError::InvalidBase64)?;

    let key_array: [u8; PUBLIC_KEY_LENGTH] =
        bytes.try_into().map_err(|_| KeyError::InvalidKey)?;

    VerifyingKey::from_bytes(&key_array).map_err(|_| KeyError::InvalidKey)
}

/// Verifies a session token and returns its claims.
///
/// The token must be `base64url(claims).base64url(signature)` with the
/// signature covering the raw claims bytes. Verification order is
/// signature first, then expiry, so a forged token never reaches the
/// claims parser's output.
///
/// # Errors
///
/// - [`TokenError::Malformed`] for structural problems
/// - [`TokenError::InvalidSignature`] on cryptographic failure
/// - [`TokenError::Expired`] when `now` is at or past the expiry instant
pub fn verify_session_token(
    token: &str,
    verifying_key: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<SessionClaims, TokenError> {
    let (claims_b64, signature_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|_| TokenError::Malformed)?;

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::Malformed)?;

    let signature_array: [u8; SIGNATURE_LENGTH] = signature_bytes
        .try_into()
        .map_err(|_| TokenError::InvalidSignature)?;

    let signature = Signature::from_bytes(&signature_array);

    verifying_key
        .verify_strict(&claims_bytes, &signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    let claims: SessionClaims =
        serde_json::from_slice(&claims_bytes).map_err(|_| TokenError::Malformed)?;

    if claims.is_expired_at(now) {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

/// Verifies an Ed25519 producer signature for a request body.
///
/// Looks up the registered public key for `producer_id`, decodes key and
/// signature, and verifies the signature against the exact message bytes
/// that were signed (the raw request body).
///
/// # Errors
///
/// - [`SignatureError::UnknownProducer`] if the producer is not registered
/// - [`SignatureError::InvalidBase64`] / [`SignatureError::InvalidPublicKey`]
///   for malformed inputs
/// - [`SignatureError::InvalidSignature`] on cryptographic failure
pub fn verify_producer_signature(
    producer_id: &str,
    signature_base64: &str,
    message: &[u8],
    producer_keys: &HashMap<String, String>,
) -> Result<(), SignatureError> {
    let public_key_base64 = producer_keys
        .get(producer_id)
        .ok_or_else(|| SignatureError::UnknownProducer(producer_id.to_string()))?;

    let public_key_bytes = BASE64_STANDARD
        .decode(public_key_base64)
        .map_err(|_| SignatureError::InvalidBase64("public_key".to_string()))?;

    let public_key_array: [u8; PUBLIC_KEY_LENGTH] = public_key_bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidPublicKey)?;

    let verifying_key = VerifyingKey::from_bytes(&public_key_array)
        .map_err(|_| SignatureError::InvalidPublicKey)?;

    let signature_bytes = BASE64_STANDARD
        .decode(signature_base64)
        .map_err(|_| SignatureError::InvalidBase64("signature".to_string()))?;

    let signature_array: [u8; SIGNATURE_LENGTH] = signature_bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidSignature)?;

    let signature = Signature::from_bytes(&signature_array);

    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| SignatureError::InvalidSignature)
}
