//! Request guards for protected routes.
//!
//! Handlers opt into authorization by taking these extractors as
//! parameters: [`Identity`] runs the full session check and attaches the
//! resolved identity to the request, [`Admin`] additionally requires the
//! admin role. Entitlement denials from the gate convert into
//! [`PlanRejection`] responses so tier-gated handlers can use `?`.
//!
//! Every 401 in the auth family carries the same body; the response never
//! reveals whether the credential was missing, forged, expired, or tied to
//! a suspended account.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::{extract_credential, AuthError};
use crate::entitlement::EntitlementError;
use crate::routes::AppState;
use crate::types::Identity;

/// Uniform message for the 401 family.
const NOT_AUTHORIZED: &str = "Not authorized";

/// Rejection produced by the identity and admin guards.
#[derive(Debug)]
pub struct AuthRejection(pub AuthError);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Forbidden"),
            AuthError::Unavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            }
            AuthError::NoCredential
            | AuthError::InvalidOrExpired
            | AuthError::UnknownIdentity
            | AuthError::Suspended => (StatusCode::UNAUTHORIZED, NOT_AUTHORIZED),
        };

        (
            status,
            Json(json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}

impl FromRequestParts<AppState> for Identity {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credential = extract_credential(&parts.headers);
        state
            .authenticator
            .authenticate(credential.as_deref())
            .await
            .map_err(AuthRejection)
    }
}

/// Identity guard that additionally requires the admin role.
#[derive(Debug, Clone)]
pub struct Admin(pub Identity);

impl FromRequestParts<AppState> for Admin {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credential = extract_credential(&parts.headers);
        state
            .authenticator
            .authenticate_admin(credential.as_deref())
            .await
            .map(Admin)
            .map_err(AuthRejection)
    }
}

/// Response form of an entitlement denial.
///
/// Denials are deliberately specific, unlike auth failures: the body tells
/// the client it needs a plan (`requiresPlan`) and, when the caller merely
/// holds too low a tier, which plan it currently has (`currentPlan`), so
/// the client can drive an upsell flow.
#[derive(Debug)]
pub struct PlanRejection(pub EntitlementError);

impl From<EntitlementError> for PlanRejection {
    fn from(err: EntitlementError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PlanRejection {
    fn into_response(self) -> Response {
        match self.0 {
            EntitlementError::NoActivePlan => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "success": false,
                    "message": "An active subscription is required",
                    "requiresPlan": true,
                })),
            )
                .into_response(),
            EntitlementError::InsufficientPlan { current, required } => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "success": false,
                    "message": format!("The {required} plan is required"),
                    "requiresPlan": true,
                    "currentPlan": current,
                })),
            )
                .into_response(),
            EntitlementError::Unavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "message": "Service unavailable" })),
            )
                .into_response(),
        }
    }
}
