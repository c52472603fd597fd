//! Entitlement gate: allow/deny by minimum subscription tier.
//!
//! The gate answers one question: does this identity currently hold an
//! active plan of at least the required tier? Tier comparison uses the
//! fixed rank order `basic=1 < standard=2 < premium=3`; plan names the gate
//! does not recognize rank 0 and therefore fail any minimum. The check is
//! stateless and idempotent; it reads one subscription record and never
//! mutates anything.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::directory::{DirectoryClient, DirectoryError};
use crate::types::{Entitlement, Identity, Plan};

/// Errors produced by the entitlement gate.
///
/// The HTTP layer maps the denial variants to `403` bodies with
/// `requiresPlan: true` so clients can drive an upsell flow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// The identity holds no active subscription.
    #[error("no active plan")]
    NoActivePlan,

    /// The identity's plan ranks strictly below the required tier.
    #[error("{required} plan required")]
    InsufficientPlan {
        /// The plan the caller currently holds, as stored.
        current: String,
        /// The minimum tier the operation requires.
        required: Plan,
    },

    /// The subscription store could not be reached; not a client failure.
    #[error("entitlement store unavailable: {0}")]
    Unavailable(String),
}

/// Decides feature access by subscription tier.
///
/// Cheap to clone; shares the directory client.
#[derive(Debug, Clone)]
pub struct EntitlementGate {
    directory: Arc<DirectoryClient>,
}

impl EntitlementGate {
    /// Creates a gate backed by the given directory client.
    pub fn new(directory: Arc<DirectoryClient>) -> Self {
        Self { directory }
    }

    /// Authorizes an identity against an optional minimum plan tier.
    ///
    /// With no minimum, any active subscription passes. On success the
    /// entitlement is returned so the caller can branch on the exact plan
    /// without a second lookup.
    ///
    /// # Errors
    ///
    /// - [`EntitlementError::NoActivePlan`] - no subscription record, or the
    ///   record is not in `active` status
    /// - [`EntitlementError::InsufficientPlan`] - active but ranked strictly
    ///   below `minimum`
    /// - [`EntitlementError::Unavailable`] - the store read failed
    pub async fn authorize(
        &self,
        identity: &Identity,
        minimum: Option<Plan>,
    ) -> Result<Entitlement, EntitlementError> {
        let record = self
            .directory
            .fetch_subscription(&identity.id)
            .await
            .map_err(map_directory_error)?;

        let entitlement = match record {
            Some(entitlement) if entitlement.is_active() => entitlement,
            Some(entitlement) => {
                debug!(
                    user_id = %identity.id,
                    status = %entitlement.status,
                    "Subscription record present but not active"
                );
                return Err(EntitlementError::NoActivePlan);
            }
            None => return Err(EntitlementError::NoActivePlan),
        };

        if let Some(required) = minimum {
            if entitlement.plan_rank() < required.rank() {
                debug!(
                    user_id = %identity.id,
                    current = %entitlement.plan,
                    required = %required,
                    "Plan tier below required minimum"
                );
                return Err(EntitlementError::InsufficientPlan {
                    current: entitlement.plan.clone(),
                    required,
                });
            }
        }

        Ok(entitlement)
    }
}

fn map_directory_error(err: DirectoryError) -> EntitlementError {
    // A 404 is already Ok(None) at the client; anything surfacing here is
    // infrastructure.
    EntitlementError::Unavailable(err.to_string())
}
