//! Core data model for the Sparq realtime server.
//!
//! This module defines the types shared across the authorization and
//! delivery layers: identities, subscription plans, entitlements, and the
//! events pushed to live channels.

use serde::{Deserialize, Serialize};

/// Role attached to an account in the platform directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
}

/// The durable, authenticated representation of a user.
///
/// An `Identity` is fetched fresh from the directory on every authorization
/// check and is never cached across requests, so a suspension takes effect
/// on the very next call. It carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Durable user id assigned by the directory.
    pub id: String,

    /// Account role.
    pub role: Role,

    /// Whether the account is currently suspended.
    pub suspended: bool,
}

impl Identity {
    /// Returns `true` if this identity holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Subscription plan tier.
///
/// Tiers form a strict total order used by the entitlement gate:
/// `basic < standard < premium`. Plan names the gate does not recognize
/// rank below every tier (rank 0).
///
/// # Example
///
/// ```rust
/// use sparq_server::types::Plan;
///
/// assert!(Plan::Basic.rank() < Plan::Standard.rank());
/// assert!(Plan::Standard.rank() < Plan::Premium.rank());
/// assert_eq!(Plan::from_name("premium"), Some(Plan::Premium));
/// assert_eq!(Plan::from_name("enterprise"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Basic,
    Standard,
    Premium,
}

impl Plan {
    /// Numeric rank of this tier (`basic=1, standard=2, premium=3`).
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Basic => 1,
            Self::Standard => 2,
            Self::Premium => 3,
        }
    }

    /// Parses a plan name as stored in subscription records.
    ///
    /// Returns `None` for unrecognized names; callers treat those as rank 0.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(Self::Basic),
            "standard" => Some(Self::Standard),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    /// Canonical lowercase name of this tier.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }

    /// Rank of an arbitrary plan name; unrecognized names rank 0.
    #[must_use]
    pub fn rank_of(name: &str) -> u8 {
        Self::from_name(name).map_or(0, Self::rank)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Subscription record status as stored by the billing service.
pub const SUBSCRIPTION_ACTIVE: &str = "active";

/// The currently held subscription record for an account.
///
/// At most one *active* entitlement per owner is meaningful; absence of an
/// active entitlement means "no plan". The `plan` field is kept as the raw
/// stored name so unrecognized tiers survive round trips; rank comparison
/// goes through [`Plan::rank_of`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// The user id that owns this subscription.
    pub owner_id: String,

    /// Plan name as stored (e.g. `"basic"`, `"standard"`, `"premium"`).
    pub plan: String,

    /// Record status; only `"active"` grants access.
    pub status: String,
}

impl Entitlement {
    /// Returns `true` if this record currently grants access.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SUBSCRIPTION_ACTIVE
    }

    /// The recognized tier for this record, if any.
    #[must_use]
    pub fn plan_tier(&self) -> Option<Plan> {
        Plan::from_name(&self.plan)
    }

    /// Numeric rank of this record's plan; unrecognized plans rank 0.
    #[must_use]
    pub fn plan_rank(&self) -> u8 {
        Plan::rank_of(&self.plan)
    }
}

/// Kind of a live event delivered to clients.
///
/// Clients subscribe per kind; the serialized name is the event name on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMatch,
    NewMessage,
}

impl EventKind {
    /// Wire name of this event kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewMatch => "new_match",
            Self::NewMessage => "new_message",
        }
    }
}

/// An identity-addressed live event.
///
/// Events are transient and fire-and-forget: they exist only between the
/// producer handing them to the dispatcher and the write onto each of the
/// target's channels. The payload is an opaque JSON blob; this core never
/// inspects it beyond serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event name on the wire.
    #[serde(rename = "event")]
    pub kind: EventKind,

    /// The identity whose channels receive this event.
    pub target_user_id: String,

    /// Opaque payload forwarded verbatim to the client.
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates a `new_match` notification for one participant.
    ///
    /// Match creation notifies both participants; the producer emits one
    /// event per participant.
    #[must_use]
    pub fn new_match(target_user_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: EventKind::NewMatch,
            target_user_id: target_user_id.into(),
            payload,
        }
    }

    /// Creates a `new_message` notification for the recipient.
    #[must_use]
    pub fn new_message(target_user_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: EventKind::NewMessage,
            target_user_id: target_user_id.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_order_is_strict_and_total() {
        assert!(Plan::Basic.rank() < Plan::Standard.rank());
        assert!(Plan::Standard.rank() < Plan::Premium.rank());
        assert!(Plan::Basic < Plan::Standard);
        assert!(Plan::Standard < Plan::Premium);
    }

    #[test]
    fn plan_from_name_recognizes_all_tiers() {
        assert_eq!(Plan::from_name("basic"), Some(Plan::Basic));
        assert_eq!(Plan::from_name("standard"), Some(Plan::Standard));
        assert_eq!(Plan::from_name("premium"), Some(Plan::Premium));
    }

    #[test]
    fn plan_from_name_rejects_unknown_names() {
        assert_eq!(Plan::from_name("gold"), None);
        assert_eq!(Plan::from_name("PREMIUM"), None);
        assert_eq!(Plan::from_name(""), None);
    }

    #[test]
    fn unknown_plan_names_rank_zero() {
        assert_eq!(Plan::rank_of("gold"), 0);
        assert_eq!(Plan::rank_of(""), 0);
        assert_eq!(Plan::rank_of("basic"), 1);
        assert_eq!(Plan::rank_of("premium"), 3);
    }

    #[test]
    fn plan_display_matches_wire_name() {
        assert_eq!(Plan::Basic.to_string(), "basic");
        assert_eq!(Plan::Premium.to_string(), "premium");
    }

    #[test]
    fn plan_serde_uses_snake_case_names() {
        assert_eq!(serde_json::to_string(&Plan::Standard).unwrap(), "\"standard\"");
        let plan: Plan = serde_json::from_str("\"premium\"").unwrap();
        assert_eq!(plan, Plan::Premium);
    }

    #[test]
    fn role_serde_uses_snake_case_names() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"member\"").unwrap();
        assert_eq!(role, Role::Member);
    }

    #[test]
    fn identity_is_admin() {
        let member = Identity {
            id: "u1".into(),
            role: Role::Member,
            suspended: false,
        };
        let admin = Identity {
            id: "u2".into(),
            role: Role::Admin,
            suspended: false,
        };
        assert!(!member.is_admin());
        assert!(admin.is_admin());
    }

    #[test]
    fn entitlement_active_check() {
        let mut ent = Entitlement {
            owner_id: "u1".into(),
            plan: "standard".into(),
            status: "active".into(),
        };
        assert!(ent.is_active());
        assert_eq!(ent.plan_tier(), Some(Plan::Standard));
        assert_eq!(ent.plan_rank(), 2);

        ent.status = "canceled".into();
        assert!(!ent.is_active());
    }

    #[test]
    fn entitlement_with_unknown_plan_ranks_zero() {
        let ent = Entitlement {
            owner_id: "u1".into(),
            plan: "legacy-vip".into(),
            status: "active".into(),
        };
        assert_eq!(ent.plan_tier(), None);
        assert_eq!(ent.plan_rank(), 0);
    }

    #[test]
    fn event_kind_wire_names() {
        assert_eq!(EventKind::NewMatch.as_str(), "new_match");
        assert_eq!(EventKind::NewMessage.as_str(), "new_message");
    }

    #[test]
    fn event_serializes_with_named_event_field() {
        let event = Event::new_match("u1", json!({"match_id": "m-42"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "new_match");
        assert_eq!(value["target_user_id"], "u1");
        assert_eq!(value["payload"]["match_id"], "m-42");
    }

    #[test]
    fn event_round_trips_opaque_payload() {
        let payload = json!({"conversation_id": "c-9", "preview": "hey :)"});
        let event = Event::new_message("u2", payload.clone());
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, EventKind::NewMessage);
        assert_eq!(back.target_user_id, "u2");
        assert_eq!(back.payload, payload);
    }
}
