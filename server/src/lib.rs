//! Sparq realtime core.
//!
//! This crate provides the authorization and live-notification layer of the
//! Sparq platform, responsible for:
//! - Verifying session credentials and live account status
//! - Gating features by subscription tier
//! - Delivering `new_match` / `new_message` events to connected clients
//!
//! # Architecture
//!
//! Inbound requests pass through the session authenticator and entitlement
//! gate before reaching business handlers. WebSocket channels authenticate
//! once at upgrade time, register with the in-process connection registry,
//! and receive identity-addressed events fanned out by the dispatcher.
//! Profiles, match scoring, message storage and payments live in other
//! services and reach this core only through the directory API and the
//! signed event ingest endpoint.

pub mod auth;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod entitlement;
pub mod guard;
pub mod registry;
pub mod routes;
pub mod token;
pub mod types;
