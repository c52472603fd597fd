//! Connection registry mapping identities to their live channels.
//!
//! The registry is the only mutable shared structure in this core. It maps
//! each identity id to the set of channels that identity currently holds
//! open (one per device or tab) and hands the dispatcher copy-on-read
//! snapshots so delivery never holds the lock.
//!
//! # Ownership
//!
//! The registry is an explicitly constructed object passed by `Arc` to the
//! components that need it; there is no ambient singleton. It holds only
//! channel ids and sender handles, never the sockets themselves, and it is
//! purely in-process: entries live exactly as long as the underlying
//! transport connection and the table is rebuilt from zero on restart.
//!
//! # Thread Safety
//!
//! All mutation goes through a single [`RwLock`] scoped to the registry.
//! The lock is never held across an `.await`; sends to channel queues
//! happen on snapshots outside the lock.
//!
//! # Example
//!
//! ```rust
//! use sparq_server::registry::ConnectionRegistry;
//! use tokio::sync::mpsc;
//!
//! let registry = ConnectionRegistry::new();
//!
//! let (tx, _rx) = mpsc::unbounded_channel();
//! let channel_id = registry.register("user-1", tx);
//!
//! assert_eq!(registry.channels_for("user-1").len(), 1);
//!
//! registry.unregister(channel_id);
//! registry.unregister(channel_id); // idempotent
//! assert!(registry.channels_for("user-1").is_empty());
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::types::Event;

/// Sending half of a channel's event queue.
///
/// Each live channel owns the receiving half in its socket task; the
/// registry holds senders so a slow client blocks only its own task.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiving half of a channel's event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Opaque identifier for one live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry-internal record for one channel.
struct ChannelEntry {
    identity_id: String,
    sender: EventSender,
}

#[derive(Default)]
struct Inner {
    /// identity id -> channels currently open for that identity.
    by_identity: HashMap<String, HashSet<ChannelId>>,

    /// channel id -> owning identity and queue handle.
    channels: HashMap<ChannelId, ChannelEntry>,
}

/// Thread-safe in-process registry of live channels per identity.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Registers a channel for an identity and returns its id.
    ///
    /// Callers invoke this only after the channel's handshake credential
    /// passed the session authenticator. The channel is *added* to the
    /// identity's set; existing channels for the same identity are left in
    /// place (multi-device).
    pub fn register(&self, identity_id: impl Into<String>, sender: EventSender) -> ChannelId {
        let identity_id = identity_id.into();
        let channel_id = ChannelId::new();

        let mut inner = self.inner.write().unwrap();
        inner.channels.insert(
            channel_id,
            ChannelEntry {
                identity_id: identity_id.clone(),
                sender,
            },
        );
        let device_count = {
            let set = inner.by_identity.entry(identity_id.clone()).or_default();
            set.insert(channel_id);
            set.len()
        };

        debug!(
            user_id = %identity_id,
            %channel_id,
            device_count,
            "Channel registered"
        );

        channel_id
    }

    /// Removes a channel from whatever identity set contains it.
    ///
    /// Idempotent: removing a channel twice, or one that was never
    /// registered, is a no-op. This absorbs disconnect races between the
    /// socket task and the dispatcher.
    pub fn unregister(&self, channel_id: ChannelId) {
        let mut inner = self.inner.write().unwrap();

        let Some(entry) = inner.channels.remove(&channel_id) else {
            trace!(%channel_id, "Unregister for unknown channel ignored");
            return;
        };

        if let Some(set) = inner.by_identity.get_mut(&entry.identity_id) {
            set.remove(&channel_id);
            if set.is_empty() {
                inner.by_identity.remove(&entry.identity_id);
            }
        }

        debug!(user_id = %entry.identity_id, %channel_id, "Channel unregistered");
    }

    /// Returns a snapshot of the channels currently open for an identity.
    ///
    /// The snapshot is a copy taken under the read lock; iteration never
    /// observes registrations or removals that happen after the call.
    #[must_use]
    pub fn channels_for(&self, identity_id: &str) -> Vec<(ChannelId, EventSender)> {
        let inner = self.inner.read().unwrap();

        let Some(set) = inner.by_identity.get(identity_id) else {
            return Vec::new();
        };

        set.iter()
            .filter_map(|id| {
                inner
                    .channels
                    .get(id)
                    .map(|entry| (*id, entry.sender.clone()))
            })
            .collect()
    }

    /// Total number of live channels across all identities.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().unwrap().channels.len()
    }

    /// Number of identities with at least one live channel.
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.inner.read().unwrap().by_identity.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().unwrap();
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &inner.channels.len())
            .field("identity_count", &inner.by_identity.len())
            .finish()
    }
}
