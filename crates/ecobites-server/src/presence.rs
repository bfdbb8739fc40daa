//! Which users currently have a live WebSocket, and where to push to them.
//!
//! One handle per user: a new `join` replaces the previous binding, so a user
//! with two open tabs only receives pushes on the most recently joined one.
//! The registry is process-local and advisory; message history always comes
//! from the store.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use ecobites_shared::protocol::ServerPush;
use ecobites_shared::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The push side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerPush>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its connection drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerPush>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a push without waiting. Fails when the connection is gone or
    /// its queue is full.
    pub fn push(&self, push: ServerPush) -> Result<(), mpsc::error::TrySendError<ServerPush>> {
        self.tx.try_send(push)
    }
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    entries: Arc<DashMap<UserId, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to `handle`, replacing any previous binding for that user.
    /// A connection speaks for one user at a time, so other bindings of the
    /// same connection are dropped. Returns the superseded handle.
    pub fn join(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn = handle.id;
        self.entries
            .retain(|bound, existing| existing.id != conn || *bound == user);

        let previous = self.entries.insert(user.clone(), handle);
        info!(
            user = %user,
            connection = %conn,
            replaced = previous.is_some(),
            online = self.entries.len(),
            "user joined"
        );
        previous
    }

    /// Remove the binding held by this connection, if it still holds one.
    /// A connection superseded by a newer join leaves the newer binding alone.
    pub fn leave(&self, conn: ConnectionId) -> Option<UserId> {
        let mut removed = None;
        self.entries.retain(|user, handle| {
            if handle.id == conn {
                removed = Some(user.clone());
                false
            } else {
                true
            }
        });

        match &removed {
            Some(user) => info!(user = %user, connection = %conn, "user left"),
            None => debug!(connection = %conn, "closed connection held no binding"),
        }
        removed
    }

    pub fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.entries.get(user).map(|entry| entry.value().clone())
    }

    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop every binding. Used at shutdown.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse("userId", id).unwrap()
    }

    #[test]
    fn test_join_and_lookup() {
        let presence = PresenceRegistry::new();
        let (c1, _rx) = ConnectionHandle::new(4);

        assert!(presence.lookup(&user("u")).is_none());
        assert!(presence.join(user("u"), c1.clone()).is_none());
        assert_eq!(presence.lookup(&user("u")).map(|h| h.id()), Some(c1.id()));
        assert_eq!(presence.online_count(), 1);
    }

    #[test]
    fn test_rejoin_overwrites() {
        let presence = PresenceRegistry::new();
        let (c1, _rx1) = ConnectionHandle::new(4);
        let (c2, _rx2) = ConnectionHandle::new(4);

        presence.join(user("u"), c1.clone());
        let replaced = presence.join(user("u"), c2.clone());

        assert_eq!(replaced.map(|h| h.id()), Some(c1.id()));
        assert_eq!(presence.lookup(&user("u")).map(|h| h.id()), Some(c2.id()));
        assert_eq!(presence.online_count(), 1);
    }

    #[test]
    fn test_leave_removes_binding() {
        let presence = PresenceRegistry::new();
        let (c1, _rx) = ConnectionHandle::new(4);

        presence.join(user("u"), c1.clone());
        assert_eq!(presence.leave(c1.id()), Some(user("u")));
        assert!(presence.lookup(&user("u")).is_none());
    }

    #[test]
    fn test_late_leave_keeps_newer_binding() {
        let presence = PresenceRegistry::new();
        let (c1, _rx1) = ConnectionHandle::new(4);
        let (c2, _rx2) = ConnectionHandle::new(4);

        presence.join(user("u"), c1.clone());
        presence.join(user("u"), c2.clone());

        assert_eq!(presence.leave(c1.id()), None);
        assert_eq!(presence.lookup(&user("u")).map(|h| h.id()), Some(c2.id()));
    }

    #[test]
    fn test_rebinding_connection_drops_old_user() {
        let presence = PresenceRegistry::new();
        let (c1, _rx) = ConnectionHandle::new(4);

        presence.join(user("a"), c1.clone());
        presence.join(user("b"), c1.clone());

        assert!(presence.lookup(&user("a")).is_none());
        assert!(presence.lookup(&user("b")).is_some());
        assert_eq!(presence.leave(c1.id()), Some(user("b")));
        assert_eq!(presence.online_count(), 0);
    }

    #[test]
    fn test_push_reaches_receiver() {
        let (handle, mut rx) = ConnectionHandle::new(1);
        let push = ServerPush::new_message(
            ecobites_shared::ThreadId::new(),
            ecobites_shared::ChatMessage {
                seq: 0,
                sender_id: user("s"),
                content: "hi".into(),
                timestamp: chrono::Utc::now(),
            },
        );

        handle.push(push.clone()).unwrap();
        assert!(handle.push(push.clone()).is_err(), "queue of one is full");
        assert_eq!(rx.try_recv().unwrap(), push);
    }
}
