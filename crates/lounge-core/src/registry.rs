//! Connection registry.
//!
//! The registry is the single piece of shared mutable state in a room. It
//! maps every live connection to its delivery queue and, once the connection
//! has joined, to its [`Session`]. Every operation takes the registry lock
//! once, so concurrent calls never observe a half-applied mutation.

use crate::connection::{ConnectionId, Outbox};
use crate::room::{validate_display_name, RoomConfig, RoomError};
use lounge_protocol::Member;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Per-connection state once the connection has joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Connection this session belongs to.
    pub connection_id: ConnectionId,
    /// Name chosen at join.
    pub display_name: String,
    /// Typing indicator.
    pub is_typing: bool,
}

impl Session {
    /// Public view of this session, as listed in the roster.
    #[must_use]
    pub fn member(&self) -> Member {
        Member {
            connection_id: self.connection_id.to_string(),
            display_name: self.display_name.clone(),
            is_typing: self.is_typing,
        }
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, not yet joined.
    Connected,
    /// Has a session.
    Joined,
    /// Not registered (disconnected or never seen).
    Gone,
}

#[derive(Debug, Default)]
struct Inner {
    /// Delivery queues of every registered connection.
    outboxes: HashMap<ConnectionId, Outbox>,
    /// Sessions in join order.
    sessions: Vec<Session>,
}

impl Inner {
    fn position(&self, connection_id: &ConnectionId) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| &s.connection_id == connection_id)
    }
}

/// Registry of live connections and their sessions.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<Inner>,
    max_display_name_length: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_name_limit(RoomConfig::default().max_display_name_length)
    }
}

impl Registry {
    /// Create an empty registry with the default display name limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry accepting display names of up to
    /// `max_display_name_length` characters.
    #[must_use]
    pub fn with_name_limit(max_display_name_length: usize) -> Self {
        Self {
            inner: Mutex::default(),
            max_display_name_length,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave `Inner` half-updated:
        // every mutation is a single insert, remove or field write.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection that has not joined yet.
    ///
    /// Returns `true` if the connection was not registered before.
    pub fn register(&self, connection_id: ConnectionId, outbox: Outbox) -> bool {
        let mut inner = self.lock();
        let is_new = inner.outboxes.insert(connection_id.clone(), outbox).is_none();
        trace!(connection = %connection_id, is_new, "Registered connection");
        is_new
    }

    /// Create or overwrite the session for a registered connection.
    ///
    /// The name is stored trimmed. A repeated join keeps the member's roster
    /// position, replaces the name and resets the typing flag.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidName`] if the name is blank or over the
    /// length limit, and [`RoomError::UnknownConnection`] if the connection
    /// is not registered.
    pub fn join(
        &self,
        connection_id: &ConnectionId,
        display_name: &str,
    ) -> Result<Session, RoomError> {
        let display_name = validate_display_name(display_name, self.max_display_name_length)?;

        let mut inner = self.lock();
        if !inner.outboxes.contains_key(connection_id) {
            return Err(RoomError::UnknownConnection(connection_id.clone()));
        }

        let session = Session {
            connection_id: connection_id.clone(),
            display_name: display_name.to_string(),
            is_typing: false,
        };

        match inner.position(connection_id) {
            Some(index) => {
                debug!(connection = %connection_id, name = %display_name, "Session renamed");
                inner.sessions[index] = session.clone();
            }
            None => {
                debug!(connection = %connection_id, name = %display_name, "Session created");
                inner.sessions.push(session.clone());
            }
        }

        Ok(session)
    }

    /// Look up the session of a connection.
    #[must_use]
    pub fn get(&self, connection_id: &ConnectionId) -> Option<Session> {
        let inner = self.lock();
        inner
            .position(connection_id)
            .map(|index| inner.sessions[index].clone())
    }

    /// Update the typing flag of a session.
    ///
    /// Returns the updated session, or `None` if the connection has not joined.
    pub fn set_typing(&self, connection_id: &ConnectionId, is_typing: bool) -> Option<Session> {
        let mut inner = self.lock();
        let index = inner.position(connection_id)?;
        let session = &mut inner.sessions[index];
        session.is_typing = is_typing;
        Some(session.clone())
    }

    /// Forget a connection and its session.
    ///
    /// Returns the prior session, if the connection had joined. Removing an
    /// unknown connection is a no-op.
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<Session> {
        let mut inner = self.lock();
        inner.outboxes.remove(connection_id);
        let index = inner.position(connection_id)?;
        let session = inner.sessions.remove(index);
        debug!(connection = %connection_id, name = %session.display_name, "Session removed");
        Some(session)
    }

    /// The roster at this instant, in join order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Member> {
        self.lock().sessions.iter().map(Session::member).collect()
    }

    /// Lifecycle state of a connection.
    #[must_use]
    pub fn state(&self, connection_id: &ConnectionId) -> ConnectionState {
        let inner = self.lock();
        if inner.position(connection_id).is_some() {
            ConnectionState::Joined
        } else if inner.outboxes.contains_key(connection_id) {
            ConnectionState::Connected
        } else {
            ConnectionState::Gone
        }
    }

    /// Delivery queue of a registered connection.
    #[must_use]
    pub fn outbox(&self, connection_id: &ConnectionId) -> Option<Outbox> {
        self.lock().outboxes.get(connection_id).cloned()
    }

    /// Delivery queues of every joined connection, optionally minus one.
    #[must_use]
    pub fn member_outboxes(&self, exclude: Option<&ConnectionId>) -> Vec<(ConnectionId, Outbox)> {
        let inner = self.lock();
        inner
            .sessions
            .iter()
            .filter(|s| Some(&s.connection_id) != exclude)
            .filter_map(|s| {
                inner
                    .outboxes
                    .get(&s.connection_id)
                    .map(|outbox| (s.connection_id.clone(), outbox.clone()))
            })
            .collect()
    }

    /// Number of registered connections, joined or not.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().outboxes.len()
    }

    /// Number of joined connections.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Number of members currently typing.
    #[must_use]
    pub fn typing_count(&self) -> usize {
        self.lock().sessions.iter().filter(|s| s.is_typing).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::outbox;

    fn registered(registry: &Registry, id: &str) -> ConnectionId {
        let id = ConnectionId::new(id);
        let (tx, _rx) = outbox(8);
        registry.register(id.clone(), tx);
        id
    }

    fn names(registry: &Registry) -> Vec<String> {
        registry
            .snapshot()
            .into_iter()
            .map(|m| m.display_name)
            .collect()
    }

    #[test]
    fn test_register_does_not_join() {
        let registry = Registry::new();
        let a = registered(&registry, "a");

        assert_eq!(registry.state(&a), ConnectionState::Connected);
        assert!(registry.get(&a).is_none());
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_join_rejects_blank_names() {
        let registry = Registry::new();
        let a = registered(&registry, "a");

        assert!(matches!(
            registry.join(&a, ""),
            Err(RoomError::InvalidName(_))
        ));
        assert!(matches!(
            registry.join(&a, "   "),
            Err(RoomError::InvalidName(_))
        ));
        assert_eq!(registry.state(&a), ConnectionState::Connected);
    }

    #[test]
    fn test_join_enforces_name_limit() {
        let registry = Registry::with_name_limit(3);
        let a = registered(&registry, "a");

        assert!(matches!(
            registry.join(&a, "Alice"),
            Err(RoomError::InvalidName(_))
        ));
        // Surrounding whitespace does not count against the limit.
        assert_eq!(registry.join(&a, "  Al  ").unwrap().display_name, "Al");
    }

    #[test]
    fn test_join_requires_registration() {
        let registry = Registry::new();
        let ghost = ConnectionId::new("ghost");

        assert!(matches!(
            registry.join(&ghost, "Alice"),
            Err(RoomError::UnknownConnection(_))
        ));
        assert_eq!(registry.member_count(), 0);
    }

    #[test]
    fn test_rejoin_overwrites_in_place() {
        let registry = Registry::new();
        let a = registered(&registry, "a");
        let b = registered(&registry, "b");

        registry.join(&a, "Alice").unwrap();
        registry.join(&b, "Bob").unwrap();
        registry.set_typing(&a, true);

        let session = registry.join(&a, "Alicia").unwrap();
        assert_eq!(session.display_name, "Alicia");
        assert!(!session.is_typing);
        assert_eq!(names(&registry), ["Alicia", "Bob"]);
    }

    #[test]
    fn test_roster_order_follows_join_order() {
        let registry = Registry::new();
        let a = registered(&registry, "a");
        let b = registered(&registry, "b");
        let c = registered(&registry, "c");

        // Registration order differs from join order on purpose.
        registry.join(&c, "C").unwrap();
        registry.join(&a, "A").unwrap();
        registry.join(&b, "B").unwrap();
        assert_eq!(names(&registry), ["C", "A", "B"]);

        registry.remove(&a);
        assert_eq!(names(&registry), ["C", "B"]);
    }

    #[test]
    fn test_duplicate_names_allowed() {
        let registry = Registry::new();
        let a = registered(&registry, "a");
        let b = registered(&registry, "b");

        registry.join(&a, "Sam").unwrap();
        registry.join(&b, "Sam").unwrap();
        assert_eq!(names(&registry), ["Sam", "Sam"]);
    }

    #[test]
    fn test_set_typing() {
        let registry = Registry::new();
        let a = registered(&registry, "a");

        assert!(registry.set_typing(&a, true).is_none());

        registry.join(&a, "Alice").unwrap();
        let session = registry.set_typing(&a, true).unwrap();
        assert!(session.is_typing);
        assert_eq!(registry.typing_count(), 1);
        assert!(registry.snapshot()[0].is_typing);
    }

    #[test]
    fn test_remove_twice() {
        let registry = Registry::new();
        let a = registered(&registry, "a");
        registry.join(&a, "Alice").unwrap();

        assert_eq!(registry.remove(&a).unwrap().display_name, "Alice");
        assert!(registry.remove(&a).is_none());
        assert_eq!(registry.state(&a), ConnectionState::Gone);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_member_outboxes_excludes() {
        let registry = Registry::new();
        let a = registered(&registry, "a");
        let b = registered(&registry, "b");
        let _lurker = registered(&registry, "c");

        registry.join(&a, "Alice").unwrap();
        registry.join(&b, "Bob").unwrap();

        let all: Vec<_> = registry
            .member_outboxes(None)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(all, [a.clone(), b.clone()]);

        let others: Vec<_> = registry
            .member_outboxes(Some(&a))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(others, [b]);
    }
}
