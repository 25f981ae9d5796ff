//! The chat room.
//!
//! A room owns one [`Registry`] and runs every inbound intent through the
//! session protocol, then fans the result out with a [`Broadcaster`]. The
//! server keeps a single room; nothing in here assumes it is the only one.

use crate::broadcast::{Broadcaster, Dispatch};
use crate::connection::{outbox, ConnectionId, Outbox, OutboxReceiver};
use crate::registry::Registry;
use crate::session::{self, Intent};
use lounge_protocol::Member;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the room the server hosts by default.
pub const DEFAULT_ROOM: &str = "group";

/// A room identifier.
pub type RoomId = String;

/// Room errors.
///
/// None of these are surfaced to other clients; the transport only logs them.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Join name rejected.
    #[error("Invalid display name: {0}")]
    InvalidName(&'static str),

    /// Intent from a connection without a session (or no longer registered).
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Chat message over the configured length.
    #[error("Message length {length} exceeds maximum {max}")]
    MessageTooLong { length: usize, max: usize },
}

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Maximum display name length, in characters, after trimming.
    pub max_display_name_length: usize,
    /// Maximum chat message length, in characters.
    pub max_message_length: usize,
    /// Capacity of each connection's delivery queue.
    pub outbox_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_display_name_length: 64,
            max_message_length: 4096,
            outbox_capacity: 256,
        }
    }
}

/// Validate a join name, returning it trimmed.
///
/// # Errors
///
/// Returns [`RoomError::InvalidName`] if the name is blank after trimming or
/// longer than `max_length` characters.
pub fn validate_display_name(name: &str, max_length: usize) -> Result<&str, RoomError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RoomError::InvalidName("Display name cannot be empty"));
    }
    if name.chars().count() > max_length {
        return Err(RoomError::InvalidName("Display name too long"));
    }
    Ok(name)
}

/// Room statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    /// Registered connections, joined or not.
    pub connections: usize,
    /// Joined members.
    pub members: usize,
    /// Members currently typing.
    pub typing: usize,
}

/// A single chat room.
///
/// Intents are applied one at a time: the dispatch gate is held from the
/// registry mutation until every resulting frame is queued, so all outboxes
/// see membership changes in the same order.
pub struct Room {
    id: RoomId,
    registry: Registry,
    config: RoomConfig,
    dispatch_gate: Mutex<()>,
}

impl Room {
    /// Create a room with default configuration.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self::with_config(id, RoomConfig::default())
    }

    /// Create a room with custom configuration.
    #[must_use]
    pub fn with_config(id: impl Into<RoomId>, config: RoomConfig) -> Self {
        let id = id.into();
        info!(room = %id, "Creating room with config: {:?}", config);
        Self {
            id,
            registry: Registry::with_name_limit(config.max_display_name_length),
            config,
            dispatch_gate: Mutex::new(()),
        }
    }

    /// Room identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Room configuration.
    #[must_use]
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// The room's registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Accept a new connection.
    ///
    /// Returns the generated connection ID and the receiving end of its
    /// delivery queue.
    #[must_use]
    pub fn connect(&self) -> (ConnectionId, OutboxReceiver) {
        let connection_id = ConnectionId::generate();
        let (tx, rx) = outbox(self.config.outbox_capacity);
        self.register(connection_id.clone(), tx);
        (connection_id, rx)
    }

    /// Register a connection with a caller-supplied delivery queue.
    pub fn register(&self, connection_id: ConnectionId, outbox: Outbox) -> bool {
        debug!(room = %self.id, connection = %connection_id, "Connected");
        self.registry.register(connection_id, outbox)
    }

    /// Apply an intent and deliver the resulting frames.
    ///
    /// Returns the total number of frames queued across all targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent was rejected. A rejected intent changes
    /// nothing and delivers nothing.
    pub fn apply(&self, connection_id: &ConnectionId, intent: Intent) -> Result<usize, RoomError> {
        let _gate = self.gate();
        let dispatches = session::transition(&self.registry, &self.config, connection_id, intent)?;
        Ok(self.deliver(dispatches))
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        // The gate guards no data, so a poisoned lock is still usable.
        self.dispatch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fan dispatches out in order. Callers hold the dispatch gate.
    fn deliver(&self, dispatches: Vec<Dispatch>) -> usize {
        let broadcaster = Broadcaster::new(&self.registry);
        dispatches
            .into_iter()
            .map(|dispatch| broadcaster.dispatch(dispatch))
            .sum()
    }

    /// Join under `display_name`.
    ///
    /// # Errors
    ///
    /// See [`Room::apply`].
    pub fn join(
        &self,
        connection_id: &ConnectionId,
        display_name: impl Into<String>,
    ) -> Result<usize, RoomError> {
        self.apply(
            connection_id,
            Intent::Join {
                display_name: display_name.into(),
            },
        )
    }

    /// Send a chat message.
    ///
    /// # Errors
    ///
    /// See [`Room::apply`].
    pub fn send_message(
        &self,
        connection_id: &ConnectionId,
        text: impl Into<String>,
    ) -> Result<usize, RoomError> {
        self.apply(connection_id, Intent::SendMessage { text: text.into() })
    }

    /// Set the typing indicator.
    ///
    /// # Errors
    ///
    /// See [`Room::apply`].
    pub fn set_typing(
        &self,
        connection_id: &ConnectionId,
        is_typing: bool,
    ) -> Result<usize, RoomError> {
        self.apply(connection_id, Intent::SetTyping { is_typing })
    }

    /// Tear down a connection. Safe to call more than once.
    ///
    /// Returns the number of frames queued if the connection had joined, or
    /// `None` if there was no session to end.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Option<usize> {
        let _gate = self.gate();
        // Disconnect never fails: an unknown connection yields no dispatches.
        let dispatches =
            session::transition(&self.registry, &self.config, connection_id, Intent::Disconnect)
                .ok()?;
        if dispatches.is_empty() {
            return None;
        }
        Some(self.deliver(dispatches))
    }

    /// Current roster, in join order.
    #[must_use]
    pub fn roster(&self) -> Vec<Member> {
        self.registry.snapshot()
    }

    /// Room statistics.
    #[must_use]
    pub fn stats(&self) -> RoomStats {
        RoomStats {
            connections: self.registry.connection_count(),
            members: self.registry.member_count(),
            typing: self.registry.typing_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lounge_protocol::ServerFrame;

    #[test]
    fn test_display_name_validation() {
        let max = RoomConfig::default().max_display_name_length;

        assert_eq!(validate_display_name(" Alice ", max).unwrap(), "Alice");
        assert!(validate_display_name("", max).is_err());
        assert!(validate_display_name(" \t ", max).is_err());

        let long_name = "a".repeat(max + 1);
        assert!(validate_display_name(&long_name, max).is_err());

        // Length counts characters, not bytes.
        let wide = "é".repeat(max);
        assert!(validate_display_name(&wide, max).is_ok());

        // Anything non-blank is a name, inner whitespace included.
        assert_eq!(validate_display_name("a\tb", max).unwrap(), "a\tb");
        assert_eq!(validate_display_name("Mary\nAnn", max).unwrap(), "Mary\nAnn");
    }

    #[test]
    fn test_room_stats() {
        let room = Room::new(DEFAULT_ROOM);
        let (a, _rx_a) = room.connect();
        let (b, _rx_b) = room.connect();
        let (_c, _rx_c) = room.connect();

        room.join(&a, "Alice").unwrap();
        room.join(&b, "Bob").unwrap();
        room.set_typing(&b, true).unwrap();

        assert_eq!(
            room.stats(),
            RoomStats {
                connections: 3,
                members: 2,
                typing: 1,
            }
        );
    }

    #[test]
    fn test_apply_counts_deliveries() {
        let room = Room::new(DEFAULT_ROOM);
        let (a, _rx_a) = room.connect();
        let (b, _rx_b) = room.connect();

        // userJoined to nobody, personal roster, room roster to a.
        assert_eq!(room.join(&a, "Alice").unwrap(), 2);
        // userJoined to a, personal roster, room roster to a and b.
        assert_eq!(room.join(&b, "Bob").unwrap(), 4);
        assert_eq!(room.send_message(&a, "hi").unwrap(), 2);
        assert_eq!(room.set_typing(&a, true).unwrap(), 1);
    }

    #[test]
    fn test_disconnect_twice() {
        let room = Room::new(DEFAULT_ROOM);
        let (a, _rx_a) = room.connect();
        let (b, mut rx_b) = room.connect();
        room.join(&a, "Alice").unwrap();
        room.join(&b, "Bob").unwrap();
        while rx_b.try_recv().is_ok() {}

        assert_eq!(room.disconnect(&a), Some(2));
        assert_eq!(room.disconnect(&a), None);
        assert!(matches!(
            rx_b.try_recv().as_deref(),
            Ok(ServerFrame::UserLeft(_))
        ));
        assert!(matches!(
            rx_b.try_recv().as_deref(),
            Ok(ServerFrame::UserList(_))
        ));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_before_join_reports_nothing() {
        let room = Room::new(DEFAULT_ROOM);
        let (a, _rx_a) = room.connect();

        assert_eq!(room.disconnect(&a), None);
        assert_eq!(room.stats().connections, 0);
    }

    #[test]
    fn test_join_accepts_tab_in_name() {
        let room = Room::new(DEFAULT_ROOM);
        let (a, _rx_a) = room.connect();

        room.join(&a, "a\tb").unwrap();
        assert_eq!(room.roster()[0].display_name, "a\tb");
    }

    #[test]
    fn test_room_name_limit_reaches_registry() {
        let room = Room::with_config(
            DEFAULT_ROOM,
            RoomConfig {
                max_display_name_length: 3,
                ..RoomConfig::default()
            },
        );
        let (a, _rx_a) = room.connect();

        assert!(matches!(
            room.join(&a, "Alice"),
            Err(RoomError::InvalidName(_))
        ));
        room.join(&a, "Al").unwrap();
    }

    #[test]
    fn test_rejected_intent_delivers_nothing() {
        let room = Room::new(DEFAULT_ROOM);
        let (a, mut rx_a) = room.connect();

        assert!(room.join(&a, "   ").is_err());
        assert!(room.send_message(&a, "hi").is_err());
        assert!(rx_a.try_recv().is_err());
        assert!(room.roster().is_empty());
    }
}
