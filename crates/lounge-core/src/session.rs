//! Per-connection session protocol.
//!
//! A connection moves `Connected -> Joined -> Gone`. Each inbound [`Intent`]
//! is applied to the registry by [`transition`], which returns the frames to
//! fan out. Roster payloads are captured right after the mutation that
//! motivated them. Delivery is left to the caller.

use crate::broadcast::{Audience, Dispatch};
use crate::connection::ConnectionId;
use crate::message::{chat_message, joined_notice, left_notice, typing_notice};
use crate::registry::Registry;
use crate::room::{RoomConfig, RoomError};
use lounge_protocol::{ClientFrame, ServerFrame};
use tracing::{debug, info};

/// Inbound intents a connection may raise after `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Enter the room under a display name.
    Join { display_name: String },
    /// Post a chat message.
    SendMessage { text: String },
    /// Toggle the typing indicator.
    SetTyping { is_typing: bool },
    /// The transport closed.
    Disconnect,
}

impl Intent {
    /// Short name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Join { .. } => "join",
            Intent::SendMessage { .. } => "send_message",
            Intent::SetTyping { .. } => "set_typing",
            Intent::Disconnect => "disconnect",
        }
    }

    /// Map a client frame onto an intent.
    ///
    /// Returns `None` for frames the transport answers itself (pings).
    #[must_use]
    pub fn from_frame(frame: ClientFrame) -> Option<Self> {
        match frame {
            ClientFrame::Join { display_name } => Some(Intent::Join { display_name }),
            ClientFrame::SendMessage { text } => Some(Intent::SendMessage { text }),
            ClientFrame::SetTyping { is_typing } => Some(Intent::SetTyping { is_typing }),
            ClientFrame::Ping { .. } => None,
        }
    }
}

/// Apply `intent` from `connection_id` to the registry.
///
/// Returns the dispatches to deliver, in order. An empty list means the
/// intent was accepted but has nothing to announce.
///
/// # Errors
///
/// - [`RoomError::InvalidName`] for a blank or oversized join name.
/// - [`RoomError::UnknownConnection`] for messages or typing updates from a
///   connection that has not joined.
/// - [`RoomError::MessageTooLong`] for oversized chat messages.
///
/// None of these change the registry or produce dispatches.
pub fn transition(
    registry: &Registry,
    config: &RoomConfig,
    connection_id: &ConnectionId,
    intent: Intent,
) -> Result<Vec<Dispatch>, RoomError> {
    match intent {
        Intent::Join { display_name } => {
            let session = registry.join(connection_id, &display_name)?;
            let roster = ServerFrame::UserList(registry.snapshot());

            info!(connection = %connection_id, name = %session.display_name, "Joined");

            Ok(vec![
                Dispatch::new(
                    Audience::RoomExcept(connection_id.clone()),
                    ServerFrame::UserJoined(joined_notice(&session.display_name)),
                ),
                Dispatch::new(Audience::Connection(connection_id.clone()), roster.clone()),
                Dispatch::new(Audience::Room, roster),
            ])
        }

        Intent::SendMessage { text } => {
            let sender = registry
                .get(connection_id)
                .ok_or_else(|| RoomError::UnknownConnection(connection_id.clone()))?;

            if text.trim().is_empty() {
                debug!(connection = %connection_id, "Ignored blank message");
                return Ok(Vec::new());
            }

            let length = text.chars().count();
            if length > config.max_message_length {
                return Err(RoomError::MessageTooLong {
                    length,
                    max: config.max_message_length,
                });
            }

            let message = chat_message(&sender, text);
            debug!(
                connection = %connection_id,
                name = %sender.display_name,
                id = message.id,
                "Message"
            );

            Ok(vec![Dispatch::new(
                Audience::Room,
                ServerFrame::ReceiveMessage(message),
            )])
        }

        Intent::SetTyping { is_typing } => {
            let session = registry
                .set_typing(connection_id, is_typing)
                .ok_or_else(|| RoomError::UnknownConnection(connection_id.clone()))?;

            debug!(connection = %connection_id, name = %session.display_name, is_typing, "Typing");

            Ok(vec![Dispatch::new(
                Audience::RoomExcept(connection_id.clone()),
                ServerFrame::UserTyping(typing_notice(&session)),
            )])
        }

        Intent::Disconnect => {
            let Some(session) = registry.remove(connection_id) else {
                debug!(connection = %connection_id, "Disconnected before joining");
                return Ok(Vec::new());
            };
            let roster = ServerFrame::UserList(registry.snapshot());

            info!(connection = %connection_id, name = %session.display_name, "Left");

            Ok(vec![
                Dispatch::new(
                    Audience::Room,
                    ServerFrame::UserLeft(left_notice(&session.display_name)),
                ),
                Dispatch::new(Audience::Room, roster),
            ])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::outbox;

    fn setup(ids: &[&str]) -> (Registry, Vec<ConnectionId>) {
        let registry = Registry::new();
        let ids = ids
            .iter()
            .map(|id| {
                let id = ConnectionId::new(*id);
                let (tx, _rx) = outbox(8);
                registry.register(id.clone(), tx);
                id
            })
            .collect();
        (registry, ids)
    }

    fn join(registry: &Registry, id: &ConnectionId, name: &str) -> Vec<Dispatch> {
        transition(
            registry,
            &RoomConfig::default(),
            id,
            Intent::Join {
                display_name: name.to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_join_dispatch_plan() {
        let (registry, ids) = setup(&["x", "y"]);
        join(&registry, &ids[0], "Alice");

        let plan = join(&registry, &ids[1], "Bob");
        assert_eq!(plan.len(), 3);

        assert_eq!(plan[0].audience, Audience::RoomExcept(ids[1].clone()));
        match &plan[0].frame {
            ServerFrame::UserJoined(notice) => assert_eq!(notice.display_name, "Bob"),
            other => panic!("Expected userJoined, got {:?}", other),
        }

        assert_eq!(plan[1].audience, Audience::Connection(ids[1].clone()));
        assert_eq!(plan[2].audience, Audience::Room);
        assert_eq!(plan[1].frame, plan[2].frame);
        match &plan[2].frame {
            ServerFrame::UserList(roster) => {
                let names: Vec<_> = roster.iter().map(|m| m.display_name.as_str()).collect();
                assert_eq!(names, ["Alice", "Bob"]);
            }
            other => panic!("Expected userList, got {:?}", other),
        }
    }

    #[test]
    fn test_join_trims_name() {
        let (registry, ids) = setup(&["x"]);
        join(&registry, &ids[0], "  Alice ");
        assert_eq!(registry.get(&ids[0]).unwrap().display_name, "Alice");
    }

    #[test]
    fn test_invalid_name_changes_nothing() {
        let (registry, ids) = setup(&["x"]);
        let config = RoomConfig::default();
        let long = "n".repeat(config.max_display_name_length + 1);

        for name in ["", "   ", long.as_str()] {
            let result = transition(
                &registry,
                &config,
                &ids[0],
                Intent::Join {
                    display_name: name.to_string(),
                },
            );
            assert!(matches!(result, Err(RoomError::InvalidName(_))));
        }
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_message_before_join_is_unknown() {
        let (registry, ids) = setup(&["x"]);
        let result = transition(
            &registry,
            &RoomConfig::default(),
            &ids[0],
            Intent::SendMessage {
                text: "hi".to_string(),
            },
        );
        assert!(matches!(result, Err(RoomError::UnknownConnection(_))));

        let result = transition(
            &registry,
            &RoomConfig::default(),
            &ids[0],
            Intent::SetTyping { is_typing: true },
        );
        assert!(matches!(result, Err(RoomError::UnknownConnection(_))));
    }

    #[test]
    fn test_blank_message_is_ignored() {
        let (registry, ids) = setup(&["x"]);
        join(&registry, &ids[0], "Alice");

        for text in ["", "   ", "\n\t"] {
            let plan = transition(
                &registry,
                &RoomConfig::default(),
                &ids[0],
                Intent::SendMessage {
                    text: text.to_string(),
                },
            )
            .unwrap();
            assert!(plan.is_empty());
        }
    }

    #[test]
    fn test_message_keeps_text_verbatim() {
        let (registry, ids) = setup(&["x"]);
        join(&registry, &ids[0], "Alice");

        let plan = transition(
            &registry,
            &RoomConfig::default(),
            &ids[0],
            Intent::SendMessage {
                text: " hi ".to_string(),
            },
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].audience, Audience::Room);
        match &plan[0].frame {
            ServerFrame::ReceiveMessage(message) => {
                assert_eq!(message.text, " hi ");
                assert_eq!(message.sender_display_name, "Alice");
                assert_eq!(message.sender_connection_id, "x");
            }
            other => panic!("Expected receiveMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_message_rejected() {
        let (registry, ids) = setup(&["x"]);
        join(&registry, &ids[0], "Alice");
        let config = RoomConfig {
            max_message_length: 4,
            ..RoomConfig::default()
        };

        let result = transition(
            &registry,
            &config,
            &ids[0],
            Intent::SendMessage {
                text: "hello".to_string(),
            },
        );
        assert!(matches!(
            result,
            Err(RoomError::MessageTooLong { length: 5, max: 4 })
        ));
    }

    #[test]
    fn test_disconnect_before_join_is_noop() {
        let (registry, ids) = setup(&["x"]);
        let plan =
            transition(&registry, &RoomConfig::default(), &ids[0], Intent::Disconnect).unwrap();
        assert!(plan.is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_announces_to_remaining_room() {
        let (registry, ids) = setup(&["x", "y"]);
        join(&registry, &ids[0], "Alice");
        join(&registry, &ids[1], "Bob");

        let plan =
            transition(&registry, &RoomConfig::default(), &ids[0], Intent::Disconnect).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(matches!(&plan[0].frame, ServerFrame::UserLeft(n) if n.display_name == "Alice"));
        match &plan[1].frame {
            ServerFrame::UserList(roster) => {
                assert_eq!(roster.len(), 1);
                assert_eq!(roster[0].display_name, "Bob");
            }
            other => panic!("Expected userList, got {:?}", other),
        }
    }

    #[test]
    fn test_intent_from_frame() {
        assert_eq!(
            Intent::from_frame(ClientFrame::join("Alice")),
            Some(Intent::Join {
                display_name: "Alice".to_string()
            })
        );
        assert_eq!(Intent::from_frame(ClientFrame::Ping { timestamp: None }), None);
    }
}
