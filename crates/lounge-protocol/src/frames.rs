//! Frame types for the Lounge protocol.
//!
//! Every frame is an adjacently tagged envelope: `{"event": <name>, "data": <payload>}`.
//! Clients send [`ClientFrame`]s (intents), the server answers with [`ServerFrame`]s
//! (events). Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Current protocol version, reported in [`ServerFrame::Connected`].
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`ServerFrame::Error`].
pub mod error_codes {
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 4000;
    /// The frame exceeded the configured size limit.
    pub const FRAME_TOO_LARGE: u16 = 4001;
}

/// Public view of a joined member, as carried in a roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Connection the member joined on.
    pub connection_id: String,
    /// Name chosen at join.
    pub display_name: String,
    /// Whether the member is currently typing.
    pub is_typing: bool,
}

/// A "joined" / "left" notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    /// Name of the member the notice is about.
    pub display_name: String,
    /// Human-readable text, e.g. "Alice joined the chat".
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

/// A chat message fanned out to the whole room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Strictly increasing message id.
    pub id: u64,
    /// Message text as sent.
    pub text: String,
    /// Display name of the sender at send time.
    pub sender_display_name: String,
    /// Connection of the sender at send time.
    pub sender_connection_id: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

/// Typing indicator for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    /// Name of the member typing.
    pub display_name: String,
    /// New typing state.
    pub is_typing: bool,
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Join the room under a display name.
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "displayName")]
        display_name: String,
    },

    /// Send a chat message to the room.
    #[serde(rename = "sendMessage")]
    SendMessage { text: String },

    /// Set the typing indicator.
    #[serde(rename = "setTyping")]
    SetTyping {
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// Application-level keepalive.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    /// First frame on every connection.
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
        version: u8,
    },

    /// Someone else joined.
    #[serde(rename = "userJoined")]
    UserJoined(PresenceNotice),

    /// Full roster snapshot, in join order.
    #[serde(rename = "userList")]
    UserList(Vec<Member>),

    /// A chat message.
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(ChatMessage),

    /// Someone else started or stopped typing.
    #[serde(rename = "userTyping")]
    UserTyping(TypingNotice),

    /// Someone left.
    #[serde(rename = "userLeft")]
    UserLeft(PresenceNotice),

    /// Reply to [`ClientFrame::Ping`].
    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// The previous client frame was rejected by the transport layer.
    #[serde(rename = "error")]
    Error { code: u16, message: String },
}

impl ClientFrame {
    /// Wire name of the frame.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientFrame::Join { .. } => "join",
            ClientFrame::SendMessage { .. } => "sendMessage",
            ClientFrame::SetTyping { .. } => "setTyping",
            ClientFrame::Ping { .. } => "ping",
        }
    }

    /// Create a Join frame.
    #[must_use]
    pub fn join(display_name: impl Into<String>) -> Self {
        ClientFrame::Join {
            display_name: display_name.into(),
        }
    }

    /// Create a SendMessage frame.
    #[must_use]
    pub fn send_message(text: impl Into<String>) -> Self {
        ClientFrame::SendMessage { text: text.into() }
    }

    /// Create a SetTyping frame.
    #[must_use]
    pub fn set_typing(is_typing: bool) -> Self {
        ClientFrame::SetTyping { is_typing }
    }
}

impl ServerFrame {
    /// Wire name of the frame.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::UserJoined(_) => "userJoined",
            ServerFrame::UserList(_) => "userList",
            ServerFrame::ReceiveMessage(_) => "receiveMessage",
            ServerFrame::UserTyping(_) => "userTyping",
            ServerFrame::UserLeft(_) => "userLeft",
            ServerFrame::Pong { .. } => "pong",
            ServerFrame::Error { .. } => "error",
        }
    }

    /// Create a Connected frame for the current protocol version.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>) -> Self {
        ServerFrame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerFrame::Pong { timestamp }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }
}
