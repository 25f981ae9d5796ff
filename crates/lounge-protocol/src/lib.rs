//! # lounge-protocol
//!
//! Wire protocol definitions for the Lounge chat room engine.
//!
//! ## Frames
//!
//! Clients send intents:
//!
//! - `join` - Enter the room under a display name
//! - `sendMessage` - Post a chat message
//! - `setTyping` - Toggle the typing indicator
//!
//! The server emits events:
//!
//! - `userJoined` / `userLeft` - Presence notices
//! - `userList` - Full roster snapshot in join order
//! - `receiveMessage` - Chat message, delivered to the sender too
//! - `userTyping` - Typing indicator of another member
//!
//! ## Example
//!
//! ```rust
//! use lounge_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::send_message("Hello, world!");
//!
//! let text = codec::encode_json(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode_json(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_json, encode, encode_json, Encoding, ProtocolError};
pub use frames::{
    error_codes, ChatMessage, ClientFrame, Member, PresenceNotice, ServerFrame, TypingNotice,
    PROTOCOL_VERSION,
};
