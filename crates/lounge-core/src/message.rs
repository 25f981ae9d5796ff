//! Chat message identity and event payload construction.

use crate::registry::Session;
use lounge_protocol::{ChatMessage, PresenceNotice, TypingNotice};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// Low bits reserved for same-millisecond tiebreaks.
const COUNTER_BITS: u32 = 12;

/// Last ID handed out.
static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Current time in Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a strictly increasing message ID.
///
/// The upper bits are the creation time in milliseconds. Two IDs issued in
/// the same millisecond (or after the clock steps back) are bumped past the
/// previous one, so IDs never repeat within a process. They stay below 2^53
/// until 2039, which keeps them exact in JavaScript clients.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let candidate = now_millis() << COUNTER_BITS;
    let previous = match LAST_ID.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
        Some(candidate.max(last + 1))
    }) {
        Ok(prev) | Err(prev) => prev,
    };
    candidate.max(previous + 1)
}

/// Build a chat message sent by `sender`.
#[must_use]
pub fn chat_message(sender: &Session, text: impl Into<String>) -> ChatMessage {
    ChatMessage {
        id: generate_message_id(),
        text: text.into(),
        sender_display_name: sender.display_name.clone(),
        sender_connection_id: sender.connection_id.to_string(),
        timestamp: now_millis(),
    }
}

/// Build the notice announcing that `display_name` joined.
#[must_use]
pub fn joined_notice(display_name: &str) -> PresenceNotice {
    PresenceNotice {
        display_name: display_name.to_string(),
        message: format!("{} joined the chat", display_name),
        timestamp: now_millis(),
    }
}

/// Build the notice announcing that `display_name` left.
#[must_use]
pub fn left_notice(display_name: &str) -> PresenceNotice {
    PresenceNotice {
        display_name: display_name.to_string(),
        message: format!("{} left the chat", display_name),
        timestamp: now_millis(),
    }
}

/// Build a typing notice for `session`'s current flag.
#[must_use]
pub fn typing_notice(session: &Session) -> TypingNotice {
    TypingNotice {
        display_name: session.display_name.clone(),
        is_typing: session.is_typing,
    }
}
