//! # lounge-core
//!
//! Presence tracking, session protocol and message fan-out for a single
//! real-time chat room.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Live connections and their sessions, in join order
//! - **Session** - The `connect -> join -> {message, typing}* -> disconnect` state machine
//! - **Broadcaster** - Stateless fan-out to the room, the room minus one, or one connection
//! - **Room** - Ties the three together behind one entry point
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Session   │────▶│ Broadcaster │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   │
//!                     ┌─────────────┐            │
//!                     │  Registry   │◀───────────┘
//!                     └─────────────┘
//! ```

pub mod broadcast;
pub mod connection;
pub mod message;
pub mod registry;
pub mod room;
pub mod session;

pub use broadcast::{Audience, Broadcaster, Dispatch};
pub use connection::{ConnectionId, DeliveryError, Outbox, OutboxReceiver};
pub use message::{generate_message_id, MessageId};
pub use registry::{ConnectionState, Registry, Session};
pub use room::{Room, RoomConfig, RoomError, RoomId, RoomStats, DEFAULT_ROOM};
pub use session::Intent;
