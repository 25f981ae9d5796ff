//! Room fan-out.
//!
//! The broadcaster holds no state of its own. It resolves an [`Audience`]
//! against the registry at delivery time and hands one shared frame to every
//! target's outbox. Delivery is best-effort: a target that is gone or not
//! keeping up is skipped and the remaining targets still receive the frame.

use crate::connection::{deliver, ConnectionId, DeliveryError, Outbox};
use crate::registry::Registry;
use lounge_protocol::ServerFrame;
use std::sync::Arc;
use tracing::{debug, trace};

/// Who receives a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every joined connection.
    Room,
    /// Every joined connection except one.
    RoomExcept(ConnectionId),
    /// A single registered connection, joined or not.
    Connection(ConnectionId),
}

/// A frame paired with its audience.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Target set.
    pub audience: Audience,
    /// Frame to deliver.
    pub frame: ServerFrame,
}

impl Dispatch {
    /// Create a new dispatch.
    #[must_use]
    pub fn new(audience: Audience, frame: ServerFrame) -> Self {
        Self { audience, frame }
    }
}

/// Fan-out over a registry.
pub struct Broadcaster<'a> {
    registry: &'a Registry,
}

impl<'a> Broadcaster<'a> {
    /// Create a broadcaster over `registry`.
    #[must_use]
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Deliver to every joined connection.
    ///
    /// Returns the number of connections the frame was queued for.
    pub fn to_room(&self, frame: ServerFrame) -> usize {
        self.fan_out(self.registry.member_outboxes(None), frame)
    }

    /// Deliver to every joined connection except `exclude`.
    pub fn to_room_except(&self, exclude: &ConnectionId, frame: ServerFrame) -> usize {
        self.fan_out(self.registry.member_outboxes(Some(exclude)), frame)
    }

    /// Deliver to a single connection.
    pub fn to_connection(&self, connection_id: &ConnectionId, frame: ServerFrame) -> usize {
        match self.registry.outbox(connection_id) {
            Some(outbox) => self.fan_out(vec![(connection_id.clone(), outbox)], frame),
            None => {
                debug!(
                    connection = %connection_id,
                    event = frame.event_name(),
                    error = %DeliveryError::NotConnected,
                    "Dropped frame"
                );
                0
            }
        }
    }

    /// Deliver a planned dispatch.
    pub fn dispatch(&self, dispatch: Dispatch) -> usize {
        match dispatch.audience {
            Audience::Room => self.to_room(dispatch.frame),
            Audience::RoomExcept(ref exclude) => self.to_room_except(exclude, dispatch.frame),
            Audience::Connection(ref target) => self.to_connection(target, dispatch.frame),
        }
    }

    fn fan_out(&self, targets: Vec<(ConnectionId, Outbox)>, frame: ServerFrame) -> usize {
        let event = frame.event_name();
        let frame = Arc::new(frame);

        let delivered = targets
            .iter()
            .filter(|(connection_id, outbox)| match deliver(outbox, Arc::clone(&frame)) {
                Ok(()) => true,
                Err(e) => {
                    debug!(connection = %connection_id, event, error = %e, "Dropped frame");
                    false
                }
            })
            .count();

        trace!(event, targets = targets.len(), delivered, "Fanned out");
        delivered
    }
}
