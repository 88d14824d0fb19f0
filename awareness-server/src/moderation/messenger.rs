//! Outbound messaging abstraction.
//!
//! Rendering lives in [`awareness_core::template`] and is pure; implementations
//! of [`Messenger`] only deliver already-rendered content. Failures are
//! returned to the caller and never retried here.

use async_trait::async_trait;
use std::fmt;

use awareness_core::RenderedMessage;

use super::event::{EventId, IncomingEvent, RoomId};

pub use awareness_core::template::{quote, render, Placeholder, Substitutions};

/// A transport request failed (network, homeserver error, bad response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub operation: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Sends rendered messages into rooms.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a standalone message to a room.
    async fn send(
        &self,
        room_id: &RoomId,
        content: &RenderedMessage,
    ) -> Result<EventId, TransportError>;

    /// Send a message into the original event's room as a reply to it.
    async fn reply(
        &self,
        original: &IncomingEvent,
        content: &RenderedMessage,
    ) -> Result<EventId, TransportError>;
}

/// Looks up a single event by id.
#[async_trait]
pub trait EventLookup: Send + Sync {
    async fn get_event(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> Result<IncomingEvent, TransportError>;
}
