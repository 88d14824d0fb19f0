//! Identity newtypes and the protocol-neutral inbound event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype for a Matrix user id (`@localpart:server`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form used as the warning-store key.
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }

    /// Case-insensitive identity comparison.
    pub fn same_user(&self, other: &UserId) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a Matrix room id (`!opaque:server`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a Matrix event id (`$opaque`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of event arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// `m.room.message` with `msgtype: m.text`.
    TextMessage,
    /// `m.room.message` with `msgtype: m.emote`.
    EmoteMessage,
    /// `m.reaction` annotation.
    Reaction,
    /// Any other message type (`m.notice`, `m.image`, ...), carrying the raw type.
    Other(String),
}

impl EventKind {
    /// Whether keyword moderation applies to this kind.
    pub fn is_moderated_message(&self) -> bool {
        matches!(self, EventKind::TextMessage | EventKind::EmoteMessage)
    }
}

/// An inbound event as the moderation core sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub kind: EventKind,
    /// Message text; `None` for reactions and bodiless events.
    pub body: Option<String>,
    /// Event this one replies to, or the event a reaction annotates.
    pub reply_target: Option<EventId>,
    /// Annotation key of a reaction.
    pub reaction_key: Option<String>,
}

impl IncomingEvent {
    /// A plain text message, mainly for tests and fixtures.
    pub fn text(
        event_id: impl Into<EventId>,
        room_id: impl Into<RoomId>,
        sender: impl Into<UserId>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            room_id: room_id.into(),
            sender: sender.into(),
            kind: EventKind::TextMessage,
            body: Some(body.into()),
            reply_target: None,
            reaction_key: None,
        }
    }

    /// A reaction annotating `target`.
    pub fn reaction(
        event_id: impl Into<EventId>,
        room_id: impl Into<RoomId>,
        sender: impl Into<UserId>,
        target: impl Into<EventId>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            room_id: room_id.into(),
            sender: sender.into(),
            kind: EventKind::Reaction,
            body: None,
            reply_target: Some(target.into()),
            reaction_key: Some(key.into()),
        }
    }

    /// Mark this event as a reply to `target`.
    pub fn replying_to(mut self, target: impl Into<EventId>) -> Self {
        self.reply_target = Some(target.into());
        self
    }
}
