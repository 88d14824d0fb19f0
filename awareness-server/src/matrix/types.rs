//! Wire types for the parts of the client-server API the bot uses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use awareness_core::RenderedMessage;

use crate::moderation::{EventId, EventKind, IncomingEvent, RoomId, TransportError, UserId};

/// Power level given to muted users. Below the default of 0, so the user
/// can no longer send messages in rooms with `events_default: 0`.
pub const MUTED_POWER_LEVEL: i64 = -1;

pub const EVENT_TYPE_MESSAGE: &str = "m.room.message";
pub const EVENT_TYPE_REACTION: &str = "m.reaction";
pub const EVENT_TYPE_POWER_LEVELS: &str = "m.room.power_levels";

#[derive(Debug, Deserialize)]
pub struct WhoAmIResponse {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendResponse {
    pub event_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub errcode: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
}

#[derive(Debug, Default, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
    /// Invite state is not inspected, only the room ids are used.
    #[serde(default)]
    pub invite: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub limited: bool,
}

/// A room event as delivered by `/sync` or `/rooms/{room}/event/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: String,
    pub sender: String,
    #[serde(default)]
    pub content: Value,
    /// Present on single-event lookups, absent in sync timelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageContent {
    msgtype: Option<String>,
    body: Option<String>,
    #[serde(rename = "m.relates_to")]
    relates_to: Option<RelatesTo>,
}

#[derive(Debug, Default, Deserialize)]
struct RelatesTo {
    rel_type: Option<String>,
    event_id: Option<String>,
    key: Option<String>,
    #[serde(rename = "m.in_reply_to")]
    in_reply_to: Option<InReplyTo>,
}

#[derive(Debug, Deserialize)]
struct InReplyTo {
    event_id: String,
}

impl RawEvent {
    /// Convert into the moderation core's event.
    ///
    /// Returns `None` for event types the bot does not handle and for
    /// redacted or malformed content.
    pub fn into_incoming(self, room_id: &RoomId) -> Option<IncomingEvent> {
        let content: MessageContent = serde_json::from_value(self.content).ok()?;
        let relates_to = content.relates_to.unwrap_or_default();

        let (kind, body, reply_target, reaction_key) = match self.event_type.as_str() {
            EVENT_TYPE_MESSAGE => {
                let kind = match content.msgtype?.as_str() {
                    "m.text" => EventKind::TextMessage,
                    "m.emote" => EventKind::EmoteMessage,
                    other => EventKind::Other(other.to_string()),
                };
                let reply_target = relates_to.in_reply_to.map(|r| EventId(r.event_id));
                (kind, content.body, reply_target, None)
            }
            EVENT_TYPE_REACTION => {
                if relates_to.rel_type.as_deref() != Some("m.annotation") {
                    return None;
                }
                let target = relates_to.event_id?;
                (
                    EventKind::Reaction,
                    None,
                    Some(EventId(target)),
                    Some(relates_to.key?),
                )
            }
            _ => return None,
        };

        Some(IncomingEvent {
            event_id: EventId(self.event_id),
            room_id: room_id.clone(),
            sender: UserId(self.sender),
            kind,
            body,
            reply_target,
            reaction_key,
        })
    }
}

/// `m.room.message` content for a rendered message, optionally as a reply.
pub fn message_content(message: &RenderedMessage, in_reply_to: Option<&EventId>) -> Value {
    let mut content = json!({
        "msgtype": "m.text",
        "body": message.body,
        "format": "org.matrix.custom.html",
        "formatted_body": message.formatted_body,
    });
    if let Some(event_id) = in_reply_to {
        content["m.relates_to"] = json!({
            "m.in_reply_to": { "event_id": event_id.as_str() }
        });
    }
    content
}

/// Set `user_id` to [`MUTED_POWER_LEVEL`] in a `m.room.power_levels` content.
///
/// Every other field is left untouched so the full state can be written back.
pub fn apply_mute(levels: &mut Value, user_id: &UserId) -> Result<(), TransportError> {
    let Some(object) = levels.as_object_mut() else {
        return Err(TransportError::new(
            "set power levels",
            "power levels content is not an object",
        ));
    };

    let users = object
        .entry("users")
        .or_insert_with(|| Value::Object(Default::default()));
    let Some(users) = users.as_object_mut() else {
        return Err(TransportError::new(
            "set power levels",
            "power levels `users` is not an object",
        ));
    };

    users.insert(user_id.0.clone(), json!(MUTED_POWER_LEVEL));
    Ok(())
}

/// Sync filter limiting timelines to the event types the bot handles.
pub fn sync_filter() -> Value {
    json!({
        "presence": { "types": [] },
        "account_data": { "types": [] },
        "room": {
            "state": { "lazy_load_members": true },
            "ephemeral": { "types": [] },
            "account_data": { "types": [] },
            "timeline": { "types": [EVENT_TYPE_MESSAGE, EVENT_TYPE_REACTION] }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::from("!room:example.org")
    }

    fn raw(value: Value) -> RawEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_message() {
        let event = raw(json!({
            "type": "m.room.message",
            "event_id": "$1",
            "sender": "@bob:example.org",
            "origin_server_ts": 1,
            "content": { "msgtype": "m.text", "body": "hello" }
        }))
        .into_incoming(&room())
        .unwrap();

        assert_eq!(event.kind, EventKind::TextMessage);
        assert_eq!(event.body.as_deref(), Some("hello"));
        assert_eq!(event.sender, UserId::from("@bob:example.org"));
        assert_eq!(event.room_id, room());
        assert_eq!(event.reply_target, None);
    }

    #[test]
    fn test_reply_carries_target() {
        let event = raw(json!({
            "type": "m.room.message",
            "event_id": "$2",
            "sender": "@carol:example.org",
            "content": {
                "msgtype": "m.text",
                "body": "> <@bob:example.org> hello\n\n!report",
                "m.relates_to": { "m.in_reply_to": { "event_id": "$1" } }
            }
        }))
        .into_incoming(&room())
        .unwrap();

        assert_eq!(event.reply_target, Some(EventId::from("$1")));
    }

    #[test]
    fn test_emote_and_other_msgtypes() {
        let emote = raw(json!({
            "type": "m.room.message", "event_id": "$1", "sender": "@a:x",
            "content": { "msgtype": "m.emote", "body": "waves" }
        }))
        .into_incoming(&room())
        .unwrap();
        assert_eq!(emote.kind, EventKind::EmoteMessage);

        let notice = raw(json!({
            "type": "m.room.message", "event_id": "$2", "sender": "@a:x",
            "content": { "msgtype": "m.notice", "body": "beep" }
        }))
        .into_incoming(&room())
        .unwrap();
        assert_eq!(notice.kind, EventKind::Other("m.notice".to_string()));
    }

    #[test]
    fn test_reaction() {
        let event = raw(json!({
            "type": "m.reaction",
            "event_id": "$3",
            "sender": "@carol:example.org",
            "content": {
                "m.relates_to": { "rel_type": "m.annotation", "event_id": "$1", "key": "🚨" }
            }
        }))
        .into_incoming(&room())
        .unwrap();

        assert_eq!(event.kind, EventKind::Reaction);
        assert_eq!(event.reply_target, Some(EventId::from("$1")));
        assert_eq!(event.reaction_key.as_deref(), Some("🚨"));
        assert_eq!(event.body, None);
    }

    #[test]
    fn test_unhandled_and_redacted_events() {
        let member = raw(json!({
            "type": "m.room.member", "event_id": "$1", "sender": "@a:x",
            "content": { "membership": "join" }
        }));
        assert!(member.into_incoming(&room()).is_none());

        let redacted = raw(json!({
            "type": "m.room.message", "event_id": "$2", "sender": "@a:x", "content": {}
        }));
        assert!(redacted.into_incoming(&room()).is_none());

        let no_content = raw(json!({
            "type": "m.room.message", "event_id": "$3", "sender": "@a:x"
        }));
        assert!(no_content.into_incoming(&room()).is_none());
    }

    #[test]
    fn test_message_content_reply() {
        let message = RenderedMessage {
            body: "hi @bob:x".to_string(),
            formatted_body: "hi <a href='https://matrix.to/#/@bob:x'>@bob:x</a>".to_string(),
        };
        let content = message_content(&message, Some(&EventId::from("$1")));
        assert_eq!(
            content,
            json!({
                "msgtype": "m.text",
                "body": "hi @bob:x",
                "format": "org.matrix.custom.html",
                "formatted_body": "hi <a href='https://matrix.to/#/@bob:x'>@bob:x</a>",
                "m.relates_to": { "m.in_reply_to": { "event_id": "$1" } }
            })
        );
    }

    #[test]
    fn test_message_content_without_reply() {
        let content = message_content(&RenderedMessage::plain("hi"), None);
        assert!(content.get("m.relates_to").is_none());
        assert_eq!(content["msgtype"], "m.text");
    }

    #[test]
    fn test_apply_mute_preserves_other_fields() {
        let mut levels = json!({
            "users": { "@admin:x": 100, "@bob:x": 0 },
            "users_default": 0,
            "events_default": 0,
            "ban": 50
        });
        apply_mute(&mut levels, &UserId::from("@bob:x")).unwrap();

        assert_eq!(
            levels,
            json!({
                "users": { "@admin:x": 100, "@bob:x": -1 },
                "users_default": 0,
                "events_default": 0,
                "ban": 50
            })
        );
    }

    #[test]
    fn test_apply_mute_creates_users_map() {
        let mut levels = json!({ "users_default": 0 });
        apply_mute(&mut levels, &UserId::from("@bob:x")).unwrap();
        assert_eq!(levels["users"]["@bob:x"], -1);
    }

    #[test]
    fn test_apply_mute_rejects_malformed_content() {
        let mut levels = json!([1, 2]);
        assert!(apply_mute(&mut levels, &UserId::from("@bob:x")).is_err());

        let mut levels = json!({ "users": "nope" });
        assert!(apply_mute(&mut levels, &UserId::from("@bob:x")).is_err());
    }

    #[test]
    fn test_sync_response_defaults() {
        let sync: SyncResponse = serde_json::from_value(json!({ "next_batch": "s1" })).unwrap();
        assert_eq!(sync.next_batch, "s1");
        assert!(sync.rooms.join.is_empty());
        assert!(sync.rooms.invite.is_empty());
    }
}
