//! Privilege changes on a room.
//!
//! # Known limitation
//!
//! Muting is a read-modify-write of the room's whole power-level state: the
//! current map is fetched, one entry changed, and the full map written back.
//! A privilege change made by someone else between the read and the write is
//! lost. The protocol offers no compare-and-swap for state events.

use async_trait::async_trait;
use std::fmt;
use tracing::{error, warn};

use awareness_core::RenderedMessage;

use super::event::{IncomingEvent, RoomId, UserId};
use super::messenger::{Messenger, TransportError};

/// Reply sent when the bot lacks the power to change power levels.
pub const PERMISSION_FAILURE_TEXT: &str =
    "I don't seem to have permission to update power levels";

/// Reply sent when the power-level update failed for any other reason.
pub const TRANSPORT_FAILURE_TEXT: &str =
    "Failed to update power levels (see logs for more details)";

/// Why a mute did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationError {
    /// The bot's own power level is too low.
    Permission(String),
    /// Any other failure talking to the homeserver.
    Transport(TransportError),
}

impl ModerationError {
    /// The text shown to room members for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            ModerationError::Permission(_) => PERMISSION_FAILURE_TEXT,
            ModerationError::Transport(_) => TRANSPORT_FAILURE_TEXT,
        }
    }
}

impl fmt::Display for ModerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModerationError::Permission(msg) => write!(f, "permission denied: {}", msg),
            ModerationError::Transport(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ModerationError {}

impl From<TransportError> for ModerationError {
    fn from(err: TransportError) -> Self {
        ModerationError::Transport(err)
    }
}

/// Applies privilege changes to rooms.
#[async_trait]
pub trait Moderator: Send + Sync {
    /// Drop the user below the room's baseline power level.
    ///
    /// Always issues the update, even if the user is already muted.
    async fn mute(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ModerationError>;
}

/// Mute `user_id` and, on failure, tell the room by replying to `reply_to`.
///
/// The failure is returned so callers can record it, but it never aborts the
/// caller's remaining work.
pub(crate) async fn mute_or_explain(
    moderator: &dyn Moderator,
    messenger: &dyn Messenger,
    reply_to: &IncomingEvent,
    room_id: &RoomId,
    user_id: &UserId,
) -> Result<(), ModerationError> {
    let result = moderator.mute(room_id, user_id).await;

    if let Err(err) = &result {
        match err {
            ModerationError::Permission(_) => {
                warn!("Cannot mute {} in {}: {}", user_id, room_id, err)
            }
            ModerationError::Transport(_) => {
                error!("Failed to mute {} in {}: {}", user_id, room_id, err)
            }
        }

        let notice = RenderedMessage::plain(err.user_message());
        if let Err(e) = messenger.reply(reply_to, &notice).await {
            error!(
                "Failed to tell {} about the failed mute: {}",
                reply_to.room_id, e
            );
        }
    }

    result
}
