//! User-initiated reports.
//!
//! A report is either a `!report` command sent as a reply to the offending
//! message, or a 🚨 reaction on it. The reported message's sender is muted,
//! the reporter gets an acknowledgement, and, when a notification room is
//! configured, moderators get an alert followed by a quote of the message.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::command::is_report_command;
use crate::config::ModerationConfig;

use super::event::{EventKind, IncomingEvent, UserId};
use super::messenger::{quote, render, EventLookup, Messenger, Placeholder, Substitutions};
use super::moderator::{mute_or_explain, ModerationError, Moderator};

/// Reaction key that files a report.
pub const REPORT_REACTION_KEY: &str = "🚨";

/// Emoji presentation selector some clients append to reaction keys.
const VARIATION_SELECTOR: char = '\u{fe0f}';

/// How a report was filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportTrigger {
    /// `!report` in reply to the message.
    Command,
    /// A 🚨 reaction on the message.
    Reaction,
}

/// Whether `event` files a report, and how.
pub fn report_trigger(event: &IncomingEvent) -> Option<ReportTrigger> {
    match &event.kind {
        EventKind::TextMessage | EventKind::EmoteMessage => event
            .body
            .as_deref()
            .filter(|body| is_report_command(body))
            .map(|_| ReportTrigger::Command),
        EventKind::Reaction => event
            .reaction_key
            .as_deref()
            .map(|key| key.trim_end_matches(VARIATION_SELECTOR))
            .filter(|key| *key == REPORT_REACTION_KEY)
            .map(|_| ReportTrigger::Reaction),
        EventKind::Other(_) => None,
    }
}

/// What happened to the moderator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationOutcome {
    /// No notification room is configured.
    NotConfigured,
    /// Alert and quote were both delivered.
    Sent,
    /// Delivery failed; the failure was logged.
    Failed,
}

/// Result of handling one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub trigger: ReportTrigger,
    pub reported_user: UserId,
    pub reporter: UserId,
    pub mute: Result<(), ModerationError>,
    /// Whether the acknowledgement reply was delivered.
    pub acknowledged: bool,
    pub notification: NotificationOutcome,
}

pub struct ReportWorkflow {
    lookup: Arc<dyn EventLookup>,
    messenger: Arc<dyn Messenger>,
    moderator: Arc<dyn Moderator>,
    bot_user: UserId,
}

impl ReportWorkflow {
    pub fn new(
        lookup: Arc<dyn EventLookup>,
        messenger: Arc<dyn Messenger>,
        moderator: Arc<dyn Moderator>,
        bot_user: UserId,
    ) -> Self {
        Self {
            lookup,
            messenger,
            moderator,
            bot_user,
        }
    }

    /// Handle `event` if it files a report.
    ///
    /// Returns `None` when the event is not a report or the reported message
    /// cannot be resolved; nothing is sent in that case.
    pub async fn handle(
        &self,
        config: &ModerationConfig,
        event: &IncomingEvent,
    ) -> Option<ReportOutcome> {
        let trigger = report_trigger(event)?;

        if event.sender.same_user(&self.bot_user) {
            return None;
        }

        let Some(target_id) = event.reply_target.as_ref() else {
            debug!(
                "Report {} from {} does not point at a message",
                event.event_id, event.sender
            );
            return None;
        };

        let target = match self.lookup.get_event(&event.room_id, target_id).await {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    "Could not resolve reported event {} in {}: {}",
                    target_id, event.room_id, e
                );
                return None;
            }
        };

        if target.sender.same_user(&self.bot_user) {
            debug!("Ignoring report of the bot's own message {}", target_id);
            return None;
        }

        info!(
            "{} reported {} from {} in {} ({:?})",
            event.sender, target.event_id, target.sender, event.room_id, trigger
        );

        // A reaction is not something clients render replies to, so answer
        // on the reported message instead.
        let respond_to = match trigger {
            ReportTrigger::Command => event,
            ReportTrigger::Reaction => &target,
        };

        let mute = mute_or_explain(
            self.moderator.as_ref(),
            self.messenger.as_ref(),
            respond_to,
            &event.room_id,
            &target.sender,
        )
        .await;

        let acknowledgement = render(
            &config.message_report,
            &Substitutions::new()
                .mention(Placeholder::User, target.sender.as_str())
                .mention(Placeholder::Reporter, event.sender.as_str()),
        );
        let acknowledged = match self.messenger.reply(respond_to, &acknowledgement).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Failed to acknowledge report {} in {}: {}",
                    event.event_id, event.room_id, e
                );
                false
            }
        };

        let notification = self.notify_moderators(config, event, &target).await;

        Some(ReportOutcome {
            trigger,
            reported_user: target.sender,
            reporter: event.sender.clone(),
            mute,
            acknowledged,
            notification,
        })
    }

    async fn notify_moderators(
        &self,
        config: &ModerationConfig,
        report: &IncomingEvent,
        target: &IncomingEvent,
    ) -> NotificationOutcome {
        let Some(room) = config.notification_room() else {
            return NotificationOutcome::NotConfigured;
        };

        let alert = render(
            &config.message_notify,
            &Substitutions::new()
                .text(Placeholder::Room, report.room_id.as_str())
                .mention(Placeholder::User, target.sender.as_str())
                .mention(Placeholder::Reporter, report.sender.as_str()),
        );
        if let Err(e) = self.messenger.send(&room, &alert).await {
            error!("Failed to notify moderators in {}: {}", room, e);
            return NotificationOutcome::Failed;
        }

        let quoted = quote(target.body.as_deref().unwrap_or_default());
        if let Err(e) = self.messenger.send(&room, &quoted).await {
            error!("Failed to send reported message to {}: {}", room, e);
            return NotificationOutcome::Failed;
        }

        NotificationOutcome::Sent
    }
}
