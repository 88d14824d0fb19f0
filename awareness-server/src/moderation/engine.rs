//! Keyword moderation of room messages.
//!
//! Each configured keyword is matched as a case-insensitive substring of the
//! message body. Every matching keyword is handled on its own: the sender's
//! counter is read, the escalation tier decided, the counter bumped and a
//! reply sent. A message containing two keywords therefore produces two
//! replies and raises the count by two.
//!
//! For replies, the quoted fallback at the top of the body is not part of
//! what the sender wrote and is not matched.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::command::strip_reply_fallback;
use crate::config::ModerationConfig;
use crate::store::{StoreError, WarningStore};

use super::event::{IncomingEvent, UserId};
use super::messenger::{render, Messenger, Placeholder, Substitutions};
use super::moderator::{mute_or_explain, ModerationError, Moderator};
use super::tier::{tier, Tier};

/// Why a message was not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IgnoreReason {
    /// Sent by the bot itself.
    OwnMessage,
    /// Not a text or emote message.
    NotModerated,
    /// A text message without a body.
    NoBody,
}

/// What happened for a single matching keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keyword: String,
    /// Stored count after this match.
    pub count: u64,
    pub tier: Tier,
    /// Result of the mute, if one was attempted.
    pub mute: Option<Result<(), ModerationError>>,
    /// Whether the warning or mute reply was delivered.
    pub replied: bool,
}

/// Result of running the engine on one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Ignored(IgnoreReason),
    /// Evaluated against the keyword list. Empty when nothing matched.
    Evaluated(Vec<KeywordMatch>),
}

impl MessageOutcome {
    /// Matches found, empty if the event was ignored.
    pub fn matches(&self) -> &[KeywordMatch] {
        match self {
            MessageOutcome::Ignored(_) => &[],
            MessageOutcome::Evaluated(matches) => matches,
        }
    }
}

/// Keywords from `keywords` found in `body`, in configured order.
///
/// Blank keywords never match.
pub fn matching_keywords<'a>(keywords: &'a [String], body: &str) -> Vec<&'a str> {
    let haystack = body.to_lowercase();
    keywords
        .iter()
        .map(|keyword| keyword.as_str())
        .filter(|keyword| !keyword.trim().is_empty())
        .filter(|keyword| haystack.contains(&keyword.to_lowercase()))
        .collect()
}

/// Applies the warn/mute escalation to incoming messages.
///
/// # Concurrency
///
/// The counter update is a read-modify-write on the store. Messages from the
/// same user are serialized through a per-user lock so concurrent events
/// cannot lose increments. Locks are keyed by normalized user id and dropped
/// from the map once no event for that user is in flight.
pub struct ModerationEngine {
    store: Arc<dyn WarningStore>,
    messenger: Arc<dyn Messenger>,
    moderator: Arc<dyn Moderator>,
    bot_user: UserId,
    user_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModerationEngine {
    pub fn new(
        store: Arc<dyn WarningStore>,
        messenger: Arc<dyn Messenger>,
        moderator: Arc<dyn Moderator>,
        bot_user: UserId,
    ) -> Self {
        Self {
            store,
            messenger,
            moderator,
            bot_user,
            user_locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn bot_user(&self) -> &UserId {
        &self.bot_user
    }

    pub fn store(&self) -> &Arc<dyn WarningStore> {
        &self.store
    }

    async fn get_or_create_user_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let key = user_id.normalized();
        {
            let locks = self.user_locks.read().await;
            if let Some(lock) = locks.get(&key) {
                return lock.clone();
            }
        }

        let mut locks = self.user_locks.write().await;
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry for `user_id` if `lock` is the last handle outside it.
    ///
    /// Handles are only cloned out of the map under its write or read lock, so
    /// holding the write lock here means no one can pick this one up meanwhile.
    async fn release_user_lock(&self, user_id: &UserId, lock: Arc<Mutex<()>>) {
        let key = user_id.normalized();
        let mut locks = self.user_locks.write().await;
        let idle = locks
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(&key);
        }
        // Give up our handle before the map, so the next release counts right
        drop(lock);
        drop(locks);
    }

    /// Evaluate one event against the configured keywords.
    ///
    /// A store failure aborts the remaining keywords and is returned to the
    /// caller; replies and mutes already issued for earlier keywords stand.
    pub async fn handle_message(
        &self,
        config: &ModerationConfig,
        event: &IncomingEvent,
    ) -> Result<MessageOutcome, StoreError> {
        if event.sender.same_user(&self.bot_user) {
            return Ok(MessageOutcome::Ignored(IgnoreReason::OwnMessage));
        }
        if !event.kind.is_moderated_message() {
            return Ok(MessageOutcome::Ignored(IgnoreReason::NotModerated));
        }
        let Some(body) = event.body.as_deref() else {
            return Ok(MessageOutcome::Ignored(IgnoreReason::NoBody));
        };

        let written = if event.reply_target.is_some() {
            strip_reply_fallback(body)
        } else {
            body
        };

        let keywords = matching_keywords(&config.keywords, written);
        if keywords.is_empty() {
            debug!("No keywords in {} from {}", event.event_id, event.sender);
            return Ok(MessageOutcome::Evaluated(Vec::new()));
        }

        let lock = self.get_or_create_user_lock(&event.sender).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_keywords(config, event, &keywords).await
        };
        self.release_user_lock(&event.sender, lock).await;

        Ok(MessageOutcome::Evaluated(result?))
    }

    async fn apply_keywords(
        &self,
        config: &ModerationConfig,
        event: &IncomingEvent,
        keywords: &[&str],
    ) -> Result<Vec<KeywordMatch>, StoreError> {
        let mut matches = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            matches.push(self.apply_keyword(config, event, keyword).await?);
        }
        Ok(matches)
    }

    async fn apply_keyword(
        &self,
        config: &ModerationConfig,
        event: &IncomingEvent,
        keyword: &str,
    ) -> Result<KeywordMatch, StoreError> {
        let previous = self.store.get(&event.sender).await?;
        let tier = tier(previous);

        let (template, mute) = match tier {
            Tier::Mute => {
                let result = mute_or_explain(
                    self.moderator.as_ref(),
                    self.messenger.as_ref(),
                    event,
                    &event.room_id,
                    &event.sender,
                )
                .await;
                (&config.message_mute, Some(result))
            }
            Tier::Warn => (&config.message_warning, None),
        };

        let count = previous.saturating_add(1);
        self.store.set(&event.sender, count).await?;

        info!(
            "Keyword {:?} from {} in {}: count {} ({:?})",
            keyword, event.sender, event.room_id, count, tier
        );

        let substitutions = Substitutions::new()
            .mention(Placeholder::User, event.sender.as_str())
            .text(Placeholder::Keyword, keyword)
            .text(Placeholder::Count, count.to_string());
        let content = render(template, &substitutions);

        let replied = match self.messenger.reply(event, &content).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Failed to reply to {} in {}: {}",
                    event.event_id, event.room_id, e
                );
                false
            }
        };

        Ok(KeywordMatch {
            keyword: keyword.to_string(),
            count,
            tier,
            mute,
            replied,
        })
    }
}
