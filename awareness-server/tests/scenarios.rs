//! End-to-end moderation scenarios against in-process fakes.

use std::sync::Arc;

use awareness_server::config::ModerationConfig;
use awareness_server::moderation::{
    IncomingEvent, ModerationEngine, NotificationOutcome, ReportWorkflow, RoomId, Tier, UserId,
    PERMISSION_FAILURE_TEXT,
};
use awareness_server::store::{InMemoryWarningStore, SqliteWarningStore, WarningStore};
use awareness_server::sync::process_event;
use awareness_server::testing::{FakeLookup, FakeModerator, RecordingMessenger};

const BOT: &str = "@awareness:example.org";
const ROOM: &str = "!lobby:example.org";
const MODS: &str = "!mods:example.org";
const BOB: &str = "@bob:example.org";
const CAROL: &str = "@carol:example.org";

struct Bot {
    engine: ModerationEngine,
    reports: ReportWorkflow,
    store: Arc<dyn WarningStore>,
    lookup: Arc<FakeLookup>,
    messenger: Arc<RecordingMessenger>,
    moderator: Arc<FakeModerator>,
}

impl Bot {
    fn new() -> Self {
        Self::with(Arc::new(InMemoryWarningStore::new()), FakeModerator::new())
    }

    fn with(store: Arc<dyn WarningStore>, moderator: FakeModerator) -> Self {
        let lookup = Arc::new(FakeLookup::new());
        let messenger = Arc::new(RecordingMessenger::new());
        let moderator = Arc::new(moderator);
        let engine = ModerationEngine::new(
            store.clone(),
            messenger.clone(),
            moderator.clone(),
            UserId::from(BOT),
        );
        let reports = ReportWorkflow::new(
            lookup.clone(),
            messenger.clone(),
            moderator.clone(),
            UserId::from(BOT),
        );
        Self {
            engine,
            reports,
            store,
            lookup,
            messenger,
            moderator,
        }
    }

    /// Deliver an event the way the sync loop does.
    async fn deliver(&self, config: &ModerationConfig, event: IncomingEvent) {
        self.lookup.insert(event.clone());
        let outcome = process_event(&self.engine, &self.reports, config, event).await;
        assert!(outcome.moderation.is_ok(), "store error: {:?}", outcome.moderation);
    }

    fn reply_bodies(&self) -> Vec<String> {
        self.messenger
            .replies()
            .into_iter()
            .map(|(_, message)| message.body)
            .collect()
    }
}

fn config() -> ModerationConfig {
    ModerationConfig {
        keywords: vec!["spam".to_string()],
        notification_room: None,
        message_warning: "[user]: no [keyword] please (warning [count])".to_string(),
        message_mute: "[user] muted for [keyword] (warning [count])".to_string(),
        message_report: "[reporter] reported [user]".to_string(),
        message_notify: "[reporter] reported [user] in [room]".to_string(),
    }
}

fn says(id: &str, sender: &str, body: &str) -> IncomingEvent {
    IncomingEvent::text(id, ROOM, sender, body)
}

#[tokio::test]
async fn warns_twice_then_mutes() {
    let bot = Bot::new();
    let config = config();

    for i in 1..=3 {
        bot.deliver(&config, says(&format!("$m{}", i), BOB, "this is spam"))
            .await;
    }

    assert_eq!(
        bot.reply_bodies(),
        vec![
            format!("{}: no spam please (warning 1)", BOB),
            format!("{}: no spam please (warning 2)", BOB),
            format!("{} muted for spam (warning 3)", BOB),
        ]
    );
    assert_eq!(
        bot.moderator.mutes(),
        vec![(RoomId::from(ROOM), UserId::from(BOB))]
    );
    assert_eq!(bot.store.get(&UserId::from(BOB)).await.unwrap(), 3);
}

#[tokio::test]
async fn mutes_again_every_third_match() {
    let bot = Bot::new();
    let config = config();

    for i in 1..=9 {
        bot.deliver(&config, says(&format!("$m{}", i), BOB, "SPAM"))
            .await;
    }

    assert_eq!(bot.moderator.mutes().len(), 3);
    assert_eq!(bot.store.get(&UserId::from(BOB)).await.unwrap(), 9);
}

#[tokio::test]
async fn warning_mentions_sender_in_html() {
    let bot = Bot::new();
    bot.deliver(&config(), says("$m1", BOB, "spam")).await;

    let replies = bot.messenger.replies();
    assert_eq!(replies[0].0, "$m1");
    assert!(replies[0]
        .1
        .formatted_body
        .starts_with("<a href='https://matrix.to/#/@bob:example.org'>@bob:example.org</a>"));
}

#[tokio::test]
async fn report_command_mutes_reported_user() {
    let bot = Bot::new();
    let config = config();

    bot.deliver(&config, says("$hello", BOB, "hello there")).await;
    bot.deliver(
        &config,
        says("$report", CAROL, "> <@bob:example.org> hello there\n\n!report").replying_to("$hello"),
    )
    .await;

    assert_eq!(
        bot.moderator.mutes(),
        vec![(RoomId::from(ROOM), UserId::from(BOB))]
    );
    let replies = bot.messenger.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "$report");
    assert_eq!(replies[0].1.body, format!("{} reported {}", CAROL, BOB));
}

#[tokio::test]
async fn reporting_quoted_keyword_never_counts_against_reporter() {
    let bot = Bot::new();
    let config = config();

    for i in 1..=3 {
        let spam_id = format!("$spam{}", i);
        bot.deliver(&config, says(&spam_id, BOB, "buy spam")).await;
        bot.deliver(
            &config,
            says(
                &format!("$report{}", i),
                CAROL,
                "> <@bob:example.org> buy spam\n\n!report",
            )
            .replying_to(spam_id.as_str()),
        )
        .await;
    }

    assert_eq!(bot.store.get(&UserId::from(CAROL)).await.unwrap(), 0);
    assert_eq!(bot.store.get(&UserId::from(BOB)).await.unwrap(), 3);
    assert!(bot
        .moderator
        .mutes()
        .iter()
        .all(|(_, user)| *user == UserId::from(BOB)));

    let to_reports: Vec<String> = bot
        .messenger
        .replies()
        .into_iter()
        .filter(|(event_id, _)| event_id.starts_with("$report"))
        .map(|(_, message)| message.body)
        .collect();
    assert_eq!(to_reports, vec![format!("{} reported {}", CAROL, BOB); 3]);
}

#[tokio::test]
async fn report_without_notification_room_sends_nothing_else() {
    let bot = Bot::new();
    let config = config();

    bot.deliver(&config, says("$hello", BOB, "hello")).await;
    bot.deliver(&config, says("$report", CAROL, "!report").replying_to("$hello"))
        .await;

    assert_eq!(bot.moderator.mutes().len(), 1);
    assert_eq!(bot.messenger.replies().len(), 1);
    assert!(bot.messenger.sent().is_empty());
}

#[tokio::test]
async fn report_notifies_moderators_with_quote() {
    let bot = Bot::new();
    let config = ModerationConfig {
        notification_room: Some(MODS.to_string()),
        ..config()
    };

    bot.deliver(&config, says("$hello", BOB, "line one\nline <two>"))
        .await;
    bot.deliver(&config, says("$report", CAROL, "!report rude").replying_to("$hello"))
        .await;

    let sent = bot.messenger.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, RoomId::from(MODS));
    assert_eq!(sent[0].1.body, format!("{} reported {} in {}", CAROL, BOB, ROOM));
    assert_eq!(sent[1].1.body, "> line one\n> line <two>");
    assert!(sent[1].1.formatted_body.contains("line &lt;two&gt;"));
}

#[tokio::test]
async fn reaction_report_mutes_target_sender() {
    let bot = Bot::new();
    let config = config();

    bot.deliver(&config, says("$hello", BOB, "hello")).await;
    bot.deliver(
        &config,
        IncomingEvent::reaction("$react", ROOM, CAROL, "$hello", "🚨"),
    )
    .await;

    assert_eq!(
        bot.moderator.mutes(),
        vec![(RoomId::from(ROOM), UserId::from(BOB))]
    );
    assert_eq!(bot.messenger.replies()[0].0, "$hello");
}

#[tokio::test]
async fn other_reactions_are_ignored() {
    let bot = Bot::new();
    let config = config();

    bot.deliver(&config, says("$hello", BOB, "hello")).await;
    bot.deliver(
        &config,
        IncomingEvent::reaction("$react", ROOM, CAROL, "$hello", "👍"),
    )
    .await;

    assert!(bot.moderator.mutes().is_empty());
    assert!(bot.messenger.replies().is_empty());
}

#[tokio::test]
async fn clean_messages_leave_no_trace() {
    let bot = Bot::new();
    bot.deliver(&config(), says("$m1", BOB, "good morning")).await;

    assert!(bot.store.all().await.unwrap().is_empty());
    assert!(bot.messenger.replies().is_empty());
    assert!(bot.moderator.mutes().is_empty());
}

#[tokio::test]
async fn own_messages_are_never_evaluated() {
    let bot = Bot::new();
    let config = config();

    for i in 1..=3 {
        bot.deliver(
            &config,
            says(&format!("$m{}", i), BOT, "I warned you about spam"),
        )
        .await;
    }

    assert!(bot.store.all().await.unwrap().is_empty());
    assert!(bot.messenger.replies().is_empty());
}

#[tokio::test]
async fn two_keywords_in_one_message_count_twice() {
    let bot = Bot::new();
    let config = ModerationConfig {
        keywords: vec!["spam".to_string(), "scam".to_string()],
        ..config()
    };

    bot.deliver(&config, says("$m1", BOB, "spam and a scam")).await;

    assert_eq!(
        bot.reply_bodies(),
        vec![
            format!("{}: no spam please (warning 1)", BOB),
            format!("{}: no scam please (warning 2)", BOB),
        ]
    );
    assert_eq!(bot.store.get(&UserId::from(BOB)).await.unwrap(), 2);
}

#[tokio::test]
async fn permission_failure_is_explained_and_still_counted() {
    let bot = Bot::with(
        Arc::new(InMemoryWarningStore::new()),
        FakeModerator::forbidden(),
    );
    let config = config();

    for i in 1..=3 {
        bot.deliver(&config, says(&format!("$m{}", i), BOB, "spam"))
            .await;
    }

    let bodies = bot.reply_bodies();
    assert_eq!(bodies.len(), 4);
    assert_eq!(bodies[2], PERMISSION_FAILURE_TEXT);
    assert_eq!(bodies[3], format!("{} muted for spam (warning 3)", BOB));
    assert_eq!(bot.store.get(&UserId::from(BOB)).await.unwrap(), 3);
}

#[tokio::test]
async fn notification_failure_does_not_block_acknowledgement() {
    let bot = Bot::new();
    let config = ModerationConfig {
        notification_room: Some(MODS.to_string()),
        ..config()
    };
    bot.messenger.fail_sends(true);

    bot.deliver(&config, says("$hello", BOB, "hello")).await;
    let outcome = process_event(
        &bot.engine,
        &bot.reports,
        &config,
        says("$report", CAROL, "!report").replying_to("$hello"),
    )
    .await;

    let report = outcome.report.unwrap();
    assert!(report.acknowledged);
    assert_eq!(report.notification, NotificationOutcome::Failed);
    assert_eq!(bot.moderator.mutes().len(), 1);
}

#[tokio::test]
async fn counts_are_case_insensitive_across_sender_casing() {
    let bot = Bot::new();
    let config = config();

    bot.deliver(&config, says("$m1", "@Bob:Example.org", "spam")).await;
    bot.deliver(&config, says("$m2", BOB, "spam")).await;

    let all = bot.store.all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].user_id, BOB);
    assert_eq!(all[0].warning_count, 2);
}

#[tokio::test]
async fn counts_survive_restart_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("awareness.db");
    let config = config();

    {
        let store = Arc::new(SqliteWarningStore::new(&path).unwrap());
        let bot = Bot::with(store, FakeModerator::new());
        bot.deliver(&config, says("$m1", BOB, "spam")).await;
        bot.deliver(&config, says("$m2", BOB, "spam")).await;
    }

    let store = Arc::new(SqliteWarningStore::new(&path).unwrap());
    let bot = Bot::with(store, FakeModerator::new());
    let outcome = process_event(&bot.engine, &bot.reports, &config, says("$m3", BOB, "spam")).await;

    let matches = outcome.moderation.unwrap();
    assert_eq!(matches.matches()[0].tier, Tier::Mute);
    assert_eq!(matches.matches()[0].count, 3);
    assert_eq!(bot.moderator.mutes().len(), 1);
}
