//! `/sync` long-poll loop feeding timeline events to the moderation core.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use awareness_core::{CorrelationId, RecordingLogger};

use crate::command::{parse_command, ParseResult};
use crate::config::{ConfigHandle, ModerationConfig};
use crate::matrix::types::SyncResponse;
use crate::matrix::SYNC_TIMEOUT;
use crate::moderation::{
    IncomingEvent, MessageOutcome, ModerationEngine, ReportOutcome, ReportWorkflow, RoomId,
};
use crate::store::StoreError;
use crate::AppState;

/// Delay before retrying a failed sync.
pub const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Everything that happened for one event.
#[derive(Debug)]
pub struct EventOutcome {
    pub event: IncomingEvent,
    pub moderation: Result<MessageOutcome, StoreError>,
    pub report: Option<ReportOutcome>,
}

/// Rooms the bot has been invited to, sorted.
pub fn invited_rooms(response: &SyncResponse) -> Vec<RoomId> {
    let mut rooms: Vec<RoomId> = response
        .rooms
        .invite
        .keys()
        .map(|room| RoomId::from(room.as_str()))
        .collect();
    rooms.sort_by(|a, b| a.0.cmp(&b.0));
    rooms
}

/// Timeline events the core handles, grouped by room (sorted) in timeline order.
///
/// Each raw event is recorded before conversion when a logger is given.
pub fn timeline_events(
    response: SyncResponse,
    recording_logger: Option<&RecordingLogger>,
) -> Vec<IncomingEvent> {
    let mut rooms: Vec<_> = response.rooms.join.into_iter().collect();
    rooms.sort_by(|a, b| a.0.cmp(&b.0));

    let mut events = Vec::new();
    for (room_id, joined) in rooms {
        let room_id = RoomId(room_id);
        if joined.timeline.limited {
            warn!("Timeline for {} was truncated; older events were not moderated", room_id);
        }
        for raw in joined.timeline.events {
            if let Some(logger) = recording_logger {
                let data = serde_json::to_value(&raw).unwrap_or(serde_json::Value::Null);
                logger.record_sync_event(
                    &CorrelationId(Uuid::new_v4().to_string()),
                    room_id.as_str(),
                    &raw.event_id,
                    data,
                );
            }
            if let Some(event) = raw.into_incoming(&room_id) {
                events.push(event);
            }
        }
    }
    events
}

/// Run the keyword engine and, where applicable, the report workflow.
///
/// The report workflow runs even if the engine hit a storage error.
pub async fn process_event(
    engine: &ModerationEngine,
    reports: &ReportWorkflow,
    config: &ModerationConfig,
    event: IncomingEvent,
) -> EventOutcome {
    let moderation = engine.handle_message(config, &event).await;
    match &moderation {
        Ok(MessageOutcome::Evaluated(matches)) if !matches.is_empty() => {
            debug!("{} matched {} keyword(s)", event.event_id, matches.len());
        }
        Ok(_) => {}
        Err(e) => error!(
            "Failed to moderate {} from {} in {}: {}",
            event.event_id, event.sender, event.room_id, e
        ),
    }

    if let Some(body) = event.body.as_deref() {
        if let ParseResult::UnrecognizedCommand { attempted } = parse_command(body) {
            debug!("Ignoring unrecognized command !{} in {}", attempted, event.event_id);
        }
    }

    let report = reports.handle(config, &event).await;

    EventOutcome {
        event,
        moderation,
        report,
    }
}

/// Split `events` by sender, keeping timeline order within each sender and
/// the order in which senders first appear.
fn events_by_sender(events: Vec<IncomingEvent>) -> Vec<Vec<IncomingEvent>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<IncomingEvent>> = Vec::new();
    for event in events {
        let slot = *index.entry(event.sender.normalized()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(event);
    }
    groups
}

/// Process a batch and wait for all of it.
///
/// Different senders are handled concurrently. Each sender's events run one
/// after another in timeline order, so escalation replies land on the right
/// messages.
///
/// Each event takes its own config snapshot, so a reload applies from the
/// next event on and never halfway through one.
pub async fn process_batch(
    engine: Arc<ModerationEngine>,
    reports: Arc<ReportWorkflow>,
    config: ConfigHandle,
    events: Vec<IncomingEvent>,
) -> Vec<EventOutcome> {
    let mut tasks = JoinSet::new();
    for group in events_by_sender(events) {
        let engine = engine.clone();
        let reports = reports.clone();
        let config = config.clone();
        tasks.spawn(async move {
            let mut outcomes = Vec::with_capacity(group.len());
            for event in group {
                let snapshot = config.snapshot().await;
                outcomes.push(process_event(&engine, &reports, &snapshot, event).await);
            }
            outcomes
        });
    }

    let mut outcomes = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(group) => outcomes.extend(group),
            Err(e) => error!("Event processing task failed: {}", e),
        }
    }
    outcomes
}

async fn join_invites(state: &AppState, response: &SyncResponse) {
    for room_id in invited_rooms(response) {
        if !state.auto_join {
            debug!("Ignoring invite to {} (auto-join disabled)", room_id);
            continue;
        }
        if let Err(e) = state.matrix.join(&room_id).await {
            error!("Failed to join {}: {}", room_id, e);
        }
    }
}

/// Long-poll `/sync` forever.
///
/// The first sync only establishes the stream position: its timeline is
/// history and is not moderated.
pub async fn sync_loop(state: Arc<AppState>) {
    let mut since: Option<String> = None;

    loop {
        let timeout = if since.is_some() {
            SYNC_TIMEOUT
        } else {
            Duration::ZERO
        };

        let response = match state.matrix.sync(since.as_deref(), timeout).await {
            Ok(response) => response,
            Err(e) => {
                error!("Sync failed, retrying in {:?}: {}", SYNC_RETRY_DELAY, e);
                tokio::time::sleep(SYNC_RETRY_DELAY).await;
                continue;
            }
        };

        let initial = since.is_none();
        since = Some(response.next_batch.clone());

        join_invites(&state, &response).await;

        if initial {
            info!("Initial sync complete, listening for new events");
            continue;
        }

        let events = timeline_events(response, state.recording_logger.as_ref());
        if events.is_empty() {
            continue;
        }

        debug!("Processing {} events", events.len());
        process_batch(
            state.engine.clone(),
            state.reports.clone(),
            state.moderation_config.clone(),
            events,
        )
        .await;
    }
}
