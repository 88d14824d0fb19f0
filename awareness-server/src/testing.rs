//! In-process fakes for the transport and storage seams.
//!
//! Used by unit tests and the scenario tests under `tests/`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use awareness_core::RenderedMessage;

use crate::moderation::{
    EventId, EventLookup, IncomingEvent, Messenger, ModerationError, Moderator, RoomId,
    TransportError, UserId,
};
use crate::store::{StoreError, WarningRecord, WarningStore};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Messenger that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(RoomId, RenderedMessage)>>,
    replies: Mutex<Vec<(String, RenderedMessage)>>,
    fail_sends: AtomicBool,
    fail_replies: AtomicBool,
    next_id: AtomicUsize,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `send` fail from now on.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every `reply` fail from now on.
    pub fn fail_replies(&self, fail: bool) {
        self.fail_replies.store(fail, Ordering::SeqCst);
    }

    /// Standalone messages delivered, in order.
    pub fn sent(&self) -> Vec<(RoomId, RenderedMessage)> {
        locked(&self.sent).clone()
    }

    /// Replies delivered, keyed by the id of the event replied to.
    pub fn replies(&self) -> Vec<(String, RenderedMessage)> {
        locked(&self.replies).clone()
    }

    fn next_event_id(&self) -> EventId {
        EventId(format!("$sent{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(
        &self,
        room_id: &RoomId,
        content: &RenderedMessage,
    ) -> Result<EventId, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::new("send message", "simulated failure"));
        }
        locked(&self.sent).push((room_id.clone(), content.clone()));
        Ok(self.next_event_id())
    }

    async fn reply(
        &self,
        original: &IncomingEvent,
        content: &RenderedMessage,
    ) -> Result<EventId, TransportError> {
        if self.fail_replies.load(Ordering::SeqCst) {
            return Err(TransportError::new("send reply", "simulated failure"));
        }
        locked(&self.replies).push((original.event_id.0.clone(), content.clone()));
        Ok(self.next_event_id())
    }
}

#[derive(Clone, Copy)]
enum MuteBehaviour {
    Succeed,
    Forbidden,
    Fail,
}

/// Moderator that records every mute attempt.
pub struct FakeModerator {
    behaviour: MuteBehaviour,
    mutes: Mutex<Vec<(RoomId, UserId)>>,
}

impl FakeModerator {
    /// Every mute succeeds.
    pub fn new() -> Self {
        Self::with_behaviour(MuteBehaviour::Succeed)
    }

    /// Every mute fails with a permission error.
    pub fn forbidden() -> Self {
        Self::with_behaviour(MuteBehaviour::Forbidden)
    }

    /// Every mute fails with a transport error.
    pub fn failing() -> Self {
        Self::with_behaviour(MuteBehaviour::Fail)
    }

    fn with_behaviour(behaviour: MuteBehaviour) -> Self {
        Self {
            behaviour,
            mutes: Mutex::new(Vec::new()),
        }
    }

    /// Every attempted mute, successful or not.
    pub fn mutes(&self) -> Vec<(RoomId, UserId)> {
        locked(&self.mutes).clone()
    }
}

impl Default for FakeModerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Moderator for FakeModerator {
    async fn mute(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ModerationError> {
        locked(&self.mutes).push((room_id.clone(), user_id.clone()));
        match self.behaviour {
            MuteBehaviour::Succeed => Ok(()),
            MuteBehaviour::Forbidden => Err(ModerationError::Permission(
                "M_FORBIDDEN: insufficient power level".to_string(),
            )),
            MuteBehaviour::Fail => Err(ModerationError::Transport(TransportError::new(
                "set power levels",
                "simulated failure",
            ))),
        }
    }
}

/// Event lookup backed by a fixed set of events.
#[derive(Default)]
pub struct FakeLookup {
    events: Mutex<HashMap<EventId, IncomingEvent>>,
}

impl FakeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, event: IncomingEvent) {
        locked(&self.events).insert(event.event_id.clone(), event);
    }
}

#[async_trait]
impl EventLookup for FakeLookup {
    async fn get_event(
        &self,
        _room_id: &RoomId,
        event_id: &EventId,
    ) -> Result<IncomingEvent, TransportError> {
        locked(&self.events)
            .get(event_id)
            .cloned()
            .ok_or_else(|| TransportError::new("get event", format!("{} not found", event_id)))
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl WarningStore for FailingStore {
    async fn get(&self, _user_id: &UserId) -> Result<u64, StoreError> {
        Err(StoreError::storage("get", "database unavailable"))
    }

    async fn set(&self, _user_id: &UserId, _count: u64) -> Result<(), StoreError> {
        Err(StoreError::storage("set", "database unavailable"))
    }

    async fn all(&self) -> Result<Vec<WarningRecord>, StoreError> {
        Err(StoreError::storage("all", "database unavailable"))
    }
}
