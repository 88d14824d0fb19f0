//! Protocol-neutral moderation core.
//!
//! The core is split along the seams it talks to:
//! - **Identity and events** (`event`): what arrived and from whom
//! - **Escalation** (`tier`): pure `count -> Warn | Mute` decision
//! - **Delivery** (`messenger`): rendered messages out, single events in
//! - **Privileges** (`moderator`): muting a user in a room
//!
//! `ModerationEngine` applies keyword escalation to messages and
//! `ReportWorkflow` handles user reports. Both are built from trait objects,
//! so the Matrix client and the test fakes plug in the same way.

pub mod engine;
pub mod event;
pub mod messenger;
pub mod moderator;
pub mod report;
pub mod tier;

pub use engine::{matching_keywords, IgnoreReason, KeywordMatch, MessageOutcome, ModerationEngine};
pub use event::{EventId, EventKind, IncomingEvent, RoomId, UserId};
pub use messenger::{EventLookup, Messenger, TransportError};
pub use moderator::{
    ModerationError, Moderator, PERMISSION_FAILURE_TEXT, TRANSPORT_FAILURE_TEXT,
};
pub use report::{
    report_trigger, NotificationOutcome, ReportOutcome, ReportTrigger, ReportWorkflow,
    REPORT_REACTION_KEY,
};
pub use tier::{escalation_level, tier, Tier, MUTE_EVERY};
