//! Escalation tiers derived from the persisted warning counter.
//!
//! The counter is never reset, so escalation cycles every [`MUTE_EVERY`]
//! matches: two warnings, then a mute, then two warnings again.

use serde::Serialize;

/// Matches per escalation cycle.
pub const MUTE_EVERY: u64 = 3;

/// Action chosen for a keyword match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    Warn,
    Mute,
}

/// Decide the action for a match given the count *before* it is incremented.
pub fn tier(count: u64) -> Tier {
    if count % MUTE_EVERY == MUTE_EVERY - 1 {
        Tier::Mute
    } else {
        Tier::Warn
    }
}

/// Position of a stored count within its cycle: 0 after the first warning,
/// 1 after the second, 2 after a mute. `None` for users never warned.
pub fn escalation_level(count: u64) -> Option<u64> {
    if count == 0 {
        None
    } else {
        Some((count - 1) % MUTE_EVERY)
    }
}
