//! Shared building blocks for the awareness moderation bot.
//!
//! - [`template`]: pure rendering of operator message templates into Matrix
//!   plain/HTML bodies.
//! - [`recording`]: optional JSONL recording of homeserver traffic for
//!   debugging, with credential redaction.

pub mod recording;
pub mod template;

pub use recording::{
    CorrelationId, Direction, EventType, RecordedEvent, RecordingLogger, RecordingMiddleware,
    Sanitizer, CORRELATION_ID_HEADER,
};
pub use template::{
    escape_html, mention_link, quote, render, Placeholder, RenderedMessage, Substitutions, Value,
};
