/// Command parsing for `!`-prefixed bot commands in room messages
use std::fmt;

/// Prefix shared by every bot command.
pub const COMMAND_PREFIX: char = '!';

/// A parsed bot command from a message body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Report the message this one replies to
    Report,
}

/// Result of parsing a message body for bot commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// The message does not start with a command
    NoCommand,
    /// A `!` command was given but it is not one of ours
    UnrecognizedCommand {
        /// The unrecognized command word, without the prefix
        attempted: String,
    },
    /// A valid command was found
    Command(BotCommand),
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotCommand::Report => write!(f, "report"),
        }
    }
}

/// Whether a line belongs to the quoted fallback that clients prepend to replies.
fn is_reply_fallback(line: &str) -> bool {
    line.starts_with("> ") || line == ">"
}

/// The part of `body` the sender actually wrote.
///
/// Replies start with a plain-text copy of the quoted message, one `> ` line
/// per quoted line, followed by a blank line. Those leading lines and any
/// leading blank lines are dropped. Quotes further down the message are kept.
pub fn strip_reply_fallback(body: &str) -> &str {
    let mut rest = body;
    while !rest.is_empty() {
        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        let line = line.strip_suffix('\r').unwrap_or(line);
        if is_reply_fallback(line) || line.trim().is_empty() {
            rest = tail;
        } else {
            break;
        }
    }
    rest
}

/// Parse a message body for bot commands
///
/// Returns a `ParseResult` indicating:
/// - `NoCommand` if the message does not start with the command prefix
/// - `UnrecognizedCommand` if it does but the command word is unknown
/// - `Command` if a valid command was found
///
/// # Command Format
///
/// Replies carry a plain-text fallback of the quoted message, one `> ` line
/// per quoted line, followed by a blank line. Those lines and any other
/// leading blank lines are skipped; only the first remaining line is
/// inspected. It must begin with `!` directly followed by the command word.
///
/// Command words are case-insensitive. Anything after `!report` (a reason,
/// typically) is ignored.
pub fn parse_command(body: &str) -> ParseResult {
    let Some(line) = strip_reply_fallback(body).lines().next().map(str::trim) else {
        return ParseResult::NoCommand;
    };

    let Some(rest) = line.strip_prefix(COMMAND_PREFIX) else {
        return ParseResult::NoCommand;
    };

    let command_word = rest.split_whitespace().next().unwrap_or("");
    if command_word.is_empty() || !rest.starts_with(command_word) {
        // "!" alone, or "! report" with a gap after the prefix
        return ParseResult::NoCommand;
    }

    if command_word.eq_ignore_ascii_case("report") {
        ParseResult::Command(BotCommand::Report)
    } else {
        ParseResult::UnrecognizedCommand {
            attempted: command_word.to_string(),
        }
    }
}

/// Whether `body` is a report command.
pub fn is_report_command(body: &str) -> bool {
    parse_command(body) == ParseResult::Command(BotCommand::Report)
}
