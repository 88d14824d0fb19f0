//! Message template rendering.
//!
//! Templates are operator-supplied strings (plain text or Matrix HTML) with
//! bracketed placeholders such as `[user]` or `[count]`. Rendering produces
//! both halves of a Matrix message: the plain `body` and the HTML
//! `formatted_body`. User references become `matrix.to` mention links in the
//! HTML half, and every other substituted value is escaped there.
//!
//! Rendering is a single left-to-right pass, so a substituted value that
//! happens to contain a placeholder token is never expanded again.

use serde::{Deserialize, Serialize};

/// Base URL for room-canonical user mentions.
pub const MATRIX_TO_BASE: &str = "https://matrix.to/#/";

/// A placeholder token recognised in templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// The moderated or reported user.
    User,
    /// The keyword that matched.
    Keyword,
    /// The user's warning count after this match.
    Count,
    /// The member who filed a report.
    Reporter,
    /// The room the event happened in.
    Room,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::User,
        Placeholder::Keyword,
        Placeholder::Count,
        Placeholder::Reporter,
        Placeholder::Room,
    ];

    /// The literal token as it appears in a template.
    pub fn token(self) -> &'static str {
        match self {
            Placeholder::User => "[user]",
            Placeholder::Keyword => "[keyword]",
            Placeholder::Count => "[count]",
            Placeholder::Reporter => "[reporter]",
            Placeholder::Room => "[room]",
        }
    }
}

/// A value substituted for a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Free text. Escaped in the HTML body.
    Text(String),
    /// A user identity, rendered as a mention link in the HTML body.
    Mention(String),
}

impl Value {
    fn plain(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::Mention(user_id) => user_id.clone(),
        }
    }

    fn html(&self) -> String {
        match self {
            Value::Text(text) => escape_html(text),
            Value::Mention(user_id) => mention_link(user_id),
        }
    }
}

/// Ordered placeholder → value mapping.
///
/// Later entries for the same placeholder replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    entries: Vec<(Placeholder, Value)>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, placeholder: Placeholder, value: Value) -> Self {
        self.entries.retain(|(p, _)| *p != placeholder);
        self.entries.push((placeholder, value));
        self
    }

    pub fn text(self, placeholder: Placeholder, text: impl Into<String>) -> Self {
        self.with(placeholder, Value::Text(text.into()))
    }

    pub fn mention(self, placeholder: Placeholder, user_id: impl Into<String>) -> Self {
        self.with(placeholder, Value::Mention(user_id.into()))
    }

    pub fn get(&self, placeholder: Placeholder) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(p, _)| *p == placeholder)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A rendered message with plain and HTML bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub body: String,
    pub formatted_body: String,
}

impl RenderedMessage {
    /// A message whose plain and HTML bodies are the same text.
    ///
    /// The text is escaped for the HTML body.
    pub fn plain(text: impl Into<String>) -> Self {
        let body = text.into();
        let formatted_body = escape_html(&body);
        Self {
            body,
            formatted_body,
        }
    }
}

/// Render a template with the given substitutions.
///
/// Tokens without a substitution are left as literal text.
pub fn render(template: &str, substitutions: &Substitutions) -> RenderedMessage {
    RenderedMessage {
        body: substitute(template, substitutions, Value::plain),
        formatted_body: substitute(template, substitutions, Value::html),
    }
}

/// Render a message body as a block-quote.
pub fn quote(text: &str) -> RenderedMessage {
    let body = text
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");
    let body = if body.is_empty() {
        "> ".to_string()
    } else {
        body
    };

    let paragraph = text
        .lines()
        .map(escape_html)
        .collect::<Vec<_>>()
        .join("<br>\n");

    RenderedMessage {
        body,
        formatted_body: format!("<blockquote>\n<p>{}</p>\n</blockquote>\n", paragraph),
    }
}

/// HTML mention link for a user id.
pub fn mention_link(user_id: &str) -> String {
    let escaped = escape_html(user_id);
    format!("<a href='{}{}'>{}</a>", MATRIX_TO_BASE, escaped, escaped)
}

/// Escape text for inclusion in HTML element content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn substitute(
    template: &str,
    substitutions: &Substitutions,
    format: impl Fn(&Value) -> String,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];

        let hit = substitutions
            .entries
            .iter()
            .find(|(placeholder, _)| candidate.starts_with(placeholder.token()));

        match hit {
            Some((placeholder, value)) => {
                out.push_str(&format(value));
                rest = &candidate[placeholder.token().len()..];
            }
            None => {
                // '[' is a single byte, so this stays on a char boundary.
                out.push('[');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}
