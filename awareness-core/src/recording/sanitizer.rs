use serde_json::Value;
use std::collections::HashMap;

/// Headers that contain security-sensitive values and must be redacted.
pub const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// JSON object keys whose values are credentials.
pub const SENSITIVE_JSON_KEYS: &[&str] = &[
    "access_token",
    "refresh_token",
    "password",
    "token",
    "secret",
];

/// Query parameters that carry credentials (Matrix accepts `access_token` in the URL).
pub const SENSITIVE_QUERY_PARAMS: &[&str] = &["access_token"];

const REDACTED: &str = "[REDACTED]";

pub struct Sanitizer;

impl Sanitizer {
    /// Check if a header name is sensitive and should be redacted.
    pub fn is_sensitive_header(header_name: &str) -> bool {
        let lower = header_name.to_lowercase();
        SENSITIVE_HEADERS.contains(&lower.as_str())
    }

    /// Remove sensitive data from headers
    pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(key, value)| {
                let value = if Self::is_sensitive_header(key) {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Remove sensitive data from JSON payloads
    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sanitized = serde_json::Map::new();
                for (key, val) in map {
                    let sanitized_val = if SENSITIVE_JSON_KEYS.contains(&key.as_str()) {
                        Value::String(REDACTED.to_string())
                    } else {
                        Self::sanitize_json(val)
                    };
                    sanitized.insert(key.clone(), sanitized_val);
                }
                Value::Object(sanitized)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }

    /// Redact credential query parameters from a URL.
    ///
    /// Unparseable URLs are returned unchanged.
    pub fn sanitize_url(raw: &str) -> String {
        let Ok(mut url) = url::Url::parse(raw) else {
            return raw.to_string();
        };

        let has_sensitive = url
            .query_pairs()
            .any(|(key, _)| SENSITIVE_QUERY_PARAMS.contains(&key.as_ref()));
        if !has_sensitive {
            return raw.to_string();
        }

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                if SENSITIVE_QUERY_PARAMS.contains(&key.as_ref()) {
                    (key.into_owned(), REDACTED.to_string())
                } else {
                    (key.into_owned(), value.into_owned())
                }
            })
            .collect();

        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}
