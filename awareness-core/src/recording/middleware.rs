use super::sanitizer::Sanitizer;
use super::types::{CorrelationId, CORRELATION_ID_HEADER};
use super::{Direction, EventType, RecordedEvent, RecordingLogger};
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use std::collections::HashMap;
use uuid::Uuid;

/// Records every homeserver request and response through a `RecordingLogger`.
pub struct RecordingMiddleware {
    logger: RecordingLogger,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger) -> Self {
        Self { logger }
    }
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        // Header first, then extensions, then a fresh id
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| extensions.get::<CorrelationId>().map(|id| id.0.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = correlation_id.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let request_data = extract_request_data(&req);
        self.record(
            &correlation_id,
            Direction::Request,
            format!("{} {}", request_data.method, extract_path(&request_data.url)),
            serde_json::to_value(&request_data).unwrap_or(serde_json::Value::Null),
        );

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => {
                let response_data = extract_response_data(resp);
                self.record(
                    &correlation_id,
                    Direction::Response,
                    format!("response_{}", response_data.status_code),
                    serde_json::to_value(&response_data).unwrap_or(serde_json::Value::Null),
                );
            }
            Err(err) => {
                self.record(
                    &correlation_id,
                    Direction::Response,
                    "error".to_string(),
                    serde_json::json!({
                        "error": err.to_string(),
                        "error_type": format!("{:?}", err)
                    }),
                );
            }
        }

        response
    }
}

impl RecordingMiddleware {
    fn record(
        &self,
        correlation_id: &str,
        direction: Direction,
        operation: String,
        data: serde_json::Value,
    ) {
        self.logger.record(RecordedEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.to_string(),
            event_type: EventType::MatrixApiCall,
            direction,
            operation,
            data,
            metadata: HashMap::new(),
        });
    }
}

#[derive(Debug, serde::Serialize)]
struct RequestData {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
struct ResponseData {
    status_code: u16,
    headers: HashMap<String, String>,
    body_size: u64,
}

fn header_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

fn extract_request_data(request: &Request) -> RequestData {
    let body = match request.body().map(|b| b.as_bytes()) {
        None => serde_json::Value::Null,
        Some(None) => serde_json::Value::String("[STREAM_BODY]".to_string()),
        Some(Some(bytes)) if bytes.len() > 10_000 => {
            serde_json::Value::String(format!("[LARGE_BODY_{}b]", bytes.len()))
        }
        Some(Some(bytes)) => match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(json) => Sanitizer::sanitize_json(&json),
            Err(_) => match std::str::from_utf8(bytes) {
                Ok(text) => serde_json::Value::String(text.to_string()),
                Err(_) => serde_json::Value::String(format!("[BINARY_BODY_{}b]", bytes.len())),
            },
        },
    };

    RequestData {
        method: request.method().to_string(),
        url: Sanitizer::sanitize_url(request.url().as_str()),
        headers: Sanitizer::sanitize_headers(&header_map(request.headers())),
        body,
    }
}

fn extract_response_data(response: &Response) -> ResponseData {
    ResponseData {
        status_code: response.status().as_u16(),
        headers: Sanitizer::sanitize_headers(&header_map(response.headers())),
        body_size: response.content_length().unwrap_or(0),
    }
}

fn extract_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_path_drops_query() {
        assert_eq!(
            extract_path("https://hs.example.org/_matrix/client/v3/sync?since=abc"),
            "/_matrix/client/v3/sync"
        );
    }

    #[test]
    fn test_extract_path_falls_back_to_input() {
        assert_eq!(extract_path("not a url"), "not a url");
    }

    #[test]
    fn test_request_body_is_sanitized() {
        let mut request = Request::new(
            reqwest::Method::PUT,
            "https://hs.example.org/_matrix/client/v3/rooms/r/send/m.room.message/1"
                .parse()
                .unwrap(),
        );
        *request.body_mut() = Some(reqwest::Body::from(
            r#"{"msgtype":"m.text","body":"hi","access_token":"syt_secret"}"#,
        ));
        request.headers_mut().insert(
            reqwest::header::AUTHORIZATION,
            "Bearer syt_secret".parse().unwrap(),
        );

        let data = extract_request_data(&request);
        assert_eq!(data.method, "PUT");
        assert_eq!(data.body["body"], "hi");
        assert_eq!(data.body["access_token"], "[REDACTED]");
        assert_eq!(data.headers["authorization"], "[REDACTED]");
    }
}
