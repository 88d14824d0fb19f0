//! Minimal Matrix client-server API (v3) client.
//!
//! Implements the moderation core's transport traits on top of
//! `reqwest_middleware`, so homeserver traffic can be recorded with
//! [`RecordingMiddleware`].

pub mod types;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use awareness_core::{RecordingLogger, RecordingMiddleware, RenderedMessage};

use crate::moderation::{
    EventId, EventLookup, IncomingEvent, Messenger, ModerationError, Moderator, RoomId,
    TransportError, UserId,
};

use types::{
    apply_mute, message_content, sync_filter, ErrorResponse, RawEvent, SendResponse,
    SyncResponse, WhoAmIResponse, EVENT_TYPE_MESSAGE, EVENT_TYPE_POWER_LEVELS,
};

/// Long-poll timeout passed to `/sync`.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall HTTP timeout; must exceed [`SYNC_TIMEOUT`].
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Errors from the homeserver or the connection to it.
#[derive(Debug)]
pub enum MatrixError {
    /// The request could not be built or sent.
    Request(String),
    /// The homeserver answered with an error status.
    Api {
        status: StatusCode,
        errcode: Option<String>,
        message: String,
    },
    /// The response body was not what the API promises.
    Decode(String),
}

impl MatrixError {
    /// Whether the homeserver refused the request for lack of permission.
    pub fn is_forbidden(&self) -> bool {
        match self {
            MatrixError::Api {
                status, errcode, ..
            } => *status == StatusCode::FORBIDDEN || errcode.as_deref() == Some("M_FORBIDDEN"),
            _ => false,
        }
    }

    fn into_transport(self, operation: &'static str) -> TransportError {
        TransportError::new(operation, self.to_string())
    }
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixError::Request(msg) => write!(f, "request failed: {}", msg),
            MatrixError::Api {
                status,
                errcode,
                message,
            } => write!(
                f,
                "homeserver returned {} {}: {}",
                status,
                errcode.as_deref().unwrap_or("(no errcode)"),
                message
            ),
            MatrixError::Decode(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

impl std::error::Error for MatrixError {}

/// Map a power-level update failure to what the user is told.
pub fn moderation_error(err: MatrixError) -> ModerationError {
    if err.is_forbidden() {
        ModerationError::Permission(err.to_string())
    } else {
        ModerationError::Transport(err.into_transport("set power levels"))
    }
}

pub fn create_matrix_client(
    recording_logger: Option<RecordingLogger>,
) -> Result<ClientWithMiddleware, MatrixError> {
    let client = Client::builder()
        .user_agent(concat!("awareness-server/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| MatrixError::Request(format!("failed to create HTTP client: {}", e)))?;

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger));
    }

    Ok(builder.build())
}

#[derive(Clone)]
pub struct MatrixClient {
    client: ClientWithMiddleware,
    homeserver: Url,
    access_token: String,
}

impl MatrixClient {
    pub fn new(homeserver_url: &str, access_token: String) -> Result<Self, MatrixError> {
        Self::new_with_recording(homeserver_url, access_token, None)
    }

    pub fn new_with_recording(
        homeserver_url: &str,
        access_token: String,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self, MatrixError> {
        let homeserver = Url::parse(homeserver_url).map_err(|e| {
            MatrixError::Request(format!("invalid homeserver URL {}: {}", homeserver_url, e))
        })?;
        if homeserver.cannot_be_a_base() {
            return Err(MatrixError::Request(format!(
                "homeserver URL {} cannot be used as a base",
                homeserver_url
            )));
        }

        Ok(Self {
            client: create_matrix_client(recording_logger)?,
            homeserver,
            access_token,
        })
    }

    /// Build `{homeserver}/_matrix/client/v3/{segments...}`, percent-encoding
    /// each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, MatrixError> {
        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .map_err(|_| MatrixError::Request("homeserver URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3"])
            .extend(segments);
        Ok(url)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<T, MatrixError> {
        let mut request_builder = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token));

        if let Some(body) = body {
            let body = serde_json::to_string(body)
                .map_err(|e| MatrixError::Request(format!("failed to encode body: {}", e)))?;
            request_builder = request_builder
                .body(body)
                .header("Content-Type", "application/json");
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| MatrixError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let parsed: Option<ErrorResponse> = serde_json::from_str(&error_text).ok();
            let (errcode, message) = match parsed {
                Some(err) => (err.errcode, err.error.unwrap_or(error_text)),
                None => (None, error_text),
            };
            return Err(MatrixError::Api {
                status,
                errcode,
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MatrixError::Decode(e.to_string()))
    }

    /// Resolve the user id that owns the access token.
    pub async fn whoami(&self) -> Result<UserId, MatrixError> {
        let url = self.endpoint(&["account", "whoami"])?;
        let response: WhoAmIResponse = self.request(Method::GET, url, None).await?;
        Ok(UserId(response.user_id))
    }

    /// One `/sync` call. Without `since` the server returns a fresh snapshot.
    pub async fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, MatrixError> {
        let mut url = self.endpoint(&["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("filter", &sync_filter().to_string());
            query.append_pair("timeout", &timeout.as_millis().to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }
        self.request(Method::GET, url, None).await
    }

    pub async fn join(&self, room_id: &RoomId) -> Result<(), MatrixError> {
        let url = self.endpoint(&["join", room_id.as_str()])?;
        let _: Value = self
            .request(Method::POST, url, Some(&Value::Object(Default::default())))
            .await?;
        info!("Joined {}", room_id);
        Ok(())
    }

    pub async fn send_message(
        &self,
        room_id: &RoomId,
        message: &RenderedMessage,
        in_reply_to: Option<&EventId>,
    ) -> Result<EventId, MatrixError> {
        let txn_id = Uuid::new_v4().to_string();
        let url = self.endpoint(&[
            "rooms",
            room_id.as_str(),
            "send",
            EVENT_TYPE_MESSAGE,
            &txn_id,
        ])?;
        let content = message_content(message, in_reply_to);
        let response: SendResponse = self.request(Method::PUT, url, Some(&content)).await?;
        Ok(EventId(response.event_id))
    }

    pub async fn get_power_levels(&self, room_id: &RoomId) -> Result<Value, MatrixError> {
        let url = self.endpoint(&["rooms", room_id.as_str(), "state", EVENT_TYPE_POWER_LEVELS, ""])?;
        self.request(Method::GET, url, None).await
    }

    pub async fn put_power_levels(
        &self,
        room_id: &RoomId,
        levels: &Value,
    ) -> Result<(), MatrixError> {
        let url = self.endpoint(&["rooms", room_id.as_str(), "state", EVENT_TYPE_POWER_LEVELS, ""])?;
        let _: Value = self.request(Method::PUT, url, Some(levels)).await?;
        Ok(())
    }

    pub async fn fetch_event(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> Result<RawEvent, MatrixError> {
        let url = self.endpoint(&["rooms", room_id.as_str(), "event", event_id.as_str()])?;
        self.request(Method::GET, url, None).await
    }
}

#[async_trait]
impl Messenger for MatrixClient {
    async fn send(
        &self,
        room_id: &RoomId,
        content: &RenderedMessage,
    ) -> Result<EventId, TransportError> {
        self.send_message(room_id, content, None)
            .await
            .map_err(|e| e.into_transport("send message"))
    }

    async fn reply(
        &self,
        original: &IncomingEvent,
        content: &RenderedMessage,
    ) -> Result<EventId, TransportError> {
        self.send_message(&original.room_id, content, Some(&original.event_id))
            .await
            .map_err(|e| e.into_transport("send reply"))
    }
}

#[async_trait]
impl Moderator for MatrixClient {
    async fn mute(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ModerationError> {
        let mut levels = self
            .get_power_levels(room_id)
            .await
            .map_err(moderation_error)?;
        apply_mute(&mut levels, user_id)?;
        self.put_power_levels(room_id, &levels)
            .await
            .map_err(moderation_error)?;
        info!("Muted {} in {}", user_id, room_id);
        Ok(())
    }
}

#[async_trait]
impl EventLookup for MatrixClient {
    async fn get_event(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> Result<IncomingEvent, TransportError> {
        let raw = self
            .fetch_event(room_id, event_id)
            .await
            .map_err(|e| e.into_transport("get event"))?;
        let event_type = raw.event_type.clone();
        raw.into_incoming(room_id).ok_or_else(|| {
            error!("Event {} has unsupported type {}", event_id, event_type);
            TransportError::new("get event", format!("unsupported event type {}", event_type))
        })
    }
}
