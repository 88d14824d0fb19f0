use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    pub timestamp: String,      // ISO 8601 timestamp
    pub correlation_id: String, // Groups a request with its response
    pub event_type: EventType,
    pub direction: Direction,
    pub operation: String,       // e.g., "sync_event", "PUT /_matrix/client/v3/rooms/..."
    pub data: serde_json::Value, // Sanitized request/response data
    pub metadata: HashMap<String, String>, // room id, event id, etc.
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum EventType {
    /// A timeline event delivered by `/sync`.
    SyncEventReceived,
    /// An outgoing call to the homeserver.
    MatrixApiCall,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

// Header name for correlation ID propagation
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
