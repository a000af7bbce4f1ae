//! Types shared by every nyft component
//!
//! This crate defines what travels on the wire:
//! - Subject and queue group names
//! - JSON payloads for drive requests, drive responses and status snapshots
//! - Unique id generation used for component ids, request ids and reply inboxes

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Error text returned when no driver accepted a request in time
pub const NO_DRIVERS_AVAILABLE: &str = "No drivers available found, sorry!";

/// Subject names
pub mod subject {
    /// Prefix for component-level (health and discovery) traffic
    pub const NAMESPACE: &str = "_NYFT";
    /// Broadcast liveness probe
    pub const DISCOVERY: &str = "_NYFT.discovery";
    /// Find-a-driver requests, consumed through the `manager` queue group
    pub const FIND: &str = "drivers.find";
    /// Fan-out eligibility broadcast to every driver agent
    pub const RIDES: &str = "drivers.rides";
    /// Prefix for one-shot reply subjects
    pub const INBOX_PREFIX: &str = "_INBOX";

    /// Per-component status subject: `_NYFT.<id>.status`
    pub fn status(id: &str) -> String {
        format!("{}.{}.status", NAMESPACE, id)
    }

    /// Fresh one-shot reply subject
    pub fn inbox() -> String {
        format!("{}.{}", INBOX_PREFIX, super::new_id())
    }
}

/// Queue group names
pub mod group {
    /// Dispatch services share find requests through this group
    pub const MANAGER: &str = "manager";
}

/// Generate a globally unique, opaque identifier
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Identity of a running component, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentIdentity {
    pub id: String,
    pub kind: String,
}

impl ComponentIdentity {
    /// Create an identity with a freshly generated id
    pub fn generate(kind: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            kind: kind.into(),
        }
    }

    /// Connection label, `<kind>:<id>`
    pub fn name(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

/// A request for a driver of a given vehicle kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl DriveRequest {
    /// Create a request without a request id; the dispatcher assigns one
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            request_id: String::new(),
            kind: kind.into(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Assign a fresh request id if none was supplied and return it
    pub fn ensure_request_id(&mut self) -> &str {
        if self.request_id.is_empty() {
            self.request_id = new_id();
        }
        &self.request_id
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Outcome of a find request
///
/// Holds exactly one of an assigned driver id or an error message. The JSON form is
/// `{"driver_id": "..."}` or `{"error": "..."}`; payloads carrying both or neither are
/// rejected on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub enum DriveResponse {
    Assigned(String),
    Failed(String),
}

impl DriveResponse {
    /// Response naming the driver that accepted the request.
    ///
    /// An empty id is not a valid assignment and becomes the "no drivers" error.
    pub fn assigned(driver_id: impl Into<String>) -> Self {
        let driver_id = driver_id.into();
        if driver_id.is_empty() {
            Self::unavailable()
        } else {
            Self::Assigned(driver_id)
        }
    }

    /// Response sent when no driver replied in time
    pub fn unavailable() -> Self {
        Self::Failed(NO_DRIVERS_AVAILABLE.to_string())
    }

    pub fn assigned_id(&self) -> Option<&str> {
        match self {
            Self::Assigned(id) => Some(id),
            Self::Failed(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Assigned(_) => None,
            Self::Failed(message) => Some(message),
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned(_))
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    driver_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    error: String,
}

impl TryFrom<WireResponse> for DriveResponse {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        match (wire.driver_id.is_empty(), wire.error.is_empty()) {
            (false, true) => Ok(Self::Assigned(wire.driver_id)),
            (true, false) => Ok(Self::Failed(wire.error)),
            (false, false) => Err("response carries both driver_id and error".to_string()),
            (true, true) => Err("response carries neither driver_id nor error".to_string()),
        }
    }
}

impl From<DriveResponse> for WireResponse {
    fn from(response: DriveResponse) -> Self {
        match response {
            DriveResponse::Assigned(driver_id) => Self {
                driver_id,
                error: String::new(),
            },
            DriveResponse::Failed(error) => Self {
                driver_id: String::new(),
                error,
            },
        }
    }
}

/// One reply collected during a discovery round
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub component_id: String,
}

impl From<String> for DiscoveryReply {
    fn from(component_id: String) -> Self {
        Self { component_id }
    }
}

/// Point-in-time status of a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub kind: String,
    pub id: String,
    #[serde(rename = "cmdline")]
    pub process_args: Vec<String>,
    #[serde(rename = "mem")]
    pub heap_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_request_accepts_missing_and_null_request_id() {
        let missing = DriveRequest::decode(br#"{"type":"regular"}"#).expect("valid request");
        assert_eq!(missing.request_id, "");
        assert_eq!(missing.kind, "regular");

        let null = DriveRequest::decode(br#"{"request_id":null,"type":"large"}"#)
            .expect("valid request");
        assert_eq!(null.request_id, "");
        assert_eq!(null.kind, "large");
    }

    #[test]
    fn test_drive_request_requires_type() {
        assert!(DriveRequest::decode(br#"{"request_id":"abc"}"#).is_err());
        assert!(DriveRequest::decode(b"not json").is_err());
    }

    #[test]
    fn test_ensure_request_id_keeps_existing_id() {
        let mut request = DriveRequest::new("regular").with_request_id("req-1");
        assert_eq!(request.ensure_request_id(), "req-1");
    }

    #[test]
    fn test_ensure_request_id_generates_distinct_ids() {
        let mut first = DriveRequest::new("regular");
        let mut second = DriveRequest::new("regular");

        let a = first.ensure_request_id().to_string();
        let b = second.ensure_request_id().to_string();

        assert!(!a.is_empty());
        assert_ne!(a, b);
        // Stable once assigned
        assert_eq!(first.ensure_request_id(), a);
    }

    #[test]
    fn test_drive_response_wire_format() {
        let assigned = DriveResponse::assigned("driver-7");
        assert_eq!(
            String::from_utf8(assigned.encode().unwrap()).unwrap(),
            r#"{"driver_id":"driver-7"}"#
        );

        let failed = DriveResponse::unavailable();
        assert_eq!(
            String::from_utf8(failed.encode().unwrap()).unwrap(),
            r#"{"error":"No drivers available found, sorry!"}"#
        );
    }

    #[test]
    fn test_drive_response_rejects_both_or_neither() {
        assert!(DriveResponse::decode(br#"{"driver_id":"a","error":"b"}"#).is_err());
        assert!(DriveResponse::decode(br#"{}"#).is_err());

        let decoded = DriveResponse::decode(br#"{"error":"nope"}"#).unwrap();
        assert_eq!(decoded.error_message(), Some("nope"));
        assert_eq!(decoded.assigned_id(), None);
    }

    #[test]
    fn test_empty_assignment_becomes_unavailable() {
        let response = DriveResponse::assigned("");
        assert!(!response.is_assigned());
        assert_eq!(response.error_message(), Some(NO_DRIVERS_AVAILABLE));
    }

    #[test]
    fn test_status_subject() {
        assert_eq!(subject::status("abc"), "_NYFT.abc.status");
        assert!(subject::inbox().starts_with("_INBOX."));
        assert_ne!(subject::inbox(), subject::inbox());
    }

    #[test]
    fn test_status_snapshot_field_names() {
        let snapshot = StatusSnapshot {
            kind: "driver-agent".to_string(),
            id: "abc".to_string(),
            process_args: vec!["nyft-agent".to_string()],
            heap_bytes: 42,
        };
        let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["cmdline"][0], "nyft-agent");
        assert_eq!(json["mem"], 42);
    }

    #[test]
    fn test_identity_name() {
        let identity = ComponentIdentity {
            id: "abc".to_string(),
            kind: "nyft-service".to_string(),
        };
        assert_eq!(identity.name(), "nyft-service:abc");
        assert_ne!(
            ComponentIdentity::generate("x").id,
            ComponentIdentity::generate("x").id
        );
    }
}
