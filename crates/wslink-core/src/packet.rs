//! The tagged packet wire format.
//!
//! Every frame on the wire is a JSON object with at least
//! `{event: string, pID: string}`. Two events are protocol-level and handled
//! by the core: `heartbeat` (adds `time`, epoch millis) and `responce` (adds
//! `orgPID` and an optional `data` payload — the historical spelling is the
//! wire contract). Any other event is application-defined and passes through
//! untouched; its extra fields live in the flattened field map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LinkError;
use crate::ids::PacketId;

/// Inbound frames without a `pID` get an empty one rather than a synthesized
/// random ID; the field only matters on frames we send.
fn default_pid() -> PacketId {
    PacketId::from_string(String::new())
}

/// Event name of the liveness-probe control packet.
pub const EVENT_HEARTBEAT: &str = "heartbeat";

/// Event name of the reply control packet.
pub const EVENT_RESPONCE: &str = "responce";

/// One discrete protocol message.
///
/// The `pID` is assigned by the sender immediately before transmission,
/// overriding anything the caller set — callers never pick their own
/// correlation identifiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Discriminant for dispatch.
    pub event: String,
    /// Correlation identifier, unique per send.
    #[serde(rename = "pID", default = "default_pid")]
    pub pid: PacketId,
    /// Event-specific fields (`time`, `orgPID`, `data`, application payload).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Packet {
    /// Create a packet for an application-defined event with no fields yet.
    #[must_use]
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            pid: PacketId::from_string(String::new()),
            fields: Map::new(),
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.fields.insert(key.into(), value.into());
        self
    }

    /// Create a heartbeat probe carrying the sender's send timestamp.
    #[must_use]
    pub fn heartbeat(time_ms: i64) -> Self {
        Self::new(EVENT_HEARTBEAT).with_field("time", time_ms)
    }

    /// Create a heartbeat probe stamped with the current wall-clock time.
    #[must_use]
    pub fn heartbeat_now() -> Self {
        Self::heartbeat(chrono::Utc::now().timestamp_millis())
    }

    /// Create a reply to the packet identified by `org_pid`.
    #[must_use]
    pub fn responce(org_pid: &PacketId, data: Option<Value>) -> Self {
        let mut packet = Self::new(EVENT_RESPONCE).with_field("orgPID", org_pid.as_str());
        if let Some(data) = data {
            let _ = packet.fields.insert("data".into(), data);
        }
        packet
    }

    /// Decode a raw text frame.
    pub fn decode(text: &str) -> Result<Self, LinkError> {
        serde_json::from_str(text).map_err(LinkError::Decode)
    }

    /// Encode to a text frame.
    pub fn encode(&self) -> Result<String, LinkError> {
        serde_json::to_string(self).map_err(LinkError::Encode)
    }

    /// Identifier of the packet this one answers, for `responce` packets.
    #[must_use]
    pub fn org_pid(&self) -> Option<&str> {
        self.fields.get("orgPID").and_then(Value::as_str)
    }

    /// Opaque reply payload, for `responce` packets.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.fields.get("data")
    }

    /// Sender send timestamp (epoch millis), for `heartbeat` packets.
    #[must_use]
    pub fn time(&self) -> Option<i64> {
        self.fields.get("time").and_then(Value::as_i64)
    }

    /// Look up an arbitrary field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
