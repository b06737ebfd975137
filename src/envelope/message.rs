//! Envelope, patch operation, and capability messages.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::{ErrorCode, PROTOCOL_VERSION};

/// Versioned message unit carried on QUIC streams.
///
/// ```text
/// 1  version         uint32
/// 2  trace_id        string
/// 3  profile         uint32
/// 4-7 capability_msg oneof { offer, request, ack, negotiate }
/// 8  context_delta   repeated PatchOp
/// 9  ts              int64
/// 10 error           ErrorMessage (replies only)
/// ```
#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    /// Envelope format version.
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// Session/correlation identifier, unique per logical exchange.
    #[prost(string, tag = "2")]
    pub trace_id: String,
    /// Protocol profile this message uses.
    #[prost(uint32, tag = "3")]
    pub profile: u32,
    /// Capability payload, opaque to the gateway except for `negotiate`.
    #[prost(oneof = "CapabilityMsg", tags = "4, 5, 6, 7")]
    pub capability_msg: Option<CapabilityMsg>,
    /// Ordered context updates.
    #[prost(message, repeated, tag = "8")]
    pub context_delta: Vec<PatchOp>,
    /// Sender timestamp (milliseconds).
    #[prost(int64, tag = "9")]
    pub ts: i64,
    /// Outcome carried by reply envelopes.
    #[prost(message, optional, tag = "10")]
    pub error: Option<ErrorMessage>,
}

/// Capability payload variants.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum CapabilityMsg {
    /// A tool/capability offer.
    #[prost(message, tag = "4")]
    Offer(CapabilityOffer),
    /// A request for a capability.
    #[prost(message, tag = "5")]
    Request(CapabilityRequest),
    /// Acknowledgement of a capability offer or request.
    #[prost(message, tag = "6")]
    Ack(CapabilityAck),
    /// Profile negotiation request or response.
    #[prost(message, tag = "7")]
    Negotiate(ProfileNegotiation),
}

/// Describes a tool offered by a peer.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CapabilityDescriptor {
    /// Stable tool identifier.
    #[prost(string, tag = "1")]
    pub tool_id: String,
    /// Human-readable name.
    #[prost(string, tag = "2")]
    pub name: String,
    /// Tool version.
    #[prost(string, tag = "3")]
    pub version: String,
    /// Free-form description.
    #[prost(string, tag = "4")]
    pub description: String,
}

/// Offer of a capability.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CapabilityOffer {
    /// The offered capability.
    #[prost(message, optional, tag = "1")]
    pub desc: Option<CapabilityDescriptor>,
}

/// Request for a capability.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CapabilityRequest {
    /// Requested tool identifier.
    #[prost(string, tag = "1")]
    pub tool_id: String,
}

/// Acknowledgement of an offer or request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CapabilityAck {
    /// Tool identifier being acknowledged.
    #[prost(string, tag = "1")]
    pub tool_id: String,
    /// Whether the capability was accepted.
    #[prost(bool, tag = "2")]
    pub accepted: bool,
}

/// Profile capabilities declared during negotiation.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct ProfileNegotiation {
    /// Bitmask of usable profiles (bit i set means profile i).
    #[prost(uint32, tag = "1")]
    pub supported: u32,
    /// Smallest acceptable profile.
    #[prost(uint32, tag = "2")]
    pub minimum: u32,
}

/// Outcome attached to reply envelopes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorMessage {
    /// Wire error code.
    #[prost(enumeration = "ErrorCode", tag = "1")]
    pub code: i32,
    /// Diagnostic text.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Indices of patch operations that were rejected.
    #[prost(uint32, repeated, tag = "3")]
    pub rejected_ops: Vec<u32>,
}

/// Patch operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DeltaOpKind {
    /// Replace the whole value of a field.
    Replace = 0,
    /// Merge top-level keys into a mapping field.
    Merge = 1,
}

/// One field-level context update.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PatchOp {
    /// Operation kind.
    #[prost(enumeration = "DeltaOpKind", tag = "1")]
    pub op: i32,
    /// Target path, conventionally `/<key>`.
    #[prost(string, tag = "2")]
    pub path: String,
    /// JSON-encoded value payload.
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    /// Writer timestamp used for last-writer-wins.
    #[prost(int64, tag = "4")]
    pub ts: i64,
}

impl PatchOp {
    /// Create a REPLACE operation.
    pub fn replace(path: impl Into<String>, data: &serde_json::Value, ts: i64) -> Self {
        Self::with_kind(DeltaOpKind::Replace, path, data, ts)
    }

    /// Create a MERGE operation.
    pub fn merge(path: impl Into<String>, data: &serde_json::Value, ts: i64) -> Self {
        Self::with_kind(DeltaOpKind::Merge, path, data, ts)
    }

    fn with_kind(kind: DeltaOpKind, path: impl Into<String>, data: &serde_json::Value, ts: i64) -> Self {
        Self {
            op: kind as i32,
            path: path.into(),
            data: data.to_string().into_bytes(),
            ts,
        }
    }

    /// Operation kind, or `None` for a value this build does not know.
    pub fn kind(&self) -> Option<DeltaOpKind> {
        DeltaOpKind::try_from(self.op).ok()
    }
}

impl ErrorMessage {
    /// Create an outcome with the given code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            rejected_ops: Vec::new(),
        }
    }

    /// Successful outcome.
    pub fn ok() -> Self {
        Self::new(ErrorCode::Ok, "")
    }

    /// Decoded error code; unknown values read as `MalformedRequest`.
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::try_from(self.code).unwrap_or(ErrorCode::MalformedRequest)
    }
}

impl Envelope {
    /// Create an envelope at the current protocol version.
    pub fn new(trace_id: impl Into<String>, profile: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            trace_id: trace_id.into(),
            profile,
            capability_msg: None,
            context_delta: Vec::new(),
            ts: now_millis(),
            error: None,
        }
    }

    /// Create a negotiation request declaring `supported` and `minimum`.
    pub fn negotiation(trace_id: impl Into<String>, supported: u32, minimum: u32) -> Self {
        let mut env = Self::new(trace_id, 0);
        env.capability_msg = Some(CapabilityMsg::Negotiate(ProfileNegotiation {
            supported,
            minimum,
        }));
        env
    }

    /// Append a patch operation.
    pub fn with_op(mut self, op: PatchOp) -> Self {
        self.context_delta.push(op);
        self
    }

    /// Attach a capability offer.
    pub fn with_offer(mut self, desc: CapabilityDescriptor) -> Self {
        self.capability_msg = Some(CapabilityMsg::Offer(CapabilityOffer { desc: Some(desc) }));
        self
    }

    /// Negotiation payload, if this is a negotiation envelope.
    pub fn negotiate_request(&self) -> Option<ProfileNegotiation> {
        match self.capability_msg {
            Some(CapabilityMsg::Negotiate(neg)) => Some(neg),
            _ => None,
        }
    }

    /// Build a reply to this envelope carrying `outcome`.
    pub fn reply(&self, profile: u32, outcome: ErrorMessage) -> Self {
        let mut env = Self::new(self.trace_id.clone(), profile);
        env.error = Some(outcome);
        env
    }

    /// Outcome code of a reply; envelopes without an outcome read as OK.
    pub fn outcome(&self) -> ErrorCode {
        self.error
            .as_ref()
            .map(ErrorMessage::error_code)
            .unwrap_or(ErrorCode::Ok)
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode, encode};
    use serde_json::json;

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::new("trace-42", 2)
            .with_op(PatchOp::replace("/battery", &json!(95), 100))
            .with_op(PatchOp::merge("/metrics", &json!({"steps": 1200}), 101))
            .with_offer(CapabilityDescriptor {
                tool_id: "search".into(),
                name: "Web search".into(),
                version: "1.0".into(),
                description: String::new(),
            });

        let bytes = encode(&env);
        let decoded: Envelope = decode(&bytes).unwrap();

        assert_eq!(decoded.trace_id, "trace-42");
        assert_eq!(decoded.profile, 2);
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_negotiation_envelope() {
        let env = Envelope::negotiation("t", 0b1011, 1);
        let decoded: Envelope = decode(&encode(&env)).unwrap();
        assert_eq!(
            decoded.negotiate_request(),
            Some(ProfileNegotiation {
                supported: 0b1011,
                minimum: 1
            })
        );
    }

    #[test]
    fn test_patch_op_kind() {
        let op = PatchOp::merge("/m", &json!({}), 1);
        assert_eq!(op.kind(), Some(DeltaOpKind::Merge));

        let unknown = PatchOp { op: 7, ..op };
        assert_eq!(unknown.kind(), None);
    }

    #[test]
    fn test_reply_carries_trace_and_code() {
        let req = Envelope::new("abc", 1);
        let reply = req.reply(1, ErrorMessage::new(ErrorCode::ProfileMismatch, "too high"));
        assert_eq!(reply.trace_id, "abc");
        assert_eq!(reply.outcome(), ErrorCode::ProfileMismatch);
        assert_eq!(req.outcome(), ErrorCode::Ok);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Envelope, _> = decode(&[0xFF, 0xFF, 0xFF]);
        assert!(result.is_err());
    }
}
