//! Protocol constants for the AXCP gateway.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed
//! without bumping [`PROTOCOL_VERSION`].

use std::time::Duration;

// =============================================================================
// ENVELOPE
// =============================================================================

/// Envelope version understood by this gateway.
pub const PROTOCOL_VERSION: u32 = 1;

/// Number of protocol profiles representable in the capability bitmask.
///
/// Valid profiles are `0..PROFILE_COUNT`.
pub const PROFILE_COUNT: u32 = 4;

/// Bitmask with every representable profile set.
pub const ALL_PROFILES_MASK: u32 = (1 << PROFILE_COUNT) - 1;

// =============================================================================
// STREAM FRAMING
// =============================================================================

/// Size of the little-endian length prefix in front of every stream frame.
pub const FRAME_LENGTH_PREFIX_SIZE: usize = 4;

/// Largest stream frame accepted by default (10 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

// =============================================================================
// DATAGRAMS
// =============================================================================

/// Datagram type tag: telemetry sample.
pub const DATAGRAM_TAG_TELEMETRY: u8 = 0xA0;

/// Size of the datagram type tag.
pub const DATAGRAM_TAG_SIZE: usize = 1;

/// Largest datagram accepted by default (standard QUIC MTU budget).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1200;

// =============================================================================
// BROKER TOPICS
// =============================================================================

/// Default namespace for noised telemetry (`telemetry/<trace_id>`).
pub const DEFAULT_TELEMETRY_NAMESPACE: &str = "telemetry";

/// Default namespace for forwarded envelopes (`axcp/<trace_id>`).
pub const DEFAULT_ENVELOPE_NAMESPACE: &str = "axcp";

// =============================================================================
// DIFFERENTIAL PRIVACY DEFAULTS
// =============================================================================

/// Default per-session epsilon cap.
pub const DEFAULT_EPSILON_TOTAL: f64 = 1.0;

/// Default per-session delta cap.
pub const DEFAULT_DELTA_TOTAL: f64 = 1e-5;

/// Default sensitivity bound.
pub const DEFAULT_CLIP_NORM: f64 = 10.0;

/// Default epsilon charged for each published telemetry datagram.
pub const DEFAULT_EPSILON_PER_SAMPLE: f64 = 0.1;

/// Topic pattern matching every topic in a budget policy.
pub const WILDCARD_TOPIC: &str = "*";

// =============================================================================
// SERVER
// =============================================================================

/// Default gateway listen port.
pub const DEFAULT_PORT: u16 = 7143;

/// Default maximum number of concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Default idle timeout before QUIC tears a connection down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default keep-alive interval for client connections.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// ALPN protocol identifier negotiated on QUIC connections.
pub const ALPN_AXCP: &[u8] = b"axcp/1";

/// QUIC application close code: normal shutdown.
pub const CLOSE_NORMAL: u32 = 0;

/// QUIC application close code: undecodable stream frame.
pub const CLOSE_DECODE_ERROR: u32 = 1;

/// QUIC application close code: gateway refused the session.
pub const CLOSE_REFUSED: u32 = 2;
