//! Telemetry datagram messages.

use super::message::now_millis;

/// Telemetry sample carried on QUIC datagrams behind the `0xA0` tag.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TelemetryDatagram {
    /// Sample time (milliseconds since the epoch).
    #[prost(uint64, tag = "1")]
    pub timestamp_ms: u64,
    /// Profile the sender uses.
    #[prost(uint32, tag = "2")]
    pub profile: u32,
    /// Sample payload.
    #[prost(oneof = "TelemetryPayload", tags = "3, 4, 5")]
    pub payload: Option<TelemetryPayload>,
}

/// Telemetry payload variants.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum TelemetryPayload {
    /// System resource sample.
    #[prost(message, tag = "3")]
    System(SystemStats),
    /// Model token usage.
    #[prost(message, tag = "4")]
    Tokens(TokenUsage),
    /// Request latency.
    #[prost(message, tag = "5")]
    Latency(LatencyStats),
}

/// System resource sample.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct SystemStats {
    /// CPU utilisation, 0..=100.
    #[prost(uint32, tag = "1")]
    pub cpu_percent: u32,
    /// Resident memory in bytes.
    #[prost(uint64, tag = "2")]
    pub mem_bytes: u64,
    /// Temperature in degrees Celsius.
    #[prost(uint32, tag = "3")]
    pub temperature_c: u32,
}

/// Token usage sample.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    #[prost(uint32, tag = "1")]
    pub prompt_tokens: u32,
    /// Completion tokens produced.
    #[prost(uint32, tag = "2")]
    pub completion_tokens: u32,
}

/// Latency sample.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct LatencyStats {
    /// Time to receive the request, in milliseconds.
    #[prost(uint32, tag = "1")]
    pub request_latency_ms: u32,
    /// Time to produce the response, in milliseconds.
    #[prost(uint32, tag = "2")]
    pub response_latency_ms: u32,
}

impl TelemetryDatagram {
    /// Create an empty datagram stamped with the current time.
    pub fn new(profile: u32) -> Self {
        Self {
            timestamp_ms: now_millis().max(0) as u64,
            profile,
            payload: None,
        }
    }

    /// Create a system resource sample.
    pub fn system(profile: u32, cpu_percent: u32, mem_bytes: u64, temperature_c: u32) -> Self {
        let mut td = Self::new(profile);
        td.payload = Some(TelemetryPayload::System(SystemStats {
            cpu_percent,
            mem_bytes,
            temperature_c,
        }));
        td
    }

    /// Create a token usage sample.
    pub fn tokens(profile: u32, prompt_tokens: u32, completion_tokens: u32) -> Self {
        let mut td = Self::new(profile);
        td.payload = Some(TelemetryPayload::Tokens(TokenUsage {
            prompt_tokens,
            completion_tokens,
        }));
        td
    }

    /// Create a latency sample.
    pub fn latency(profile: u32, request_latency_ms: u32, response_latency_ms: u32) -> Self {
        let mut td = Self::new(profile);
        td.payload = Some(TelemetryPayload::Latency(LatencyStats {
            request_latency_ms,
            response_latency_ms,
        }));
        td
    }

    /// System stats, if this is a system sample.
    pub fn system_stats(&self) -> Option<&SystemStats> {
        match &self.payload {
            Some(TelemetryPayload::System(s)) => Some(s),
            _ => None,
        }
    }

    /// Token usage, if this is a token sample.
    pub fn token_usage(&self) -> Option<&TokenUsage> {
        match &self.payload {
            Some(TelemetryPayload::Tokens(t)) => Some(t),
            _ => None,
        }
    }
}
