//! Error codes and top-level error type for the AXCP gateway.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::context::MergeError;
use crate::negotiation::NegotiationError;
use crate::privacy::PrivacyError;
use crate::server::RouterError;
use crate::transport::TransportError;

/// Numeric error codes surfaced to peers in reply envelopes.
///
/// Codes 12 and 13 are fixed by the protocol; the others follow the
/// AXCP error table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success.
    Ok = 0,
    /// Envelope version not understood.
    UnsupportedVersion = 6,
    /// One or more patch operations were rejected.
    BadDelta = 7,
    /// Frame larger than the configured limit.
    PayloadTooLarge = 8,
    /// Envelope could not be decoded or is structurally invalid.
    MalformedRequest = 9,
    /// Data-carrying envelope received before profile negotiation.
    NotNegotiated = 11,
    /// Envelope uses a higher profile than the session negotiated.
    ProfileMismatch = 12,
    /// Envelope profile is not implemented locally.
    ProfileUnsupported = 13,
    /// No mutually acceptable profile exists.
    ProfileNegotiationFailed = 14,
    /// Privacy budget exhausted for the session.
    BudgetExceeded = 16,
}

impl ErrorCode {
    /// Numeric wire value.
    pub fn as_u32(self) -> u32 {
        self as i32 as u32
    }

    /// Whether this code reports success.
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// Symbolic name, e.g. `PROFILE_MISMATCH`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::BadDelta => "BAD_DELTA",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::MalformedRequest => "MALFORMED_REQUEST",
            ErrorCode::NotNegotiated => "NOT_NEGOTIATED",
            ErrorCode::ProfileMismatch => "PROFILE_MISMATCH",
            ErrorCode::ProfileUnsupported => "PROFILE_UNSUPPORTED",
            ErrorCode::ProfileNegotiationFailed => "PROFILE_NEGOTIATION_FAILED",
            ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), *self as i32)
    }
}

/// Top-level gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Profile negotiation or validation error.
    #[error("negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Privacy accounting error.
    #[error("privacy error: {0}")]
    Privacy(#[from] PrivacyError),

    /// Delta merge error.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Broker error.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Session routing error.
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Wire code reported to a peer for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Negotiation(e) => e.code(),
            GatewayError::Privacy(e) => e.code(),
            GatewayError::Merge(_) => ErrorCode::BadDelta,
            GatewayError::Transport(e) => e.code(),
            GatewayError::Router(e) => e.code(),
            GatewayError::Broker(_) | GatewayError::Config(_) | GatewayError::Io(_) => {
                ErrorCode::MalformedRequest
            }
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
