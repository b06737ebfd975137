//! AXCP gateway - Privacy budget accounting
//!
//! Telemetry leaves the gateway only after noise calibrated to a per-session
//! differential-privacy budget has been added to every numeric field.
//!
//! - [`laplace_scale`] / [`gaussian_sigma`]: mechanism calibration
//! - [`PrivacyBudget`]: per-session ledger with linear epsilon accounting
//! - [`BudgetPolicy`]: per-topic budgets loaded from TOML
//! - [`privatize_telemetry`]: noise injection for [`TelemetryDatagram`]
//!
//! Composition is basic linear summation of epsilon. Spent budget is never
//! replenished for the lifetime of a session.
//!
//! [`TelemetryDatagram`]: crate::envelope::TelemetryDatagram

mod budget;
mod mechanism;
mod policy;
mod telemetry;

pub use budget::*;
pub use mechanism::*;
pub use policy::*;
pub use telemetry::*;

use thiserror::Error;

use crate::core::ErrorCode;

/// Errors from privacy accounting and calibration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PrivacyError {
    /// The charge would take the ledger past its epsilon cap.
    #[error("privacy budget exceeded: requested {requested}, remaining {remaining}")]
    BudgetExceeded {
        /// Epsilon requested by the charge.
        requested: f64,
        /// Epsilon left in the ledger.
        remaining: f64,
    },

    /// Epsilon must be finite and strictly positive.
    #[error("invalid epsilon: {0}")]
    InvalidEpsilon(f64),

    /// Delta must lie strictly between 0 and 1.
    #[error("invalid delta: {0}")]
    InvalidDelta(f64),

    /// Clip norm must be finite and strictly positive.
    #[error("invalid clip norm: {0}")]
    InvalidClip(f64),

    /// Budget policy could not be loaded.
    #[error("invalid budget policy: {0}")]
    InvalidPolicy(String),
}

impl PrivacyError {
    /// Wire code reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            PrivacyError::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            _ => ErrorCode::MalformedRequest,
        }
    }
}

/// Result type for privacy operations.
pub type PrivacyResult<T> = Result<T, PrivacyError>;
