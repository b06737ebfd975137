//! AXCP gateway - Delta merge engine
//!
//! Each session owns a [`ContextDocument`]: a map from top-level key to a
//! [`ContextValue`] and the timestamp of its last write. Envelopes carry
//! [`PatchOp`]s that are applied one at a time, in order:
//!
//! - `REPLACE /key` overwrites the whole value
//! - `MERGE /key` merges top-level keys into a mapping value
//!
//! A write whose timestamp is not newer than the stored one is a stale no-op
//! (last writer wins). Only the first path segment is significant.
//!
//! [`PatchOp`]: crate::envelope::PatchOp

mod document;
mod value;

pub use document::*;
pub use value::*;

use thiserror::Error;

use crate::core::ErrorCode;

/// Errors applying a single patch operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// MERGE against a field whose value is not a mapping.
    #[error("merge type conflict on '{key}': stored value is a {found}")]
    TypeConflict {
        /// Target key.
        key: String,
        /// Kind of the stored value.
        found: &'static str,
    },

    /// MERGE whose payload is not a mapping.
    #[error("merge payload for '{key}' is a {found}, expected a mapping")]
    PayloadNotMapping {
        /// Target key.
        key: String,
        /// Kind of the payload.
        found: &'static str,
    },

    /// Path has no key segment.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// Payload bytes are not valid JSON.
    #[error("invalid data for '{key}': {reason}")]
    InvalidData {
        /// Target key.
        key: String,
        /// Parser message.
        reason: String,
    },

    /// Operation kind not known to this build.
    #[error("unknown operation {0}")]
    UnknownOp(i32),
}

impl MergeError {
    /// Wire code reported to the peer.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::BadDelta
    }
}
