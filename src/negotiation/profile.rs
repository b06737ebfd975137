//! Profile negotiation and per-envelope profile validation.

use thiserror::Error;

use crate::core::{ALL_PROFILES_MASK, ErrorCode, PROFILE_COUNT};
use crate::envelope::ProfileNegotiation;

/// Errors from profile negotiation and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The peers share no profile that clears both minimums.
    #[error("no compatible profile")]
    NoCompatibleProfile,

    /// The envelope uses a higher profile than the session negotiated.
    #[error("profile mismatch: envelope uses {envelope}, session negotiated {session}")]
    ProfileMismatch {
        /// Profile carried by the envelope.
        envelope: u32,
        /// Negotiated session profile.
        session: u32,
    },

    /// The envelope's profile is not implemented locally.
    #[error("profile {0} unsupported")]
    ProfileUnsupported(u32),

    /// A profile index outside `0..PROFILE_COUNT`.
    #[error("profile {0} out of range")]
    ProfileOutOfRange(u32),

    /// The session profile was already fixed.
    #[error("session already negotiated profile {0}")]
    AlreadyNegotiated(u32),
}

impl NegotiationError {
    /// Wire code reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            NegotiationError::ProfileMismatch { .. } => ErrorCode::ProfileMismatch,
            NegotiationError::ProfileUnsupported(_) | NegotiationError::ProfileOutOfRange(_) => {
                ErrorCode::ProfileUnsupported
            }
            NegotiationError::NoCompatibleProfile | NegotiationError::AlreadyNegotiated(_) => {
                ErrorCode::ProfileNegotiationFailed
            }
        }
    }
}

/// Profile capabilities one peer declares for negotiation.
///
/// Discarded once a [`NegotiatedProfile`] is fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCapabilities {
    /// Bitmask of usable profiles; bits at or above [`PROFILE_COUNT`] are ignored.
    pub supported: u32,
    /// Smallest acceptable profile.
    pub minimum: u32,
}

impl SessionCapabilities {
    /// Create capabilities from a bitmask and minimum.
    pub fn new(supported: u32, minimum: u32) -> Self {
        Self { supported, minimum }
    }

    /// Every representable profile, no minimum.
    pub fn all() -> Self {
        Self::new(ALL_PROFILES_MASK, 0)
    }

    /// Whether `profile` is usable by this peer.
    pub fn supports(&self, profile: u32) -> bool {
        mask_contains(self.supported, profile)
    }

    /// Highest usable profile.
    pub fn highest(&self) -> Option<u32> {
        highest_profile(self.supported)
    }
}

impl Default for SessionCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl From<ProfileNegotiation> for SessionCapabilities {
    fn from(neg: ProfileNegotiation) -> Self {
        Self::new(neg.supported, neg.minimum)
    }
}

impl From<SessionCapabilities> for ProfileNegotiation {
    fn from(caps: SessionCapabilities) -> Self {
        ProfileNegotiation {
            supported: caps.supported,
            minimum: caps.minimum,
        }
    }
}

/// Profile fixed for a session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NegotiatedProfile(u32);

impl NegotiatedProfile {
    /// Wrap a profile index, rejecting values outside `0..PROFILE_COUNT`.
    pub fn new(profile: u32) -> Result<Self, NegotiationError> {
        if profile >= PROFILE_COUNT {
            return Err(NegotiationError::ProfileOutOfRange(profile));
        }
        Ok(Self(profile))
    }

    /// Profile index.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NegotiatedProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "profile-{}", self.0)
    }
}

/// Whether bit `profile` is set in `mask`.
pub fn mask_contains(mask: u32, profile: u32) -> bool {
    profile < PROFILE_COUNT && mask & (1 << profile) != 0
}

/// Greatest profile index set in `mask`, ignoring bits outside the profile domain.
pub fn highest_profile(mask: u32) -> Option<u32> {
    let mask = mask & ALL_PROFILES_MASK;
    if mask == 0 {
        None
    } else {
        Some(31 - mask.leading_zeros())
    }
}

/// Pick the session profile for two peers.
///
/// Always the highest mutually supported profile, and only if it clears the
/// larger of the two minimums. Intermediate profiles are never chosen.
pub fn negotiate(
    a: &SessionCapabilities,
    b: &SessionCapabilities,
) -> Result<NegotiatedProfile, NegotiationError> {
    let intersection = a.supported & b.supported;
    let required = a.minimum.max(b.minimum);

    match highest_profile(intersection) {
        Some(highest) if highest >= required => Ok(NegotiatedProfile(highest)),
        _ => Err(NegotiationError::NoCompatibleProfile),
    }
}

/// Check an envelope's profile against the session.
///
/// `ProfileMismatch` is checked before `ProfileUnsupported`.
pub fn validate_envelope(
    profile: u32,
    session_profile: u32,
    supported_mask: u32,
) -> Result<(), NegotiationError> {
    if profile > session_profile {
        return Err(NegotiationError::ProfileMismatch {
            envelope: profile,
            session: session_profile,
        });
    }
    if !mask_contains(supported_mask, profile) {
        return Err(NegotiationError::ProfileUnsupported(profile));
    }
    Ok(())
}
