//! AXCP gateway - Profile negotiation
//!
//! Peers declare the profiles they implement as a bitmask (bit `i` set means
//! profile `i` is usable) plus the smallest profile they accept. Negotiation
//! fixes one profile per session; every later envelope is validated against it.
//!
//! ```text
//! a.supported = 0b0111, a.minimum = 1
//! b.supported = 0b1110, b.minimum = 0
//! intersection = 0b0110, required = 1  -> profile 2
//! ```
//!
//! See [`negotiate`] and [`validate_envelope`].

mod profile;

pub use profile::*;
