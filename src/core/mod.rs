//! AXCP gateway - Core constants, wire error codes, and error types.
//!
//! Defines the values every other layer agrees on, and the aggregate
//! [`GatewayError`].

mod constants;
mod error;

pub use constants::*;
pub use error::*;
