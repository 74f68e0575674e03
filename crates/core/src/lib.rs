//! Domain types shared by the grouping client crates.
//!
//! Pure data and validation: task identifiers, push-channel status
//! events, REST request/response shapes. No I/O lives here.

pub mod error;
pub mod grouping;
pub mod status;
pub mod types;
pub mod validation;
