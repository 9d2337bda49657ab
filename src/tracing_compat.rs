//! Compatibility shim over `tracing`.
//!
//! Crate code logs through this module rather than importing `tracing`
//! directly, keeping the logging backend swappable in one place.

pub use tracing::{debug, error, info, trace, warn};
