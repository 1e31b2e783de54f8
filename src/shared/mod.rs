//! Shared session state
//!
//! Holds the value object a scan threads through every step.

pub mod state;

pub use state::{RuntimeState, SessionState};
