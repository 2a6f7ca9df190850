//! Core player primitives.
//!
//! State machine values and the per-turn input guard. Nothing here does
//! I/O or takes locks.

pub mod state;
pub mod guard;

pub use state::{PlayerState, KickReason};
pub use guard::admits_line;
