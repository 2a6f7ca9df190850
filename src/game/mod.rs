//! Game Layer
//!
//! What the host drives, never how it is driven.
//!
//! ## Module Structure
//!
//! - `engine`: Contract between the turn coordinator and game rules
//! - `description`: Match description files (players + game settings)
//! - `tally`: Reference line-counting game

pub mod engine;
pub mod description;
pub mod tally;

pub use engine::{GameEngine, TurnReply};
pub use description::{MatchDescription, DescriptionError};
pub use tally::{TallyEngine, TallyResults};
