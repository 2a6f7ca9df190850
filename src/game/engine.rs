//! Game Engine Contract
//!
//! The host never looks inside moves or messages; it hands the game engine
//! each player's raw turn input and applies whatever states and messages
//! come back.

use std::path::Path;
use serde::{Serialize, Deserialize};

use crate::core::state::PlayerState;

/// Engine verdict for one player after a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    /// State the player moves to.
    pub state: PlayerState,
    /// Text delivered verbatim if the player keeps thinking.
    pub message: String,
}

impl TurnReply {
    /// Player keeps playing and receives `message`.
    pub fn think(message: impl Into<String>) -> Self {
        Self { state: PlayerState::Thinking, message: message.into() }
    }

    /// Player reaches `state` with nothing more to say.
    pub fn finish(state: PlayerState) -> Self {
        Self { state, message: String::new() }
    }
}

/// Game rules, driven turn by turn by the coordinator.
pub trait GameEngine {
    /// First message for each player, in index order.
    fn initial_messages(&mut self) -> Vec<String>;

    /// Resolve one turn. `moves[i]` is player `i`'s raw input, or `None`
    /// when the player timed out or is out of the match. Must return one
    /// reply per player, in index order.
    fn process_turn(&mut self, moves: &[Option<String>]) -> anyhow::Result<Vec<TurnReply>>;

    /// Persist match results.
    fn save_results(&self, destination: &Path) -> anyhow::Result<()>;
}
