//! Player State Definitions
//!
//! The per-player protocol state machine shared by sessions, the turn
//! coordinator and game engines.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Protocol state of a single player.
///
/// `Kicked` and the game outcomes are final: once reached, the only
/// permitted assignment is the same value again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum PlayerState {
    /// Connected, handshake not completed yet.
    #[default]
    NotInitiated,
    /// Waiting for the next turn.
    Ready,
    /// Expected to produce a move before the turn deadline.
    Thinking,
    /// Removed from the match by the host.
    Kicked,
    /// Game outcome: won.
    Won,
    /// Game outcome: lost.
    Lost,
    /// Game outcome: draw.
    Draw,
}

impl PlayerState {
    /// Check if no further transition to a different value is allowed.
    #[inline]
    pub fn is_final(self) -> bool {
        matches!(
            self,
            PlayerState::Kicked | PlayerState::Won | PlayerState::Lost | PlayerState::Draw
        )
    }

    /// Check if the player still takes part in turns.
    #[inline]
    pub fn in_play(self) -> bool {
        matches!(self, PlayerState::Ready | PlayerState::Thinking)
    }

    /// Stable lowercase name, as used in results files.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::NotInitiated => "not_initiated",
            PlayerState::Ready => "ready",
            PlayerState::Thinking => "thinking",
            PlayerState::Kicked => "kicked",
            PlayerState::Won => "won",
            PlayerState::Lost => "lost",
            PlayerState::Draw => "draw",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// KICK REASON
// =============================================================================

/// Why the host removed a player from the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KickReason {
    /// First line was not the acknowledgement token.
    HandshakeFailed,
    /// No acknowledgement before the first round's deadline.
    HandshakeTimeout,
    /// Still thinking when the turn deadline elapsed.
    Timeout,
    /// Per-turn line/byte ceiling exceeded or malformed input.
    SpamProtection,
    /// Stream closed or the read loop failed.
    Disconnected,
}

impl fmt::Display for KickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            KickReason::HandshakeFailed => "Handshake failed",
            KickReason::HandshakeTimeout => "Handshake timeout",
            KickReason::Timeout => "Timeout",
            KickReason::SpamProtection => "Spam protection",
            KickReason::Disconnected => "Disconnected",
        };
        f.write_str(text)
    }
}
