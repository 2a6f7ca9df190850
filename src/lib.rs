//! # Underworld Host
//!
//! Turn-based match host for programs that play games over line-oriented
//! text streams. Players are child processes (stdin/stdout) or sockets; the
//! host handshakes with each one, then runs synchronized turns with a hard
//! per-turn deadline and per-turn input ceilings. Game rules live behind the
//! `GameEngine` trait.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     UNDERWORLD HOST                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  config.rs       - Turn limits and handshake tokens          │
//! │  plugin.rs       - Hooks wrapped around a match              │
//! │                                                              │
//! │  core/           - Player primitives (no I/O)                │
//! │  ├── state.rs    - Player state machine values               │
//! │  └── guard.rs    - Per-turn input ceilings                   │
//! │                                                              │
//! │  game/           - What is being played                      │
//! │  ├── engine.rs   - Game engine contract                      │
//! │  ├── description.rs - Match description files                │
//! │  └── tally.rs    - Reference line-counting game              │
//! │                                                              │
//! │  network/        - Players and threads                       │
//! │  ├── connection.rs - Process and socket transports           │
//! │  ├── session.rs  - One reader thread per player              │
//! │  ├── barrier.rs  - "Everyone done thinking" wait             │
//! │  └── coordinator.rs - Turn loop                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Player Protocol
//!
//! 1. Host sends the synchronize token (`SYN`), player answers `ACK`.
//! 2. Each turn the host sends a message; the player answers with any
//!    number of lines followed by `end`.
//! 3. A player that is slow, floods input, or disconnects is kicked and
//!    plays no further part in the match.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod plugin;

// Re-export commonly used types
pub use config::{HostConfig, TurnLimits, END_OF_TURN};
pub use self::core::state::{KickReason, PlayerState};
pub use game::{GameEngine, MatchDescription, TallyEngine, TurnReply};
pub use network::{HostError, MatchSummary, PlayerDescriptor, TurnCoordinator};
pub use plugin::{MatchPlugin, run_with_plugin};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
