//! Network Layer
//!
//! Player connections and the threads that talk to them. Every player gets
//! one session thread reading its input; the turn coordinator runs on the
//! caller's thread and synchronizes them through the turn barrier.

pub mod barrier;
pub mod connection;
pub mod session;
pub mod coordinator;

pub use barrier::{ReadinessObserver, TurnBarrier};
pub use connection::{Connection, ConnectionError, LineReader, PlayerDescriptor, SocketFamily, SocketTarget};
pub use session::{PlayerSession, SessionError, SessionGuard, ShutdownHandle};
pub use coordinator::{HostError, MatchSummary, PlayerOutcome, TurnCoordinator};
