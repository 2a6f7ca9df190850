//! Player Session Management
//!
//! One session per match participant. Each session owns its connection and
//! runs its own thread: handshake first, then read lines while the player is
//! thinking, applying transitions to the player's state machine under the
//! session lock.
//!
//! All shared session state (state, pending input, line counter, kick
//! reason, connection) sits behind one mutex. A transition and its side
//! effects (teardown, thinking wakeup, readiness notification) happen while
//! that mutex is held, so no other thread sees an intermediate state.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{HostConfig, TurnLimits, END_OF_TURN};
use crate::core::guard::admits_line;
use crate::core::state::{KickReason, PlayerState};
use crate::network::barrier::ReadinessObserver;
use crate::network::connection::{Connection, LineReader};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Attempt to leave a final state.
    #[error("Player {player} is {current} and cannot become {requested}")]
    FinalState {
        /// Player index.
        player: usize,
        /// State the player is locked in.
        current: PlayerState,
        /// Rejected state.
        requested: PlayerState,
    },

    /// `start` called twice.
    #[error("Session {0} already started")]
    AlreadyStarted(usize),

    /// Read failure on the player's stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// =============================================================================
// SHARED STATE
// =============================================================================

struct SessionInner {
    state: PlayerState,
    pending_input: String,
    received_lines: usize,
    kick_reason: Option<KickReason>,
    connection: Connection,
}

struct SessionShared {
    index: usize,
    inner: Mutex<SessionInner>,
    /// Signalled on every state change; the session thread waits on it
    /// to start thinking.
    state_changed: Condvar,
    observer: Arc<dyn ReadinessObserver>,
}

impl SessionShared {
    fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
            shared: self,
        }
    }

    /// Block while the player is ready. True once it is thinking, false
    /// once it has left play.
    fn wait_until_thinking(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = self
            .state_changed
            .wait_while(inner, |s| s.state == PlayerState::Ready)
            .unwrap_or_else(PoisonError::into_inner);
        inner.state == PlayerState::Thinking
    }
}

/// Exclusive access to one session's state.
///
/// Holding a guard is holding the session lock; every operation on it is
/// atomic with respect to the session thread and the coordinator.
pub struct SessionGuard<'a> {
    inner: MutexGuard<'a, SessionInner>,
    shared: &'a SessionShared,
}

impl SessionGuard<'_> {
    /// Player index.
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.inner.state
    }

    /// Reason recorded by the first kick.
    pub fn kick_reason(&self) -> Option<KickReason> {
        self.inner.kick_reason
    }

    /// Input accumulated since the last turn boundary.
    pub fn pending_input(&self) -> &str {
        &self.inner.pending_input
    }

    /// Lines accepted since the last turn boundary.
    pub fn received_lines(&self) -> usize {
        self.inner.received_lines
    }

    /// Consume this turn's input and reset the per-turn counters.
    pub fn take_pending_input(&mut self) -> String {
        self.inner.received_lines = 0;
        std::mem::take(&mut self.inner.pending_input)
    }

    /// Move the player to `next`.
    ///
    /// Final states are a one-way gate: re-asserting the same final value
    /// is a no-op, anything else is `SessionError::FinalState`. Reaching a
    /// final state closes the connection. Leaving thinking for any other
    /// state notifies the readiness observer.
    pub fn transition(&mut self, next: PlayerState) -> Result<(), SessionError> {
        let current = self.inner.state;
        if current.is_final() && current != next {
            return Err(SessionError::FinalState {
                player: self.shared.index,
                current,
                requested: next,
            });
        }
        if current == next {
            return Ok(());
        }

        if next.is_final() {
            match self.inner.kick_reason {
                Some(reason) if next == PlayerState::Kicked => {
                    info!("Player {} kicked: {}", self.shared.index, reason);
                }
                _ => info!("Player {} reaches final state: {}", self.shared.index, next),
            }
            self.inner.connection.close();
        } else {
            debug!("Player {}: {} -> {}", self.shared.index, current, next);
        }

        self.inner.state = next;
        if next != PlayerState::Thinking {
            self.shared.observer.stopped_thinking(self.shared.index);
        }
        self.shared.state_changed.notify_all();
        Ok(())
    }

    /// Remove the player from the match. No-op once the player is final;
    /// the first kick's reason is the one kept.
    pub fn kick(&mut self, reason: KickReason) {
        if self.inner.state.is_final() {
            return;
        }
        self.inner.kick_reason = Some(reason);
        // Not final yet, so the transition cannot be refused.
        let _ = self.transition(PlayerState::Kicked);
    }

    /// Deliver raw text to the player.
    pub fn send(&mut self, text: &str) {
        debug_assert!(!self.inner.state.is_final(), "write to a final session");
        self.inner.connection.send(text);
    }

    /// Deliver one line to the player.
    pub fn send_line(&mut self, text: &str) {
        debug_assert!(!self.inner.state.is_final(), "write to a final session");
        self.inner.connection.send_line(text);
    }
}

// =============================================================================
// PLAYER SESSION
// =============================================================================

/// Host-side representative of one connected player.
pub struct PlayerSession {
    shared: Arc<SessionShared>,
    thread: Option<JoinHandle<()>>,
}

impl PlayerSession {
    /// Create a session over an open connection. `observer` is told
    /// whenever the player stops thinking.
    pub fn new(index: usize, connection: Connection, observer: Arc<dyn ReadinessObserver>) -> Self {
        let inner = SessionInner {
            state: PlayerState::NotInitiated,
            pending_input: String::new(),
            received_lines: 0,
            kick_reason: None,
            connection,
        };
        Self {
            shared: Arc::new(SessionShared {
                index,
                inner: Mutex::new(inner),
                state_changed: Condvar::new(),
                observer,
            }),
            thread: None,
        }
    }

    /// Zero-based player index.
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Take the session lock.
    pub fn lock(&self) -> SessionGuard<'_> {
        self.shared.lock()
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.lock().state()
    }

    /// Reason recorded by the first kick.
    pub fn kick_reason(&self) -> Option<KickReason> {
        self.lock().kick_reason()
    }

    /// Start the session thread: handshake, then the read loop.
    pub fn start(&mut self, config: &HostConfig) -> Result<(), SessionError> {
        let index = self.shared.index;
        let reader = self
            .shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connection
            .take_reader()
            .ok_or(SessionError::AlreadyStarted(index))?;

        let shared = self.shared.clone();
        let limits = config.limits;
        let ack = config.handshake_ack.clone();
        let handle = thread::Builder::new()
            .name(format!("player-{index}"))
            .spawn(move || run_session(shared, reader, limits, ack))?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Wait for the session thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Player {} thread panicked", self.shared.index);
            }
        }
    }

    /// Detach the session thread without waiting for it.
    pub fn abandon(&mut self) {
        self.thread = None;
    }

    /// Check if the session thread has exited (or never started).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("index", &self.shared.index)
            .finish()
    }
}

/// Tears down every session's connection from any thread.
///
/// Used on operator interrupt: states are left alone, only the players'
/// processes and sockets are released.
#[derive(Clone)]
pub struct ShutdownHandle {
    sessions: Vec<Arc<SessionShared>>,
}

impl ShutdownHandle {
    /// Handle covering `sessions`.
    pub fn new(sessions: &[PlayerSession]) -> Self {
        Self {
            sessions: sessions.iter().map(|s| s.shared.clone()).collect(),
        }
    }

    /// Close every connection. Idempotent.
    pub fn abort(&self) {
        for shared in &self.sessions {
            shared.lock().inner.connection.close();
        }
    }
}

// =============================================================================
// SESSION THREAD
// =============================================================================

fn run_session(shared: Arc<SessionShared>, mut reader: LineReader, limits: TurnLimits, ack: String) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        play(&shared, &mut reader, &limits, &ack)
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Player {} read loop ended: {}", shared.index, e),
        Err(_) => warn!("Player {} read loop panicked", shared.index),
    }
    shared.lock().kick(KickReason::Disconnected);
}

fn play(
    shared: &SessionShared,
    reader: &mut LineReader,
    limits: &TurnLimits,
    ack: &str,
) -> Result<(), SessionError> {
    handshake(shared, reader, limits, ack)?;

    loop {
        if !shared.wait_until_thinking() {
            return Ok(());
        }
        let line = reader.read_line(limits.max_line_len)?;

        let mut session = shared.lock();
        match session.state() {
            PlayerState::Thinking => {}
            state if state.in_play() => continue,
            _ => return Ok(()),
        }
        if line.is_empty() {
            return Ok(());
        }

        if line.trim() == END_OF_TURN {
            session.transition(PlayerState::Ready)?;
            continue;
        }
        if !admits_line(session.received_lines(), session.pending_input().len(), &line, limits) {
            session.kick(KickReason::SpamProtection);
            return Ok(());
        }
        session.inner.pending_input.push_str(&line);
        session.inner.received_lines += 1;
    }
}

fn handshake(
    shared: &SessionShared,
    reader: &mut LineReader,
    limits: &TurnLimits,
    ack: &str,
) -> Result<(), SessionError> {
    let answer = reader.read_line(limits.max_line_len)?;

    let mut session = shared.lock();
    if session.state() != PlayerState::NotInitiated {
        return Ok(());
    }
    if answer.trim() == ack {
        session.transition(PlayerState::Ready)?;
    } else {
        debug!("Player {} answered handshake with {:?}", shared.index, answer.trim());
        session.kick(KickReason::HandshakeFailed);
    }
    Ok(())
}
