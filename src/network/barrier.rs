//! Turn Barrier
//!
//! Tracks which players are still thinking and lets the coordinator wait,
//! bounded by the turn deadline, until none are.
//!
//! The active set and the all-quiet flag live under one mutex and change
//! together, so the flag is set exactly when the set is empty. The removal
//! of the last thinker and the wakeup it causes are one atomic step, which
//! rules out a lost wakeup between a player finishing and the coordinator
//! starting to wait.
//!
//! Lock order: a session lock may be held while the barrier lock is taken,
//! never the other way round.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Receives "this player stopped thinking" notifications from sessions.
pub trait ReadinessObserver: Send + Sync {
    /// Called under the session's lock whenever its state moves to
    /// anything other than thinking.
    fn stopped_thinking(&self, player: usize);
}

#[derive(Debug, Default)]
struct BarrierState {
    active: BTreeSet<usize>,
    all_quiet: bool,
}

impl BarrierState {
    fn sync_flag(&mut self) {
        self.all_quiet = self.active.is_empty();
    }
}

/// Coordinator-wide turn barrier.
#[derive(Debug)]
pub struct TurnBarrier {
    state: Mutex<BarrierState>,
    quiet: Condvar,
}

impl TurnBarrier {
    /// Create an empty barrier. The all-quiet flag starts set.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState { active: BTreeSet::new(), all_quiet: true }),
            quiet: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the active set.
    pub fn reset<I: IntoIterator<Item = usize>>(&self, players: I) {
        let mut state = self.lock();
        state.active = players.into_iter().collect();
        state.sync_flag();
        if state.all_quiet {
            self.quiet.notify_all();
        }
    }

    /// Add a player that is about to start thinking.
    pub fn enter(&self, player: usize) {
        let mut state = self.lock();
        state.active.insert(player);
        state.sync_flag();
    }

    /// Wait until the active set is empty or `timeout` elapses.
    ///
    /// Returns true if everyone went quiet in time.
    pub fn wait_quiet(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .quiet
            .wait_timeout_while(state, timeout, |s| !s.all_quiet)
            .unwrap_or_else(PoisonError::into_inner);
        state.all_quiet
    }

    /// Check the all-quiet flag.
    pub fn is_quiet(&self) -> bool {
        self.lock().all_quiet
    }

    /// Snapshot of players still thinking, in index order.
    pub fn active(&self) -> Vec<usize> {
        self.lock().active.iter().copied().collect()
    }
}

impl Default for TurnBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessObserver for TurnBarrier {
    fn stopped_thinking(&self, player: usize) {
        let mut state = self.lock();
        state.active.remove(&player);
        state.sync_flag();
        if state.all_quiet {
            self.quiet.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn assert_coupled(barrier: &TurnBarrier) {
        let state = barrier.lock();
        assert_eq!(state.all_quiet, state.active.is_empty());
    }

    #[test]
    fn test_flag_tracks_set() {
        let barrier = TurnBarrier::new();
        assert_coupled(&barrier);
        assert!(barrier.is_quiet());

        barrier.reset(0..3);
        assert_coupled(&barrier);
        assert!(!barrier.is_quiet());

        barrier.stopped_thinking(1);
        assert_coupled(&barrier);
        barrier.stopped_thinking(1);
        assert_coupled(&barrier);
        assert_eq!(barrier.active(), vec![0, 2]);

        barrier.stopped_thinking(0);
        barrier.stopped_thinking(2);
        assert_coupled(&barrier);
        assert!(barrier.is_quiet());

        barrier.enter(2);
        assert_coupled(&barrier);
        assert!(!barrier.is_quiet());

        barrier.reset(std::iter::empty());
        assert_coupled(&barrier);
        assert!(barrier.is_quiet());
    }

    #[test]
    fn test_removing_unknown_player_keeps_flag() {
        let barrier = TurnBarrier::new();
        barrier.reset([4]);
        barrier.stopped_thinking(7);
        assert!(!barrier.is_quiet());
        assert_coupled(&barrier);
    }

    #[test]
    fn test_wait_returns_immediately_when_quiet() {
        let barrier = TurnBarrier::new();
        let start = Instant::now();
        assert!(barrier.wait_quiet(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out() {
        let barrier = TurnBarrier::new();
        barrier.reset([0]);
        let start = Instant::now();
        assert!(!barrier.wait_quiet(Duration::from_millis(100)));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_last_removal_wakes_waiter() {
        let barrier = Arc::new(TurnBarrier::new());
        barrier.reset([0, 1]);

        let worker = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                barrier.stopped_thinking(0);
                thread::sleep(Duration::from_millis(20));
                barrier.stopped_thinking(1);
            })
        };

        let start = Instant::now();
        assert!(barrier.wait_quiet(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        worker.join().unwrap();
    }
}
