//! Turn Coordinator
//!
//! Drives a match: connects every player, runs the handshake round, then
//! advances all sessions through turns in lockstep.
//!
//! Each turn:
//! 1. wait, bounded by the turn duration, for every thinking player to
//!    finish;
//! 2. kick players still thinking (null move), collect everyone else's
//!    input in index order;
//! 3. hand the moves to the game engine;
//! 4. apply the returned states, delivering messages to players that keep
//!    thinking.
//!
//! Faulty players are kicked and excluded; they never stop the match for
//! the others.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, HostConfig};
use crate::core::state::{KickReason, PlayerState};
use crate::game::engine::GameEngine;
use crate::network::barrier::TurnBarrier;
use crate::network::connection::{Connection, ConnectionError, PlayerDescriptor};
use crate::network::session::{PlayerSession, SessionError, ShutdownHandle};

/// Poll interval while waiting for session threads to exit.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Host-fatal errors.
#[derive(Debug, Error)]
pub enum HostError {
    /// A player's connection could not be opened.
    #[error("Player {player}: {source}")]
    Connection {
        /// Player index.
        player: usize,
        /// Underlying error.
        #[source]
        source: ConnectionError,
    },

    /// Invalid limits or tokens.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Session setup or state machine error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The game engine failed.
    #[error("Game engine failed: {0:#}")]
    Engine(anyhow::Error),

    /// The game engine returned the wrong number of entries.
    #[error("Game engine returned {got} {what} for {expected} players")]
    EngineShape {
        /// What was counted.
        what: &'static str,
        /// Player count.
        expected: usize,
        /// Entries returned.
        got: usize,
    },

    /// Results could not be saved.
    #[error("Saving results failed: {0:#}")]
    Results(anyhow::Error),

    /// `run` called on a coordinator that already ran.
    #[error("Match already played")]
    AlreadyPlayed,
}

/// Final state of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerOutcome {
    /// Player index.
    pub index: usize,
    /// State at match end.
    pub state: PlayerState,
    /// Why the player was kicked, if it was.
    pub kick_reason: Option<KickReason>,
}

/// Result of a completed match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    /// Turns processed by the engine.
    pub turns: u32,
    /// Per-player outcomes, in index order.
    pub players: Vec<PlayerOutcome>,
}

/// Advances all player sessions through synchronized turns.
pub struct TurnCoordinator {
    sessions: Vec<PlayerSession>,
    barrier: Arc<TurnBarrier>,
    config: HostConfig,
    played: bool,
}

impl TurnCoordinator {
    /// Open a connection to every player.
    ///
    /// Fails on the first connection that cannot be opened; connections
    /// already opened are closed before returning.
    pub fn connect(descriptors: &[PlayerDescriptor], config: HostConfig) -> Result<Self, HostError> {
        config.validate()?;
        let mut connections = Vec::with_capacity(descriptors.len());
        for (player, descriptor) in descriptors.iter().enumerate() {
            // Dropping `connections` on error closes the ones already open.
            let connection = Connection::open(descriptor)
                .map_err(|source| HostError::Connection { player, source })?;
            connections.push(connection);
        }
        Self::from_connections(connections, config)
    }

    /// Build a coordinator over already-open connections, one per player.
    pub fn from_connections(connections: Vec<Connection>, config: HostConfig) -> Result<Self, HostError> {
        config.validate()?;
        let barrier = Arc::new(TurnBarrier::new());
        let sessions = connections
            .into_iter()
            .enumerate()
            .map(|(index, connection)| PlayerSession::new(index, connection, barrier.clone()))
            .collect();

        Ok(Self { sessions, barrier, config, played: false })
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions, in index order.
    pub fn sessions(&self) -> &[PlayerSession] {
        &self.sessions
    }

    /// Handle for tearing down every connection from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(&self.sessions)
    }

    /// Close every player connection.
    pub fn shutdown(&self) {
        self.shutdown_handle().abort();
    }

    /// Wait for every session thread to exit.
    pub fn join(&mut self) {
        for session in &mut self.sessions {
            session.join();
        }
    }

    /// Close every connection, wait up to `grace` for the session threads,
    /// then abandon the ones still running. Returns how many were abandoned.
    ///
    /// Closing a process connection kills only the direct child; a
    /// descendant that inherited its stdout keeps the session's read
    /// blocked for as long as it lives.
    pub fn join_within(&mut self, grace: Duration) -> usize {
        self.shutdown();
        let deadline = Instant::now() + grace;
        while !self.sessions.iter().all(PlayerSession::is_finished) && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }

        let mut abandoned = 0;
        for session in &mut self.sessions {
            if session.is_finished() {
                session.join();
            } else {
                warn!("Player {} thread still blocked on input, abandoning it", session.index());
                session.abandon();
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Play the match to the end.
    ///
    /// Results are saved through the engine when `results` is given. On any
    /// error every connection is torn down before the error is returned.
    #[instrument(skip_all, fields(players = self.sessions.len()))]
    pub fn run(
        &mut self,
        engine: &mut dyn GameEngine,
        results: Option<&Path>,
    ) -> Result<MatchSummary, HostError> {
        if self.played {
            return Err(HostError::AlreadyPlayed);
        }
        self.played = true;

        let outcome = self.play(engine, results);
        if let Err(e) = &outcome {
            warn!("Match aborted: {}", e);
            self.shutdown();
        }
        outcome
    }

    fn play(
        &mut self,
        engine: &mut dyn GameEngine,
        results: Option<&Path>,
    ) -> Result<MatchSummary, HostError> {
        self.start()?;
        self.handshake_round(engine)?;

        let mut turns = 0u32;
        loop {
            turns += 1;
            let moves = self.collect_moves();

            let replies = engine.process_turn(&moves).map_err(HostError::Engine)?;
            if replies.len() != self.sessions.len() {
                return Err(HostError::EngineShape {
                    what: "turn replies",
                    expected: self.sessions.len(),
                    got: replies.len(),
                });
            }

            let mut still_playing = false;
            for (session, reply) in self.sessions.iter().zip(&replies) {
                let mut guard = session.lock();
                if guard.state().is_final() {
                    continue;
                }
                if reply.state == PlayerState::Thinking {
                    self.barrier.enter(session.index());
                }
                guard.transition(reply.state)?;
                if guard.state() == PlayerState::Thinking {
                    guard.send(&reply.message);
                }
                still_playing |= guard.state().in_play();
            }
            debug!("Turn {} done, thinking: {:?}", turns, self.barrier.active());

            if !still_playing {
                break;
            }
        }

        if let Some(destination) = results {
            engine.save_results(destination).map_err(HostError::Results)?;
            info!("Results saved to {}", destination.display());
        }

        let summary = self.summary(turns);
        info!("Match finished after {} turns", turns);
        Ok(summary)
    }

    /// Send the synchronize token and start every session thread.
    fn start(&mut self) -> Result<(), HostError> {
        self.barrier.reset(0..self.sessions.len());
        for session in &mut self.sessions {
            session.lock().send_line(&self.config.handshake_syn);
            session.start(&self.config)?;
        }
        info!("Started {} player sessions", self.sessions.len());
        Ok(())
    }

    /// Wait for acknowledgements, then set every ready player thinking
    /// with its initial message. Players that never became ready are out.
    fn handshake_round(&mut self, engine: &mut dyn GameEngine) -> Result<(), HostError> {
        let messages = engine.initial_messages();
        if messages.len() != self.sessions.len() {
            return Err(HostError::EngineShape {
                what: "initial messages",
                expected: self.sessions.len(),
                got: messages.len(),
            });
        }

        if !self.barrier.wait_quiet(self.config.limits.turn_duration) {
            debug!("Handshake deadline passed, waiting on {:?}", self.barrier.active());
        }

        for (session, message) in self.sessions.iter().zip(&messages) {
            let mut guard = session.lock();
            if guard.state() == PlayerState::Ready {
                self.barrier.enter(session.index());
                guard.transition(PlayerState::Thinking)?;
                guard.send(message);
            } else {
                guard.kick(KickReason::HandshakeTimeout);
            }
        }
        Ok(())
    }

    /// Wait out the turn and gather each player's move in index order.
    fn collect_moves(&self) -> Vec<Option<String>> {
        if !self.barrier.wait_quiet(self.config.limits.turn_duration) {
            debug!("Turn deadline passed, still thinking: {:?}", self.barrier.active());
        }

        self.sessions
            .iter()
            .map(|session| {
                let mut guard = session.lock();
                match guard.state() {
                    PlayerState::Thinking => {
                        guard.kick(KickReason::Timeout);
                        None
                    }
                    PlayerState::Kicked => None,
                    _ => Some(guard.take_pending_input()),
                }
            })
            .collect()
    }

    fn summary(&self, turns: u32) -> MatchSummary {
        let players = self
            .sessions
            .iter()
            .map(|session| {
                let guard = session.lock();
                PlayerOutcome {
                    index: session.index(),
                    state: guard.state(),
                    kick_reason: guard.kick_reason(),
                }
            })
            .collect();
        MatchSummary { turns, players }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use crate::game::engine::TurnReply;

    /// One scripted answer: wait `delay`, then write `reply`.
    struct Step {
        delay: Duration,
        reply: &'static str,
    }

    fn say(reply: &'static str) -> Step {
        Step { delay: Duration::ZERO, reply }
    }

    fn after(ms: u64, reply: &'static str) -> Step {
        Step { delay: Duration::from_millis(ms), reply }
    }

    /// Answer one line per step, then read until the host hangs up.
    /// Returns every line received.
    fn spawn_player(stream: UnixStream, steps: Vec<Step>) -> JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut received = Vec::new();
            let mut steps = steps.into_iter();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                received.push(line);
                if let Some(step) = steps.next() {
                    thread::sleep(step.delay);
                    let _ = writer.write_all(step.reply.as_bytes());
                }
            }
            received
        })
    }

    #[derive(Default)]
    struct ScriptedEngine {
        initial: Vec<String>,
        turns: VecDeque<Vec<TurnReply>>,
        seen: Vec<Vec<Option<String>>>,
        fail: bool,
    }

    impl GameEngine for ScriptedEngine {
        fn initial_messages(&mut self) -> Vec<String> {
            self.initial.clone()
        }

        fn process_turn(&mut self, moves: &[Option<String>]) -> anyhow::Result<Vec<TurnReply>> {
            self.seen.push(moves.to_vec());
            if self.fail {
                anyhow::bail!("rules exploded");
            }
            let n = moves.len();
            Ok(self
                .turns
                .pop_front()
                .unwrap_or_else(|| vec![TurnReply::finish(PlayerState::Draw); n]))
        }

        fn save_results(&self, _destination: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Records where results were saved.
    struct SavingEngine(ScriptedEngine, std::sync::Mutex<Option<PathBuf>>);

    impl GameEngine for SavingEngine {
        fn initial_messages(&mut self) -> Vec<String> {
            self.0.initial_messages()
        }
        fn process_turn(&mut self, moves: &[Option<String>]) -> anyhow::Result<Vec<TurnReply>> {
            self.0.process_turn(moves)
        }
        fn save_results(&self, destination: &Path) -> anyhow::Result<()> {
            *self.1.lock().unwrap() = Some(destination.to_path_buf());
            Ok(())
        }
    }

    fn test_config(turn_ms: u64) -> HostConfig {
        let mut config = HostConfig::default();
        config.limits.turn_duration = Duration::from_millis(turn_ms);
        config
    }

    fn match_with(
        scripts: Vec<Vec<Step>>,
        turn_ms: u64,
    ) -> (TurnCoordinator, Vec<JoinHandle<Vec<String>>>) {
        let mut connections = Vec::new();
        let mut players = Vec::new();
        for steps in scripts {
            let (host, player) = UnixStream::pair().unwrap();
            connections.push(Connection::from_unix(host).unwrap());
            players.push(spawn_player(player, steps));
        }
        let coordinator = TurnCoordinator::from_connections(connections, test_config(turn_ms)).unwrap();
        (coordinator, players)
    }

    fn outcome(summary: &MatchSummary, index: usize) -> (PlayerState, Option<KickReason>) {
        let p = &summary.players[index];
        (p.state, p.kick_reason)
    }

    #[test]
    fn test_silent_player_misses_handshake() {
        let (mut coordinator, players) = match_with(
            vec![vec![say("ACK\n"), say("movedata\nend\n")], vec![]],
            300,
        );
        let mut engine = SavingEngine(
            ScriptedEngine {
                initial: vec!["init 0\n".into(), "init 1\n".into()],
                turns: VecDeque::from([vec![
                    TurnReply::finish(PlayerState::Won),
                    TurnReply::finish(PlayerState::Lost),
                ]]),
                ..Default::default()
            },
            Default::default(),
        );

        let results = PathBuf::from("results.json");
        let summary = coordinator.run(&mut engine, Some(&results)).unwrap();

        assert_eq!(summary.turns, 1);
        assert_eq!(outcome(&summary, 0), (PlayerState::Won, None));
        assert_eq!(outcome(&summary, 1), (PlayerState::Kicked, Some(KickReason::HandshakeTimeout)));
        assert_eq!(engine.0.seen, vec![vec![Some("movedata\n".to_string()), None]]);
        assert_eq!(*engine.1.lock().unwrap(), Some(results));

        let received: Vec<Vec<String>> = players.into_iter().map(|p| p.join().unwrap()).collect();
        assert_eq!(received[0], vec!["SYN\n", "init 0\n"]);
        assert_eq!(received[1], vec!["SYN\n"]);
        coordinator.join();
    }

    #[test]
    fn test_slow_player_times_out() {
        let (mut coordinator, players) = match_with(
            vec![
                vec![say("ACK\n"), say("a\nend\n"), say("end\n")],
                vec![say("ACK\n"), say("b\n")],
            ],
            300,
        );
        let mut engine = ScriptedEngine {
            initial: vec!["go\n".into(), "go\n".into()],
            turns: VecDeque::from([
                vec![TurnReply::think("turn 2\n"), TurnReply::think("turn 2\n")],
                vec![TurnReply::finish(PlayerState::Won), TurnReply::finish(PlayerState::Won)],
            ]),
            ..Default::default()
        };

        let summary = coordinator.run(&mut engine, None).unwrap();

        assert_eq!(summary.turns, 2);
        assert_eq!(outcome(&summary, 0), (PlayerState::Won, None));
        assert_eq!(outcome(&summary, 1), (PlayerState::Kicked, Some(KickReason::Timeout)));
        assert_eq!(engine.seen[0], vec![Some("a\n".to_string()), None]);
        assert_eq!(engine.seen[1], vec![Some(String::new()), None]);

        let received: Vec<Vec<String>> = players.into_iter().map(|p| p.join().unwrap()).collect();
        assert_eq!(received[0], vec!["SYN\n", "go\n", "turn 2\n"]);
        assert_eq!(received[1], vec!["SYN\n", "go\n"]);
    }

    #[test]
    fn test_moves_ordered_by_index() {
        let (mut coordinator, players) = match_with(
            vec![
                vec![say("ACK\n"), after(150, "zero\nend\n")],
                vec![say("ACK\n"), say("one\nend\n")],
            ],
            2000,
        );
        let mut engine = ScriptedEngine {
            initial: vec!["go\n".into(), "go\n".into()],
            ..Default::default()
        };

        let summary = coordinator.run(&mut engine, None).unwrap();

        assert_eq!(engine.seen, vec![vec![Some("zero\n".to_string()), Some("one\n".to_string())]]);
        assert_eq!(outcome(&summary, 0), (PlayerState::Draw, None));
        assert_eq!(outcome(&summary, 1), (PlayerState::Draw, None));
        for player in players {
            player.join().unwrap();
        }
    }

    #[test]
    fn test_nobody_answers() {
        let (mut coordinator, players) = match_with(vec![vec![], vec![]], 100);
        let mut engine = ScriptedEngine {
            initial: vec![String::new(), String::new()],
            ..Default::default()
        };

        let summary = coordinator.run(&mut engine, None).unwrap();

        assert_eq!(engine.seen, vec![vec![None, None]]);
        for index in 0..2 {
            assert_eq!(outcome(&summary, index), (PlayerState::Kicked, Some(KickReason::HandshakeTimeout)));
        }
        for player in players {
            player.join().unwrap();
        }
    }

    #[test]
    fn test_wrong_ack_is_excluded() {
        let (mut coordinator, players) = match_with(
            vec![vec![say("NOPE\n")], vec![say("ACK\n"), say("x\nend\n")]],
            1000,
        );
        let mut engine = ScriptedEngine {
            initial: vec!["go\n".into(), "go\n".into()],
            ..Default::default()
        };

        let summary = coordinator.run(&mut engine, None).unwrap();

        assert_eq!(outcome(&summary, 0), (PlayerState::Kicked, Some(KickReason::HandshakeFailed)));
        assert_eq!(outcome(&summary, 1), (PlayerState::Draw, None));
        assert_eq!(engine.seen, vec![vec![None, Some("x\n".to_string())]]);
        for player in players {
            player.join().unwrap();
        }
    }

    #[test]
    fn test_engine_failure_tears_down() {
        let (mut coordinator, players) = match_with(
            vec![vec![say("ACK\n"), say("end\n")], vec![say("ACK\n"), say("end\n")]],
            1000,
        );
        let mut engine = ScriptedEngine {
            initial: vec!["go\n".into(), "go\n".into()],
            fail: true,
            ..Default::default()
        };

        let result = coordinator.run(&mut engine, None);
        assert!(matches!(result, Err(HostError::Engine(_))));

        // Players see their streams close.
        for player in players {
            player.join().unwrap();
        }
        assert!(matches!(coordinator.run(&mut engine, None), Err(HostError::AlreadyPlayed)));
    }

    #[test]
    fn test_short_reply_vector_is_fatal() {
        let (mut coordinator, players) = match_with(
            vec![vec![say("ACK\n"), say("end\n")], vec![say("ACK\n"), say("end\n")]],
            1000,
        );
        let mut engine = ScriptedEngine {
            initial: vec!["go\n".into(), "go\n".into()],
            turns: VecDeque::from([vec![TurnReply::finish(PlayerState::Won)]]),
            ..Default::default()
        };

        let result = coordinator.run(&mut engine, None);
        assert!(matches!(
            result,
            Err(HostError::EngineShape { what: "turn replies", expected: 2, got: 1 })
        ));
        for player in players {
            player.join().unwrap();
        }
    }

    #[test]
    fn test_connect_failure_reports_player() {
        let descriptors = vec![
            PlayerDescriptor::Process { exe_name: "cat".into(), stderr: None },
            PlayerDescriptor::Process { exe_name: "/nonexistent/bot".into(), stderr: None },
        ];
        let result = TurnCoordinator::connect(&descriptors, HostConfig::default());
        assert!(matches!(result, Err(HostError::Connection { player: 1, .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = HostConfig::default();
        config.limits.max_lines_per_turn = 0;
        let result = TurnCoordinator::from_connections(Vec::new(), config);
        assert!(matches!(result, Err(HostError::Config(_))));
    }
}
